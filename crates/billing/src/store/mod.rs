//! Persistence of subscription rows and per-entity customer details
//!
//! [`PgBillingStore`] is the production implementation; the in-memory
//! [`InMemoryBillingStore`] backs tests and sandbox runs.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{CustomerDetails, Subscription};

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

#[async_trait]
pub trait BillingStore: Send + Sync {
    // Subscriptions

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()>;

    /// Overwrite an existing row; fails with `NotFound` when it was never inserted
    async fn save_subscription(&self, subscription: &Subscription) -> BillingResult<()>;

    async fn find_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn find_by_braintree_id(&self, braintree_id: &str)
        -> BillingResult<Option<Subscription>>;

    /// Most recently created subscription with the given name
    async fn find_for_user_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// Most recently created subscription on the given plan
    async fn find_for_user_by_plan(
        &self,
        user_id: Uuid,
        plan_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// All subscriptions of a user, newest first
    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>>;

    // Customer details

    async fn save_customer_details(
        &self,
        billable_id: Uuid,
        details: &CustomerDetails,
    ) -> BillingResult<()>;

    async fn load_customer_details(&self, billable_id: Uuid)
        -> BillingResult<Option<CustomerDetails>>;
}
