// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Cashier Billing Module
//!
//! Subscription billing on top of Braintree.
//!
//! ## Features
//!
//! - **Subscriptions**: Create with trials and coupons, cancel with a grace period, resume
//! - **Plan Swaps**: In-place swaps, and credit-carrying swaps between monthly and yearly plans
//! - **Customers**: Vault customers and cards, one-off charges
//! - **Invoices**: Transaction history presented as invoices
//! - **Webhooks**: Handle Braintree cancellation notifications

pub mod builder;
pub mod client;
pub mod customers;
pub mod error;
pub mod gateway;
pub mod invoices;
pub mod models;
pub mod money;
pub mod plans;
pub mod proration;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

use cashier_shared::Clock;
use sqlx::PgPool;

// Builder
pub use builder::{SubscriptionBuilder, SubscriptionOptions};

// Client
pub use client::{BraintreeConfig, BraintreeEnvironment};

// Customers
pub use customers::{ChargeOptions, CustomerOptions, CustomerService};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{PaymentGateway, SandboxGateway};

// Invoices
pub use invoices::Invoice;

// Models
pub use models::{BillableEntity, BillableUser, CustomerDetails, Subscription, DEFAULT_SUBSCRIPTION};

// Money and plans
pub use money::Money;
pub use plans::{find_plan, BillingFrequency, Plan};

// Proration
pub use proration::{PlanCredit, ProrationCalculator, PLAN_CREDIT_DISCOUNT_ID};

// Store
pub use store::{BillingStore, InMemoryBillingStore, PgBillingStore};

// Subscriptions
pub use subscriptions::SubscriptionService;

// Webhooks
pub use webhooks::{
    SignedNotification, WebhookHandler, WebhookKind, WebhookNotification, WebhookOutcome,
};

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub customers: CustomerService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a billing service backed by Postgres
    pub fn with_pool(
        config: &BraintreeConfig,
        gateway: Arc<dyn PaymentGateway>,
        pool: PgPool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(config, gateway, Arc::new(PgBillingStore::new(pool)), clock)
    }

    /// Create a billing service with explicit collaborators
    pub fn new(
        config: &BraintreeConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let customers = CustomerService::new(gateway, store.clone(), clock.clone());

        Self {
            subscriptions: SubscriptionService::new(customers.clone()),
            customers,
            webhooks: WebhookHandler::new(config, store, clock),
        }
    }
}
