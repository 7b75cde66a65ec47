use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{CustomerDetails, Subscription};

/// Process-local store for tests and sandbox runs
#[derive(Default)]
pub struct InMemoryBillingStore {
    // Insertion order; newest-first listings walk it backwards
    subscriptions: RwLock<Vec<Subscription>>,
    customers: RwLock<HashMap<Uuid, CustomerDetails>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn newest_first<F>(&self, filter: F) -> Vec<Subscription>
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut found: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .iter()
            .rev()
            .filter(|s| filter(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut rows = self.subscriptions.write().await;
        if rows.iter().any(|s| s.id == subscription.id) {
            return Err(BillingError::Internal(format!(
                "Subscription {} already exists",
                subscription.id
            )));
        }
        rows.push(subscription.clone());
        Ok(())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut rows = self.subscriptions.write().await;
        let row = rows
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| {
                BillingError::NotFound(format!("Subscription {} not found", subscription.id))
            })?;
        *row = subscription.clone();
        Ok(())
    }

    async fn find_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn find_by_braintree_id(
        &self,
        braintree_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .newest_first(|s| s.braintree_id == braintree_id)
            .await
            .into_iter()
            .next())
    }

    async fn find_for_user_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .newest_first(|s| s.user_id == user_id && s.name == name)
            .await
            .into_iter()
            .next())
    }

    async fn find_for_user_by_plan(
        &self,
        user_id: Uuid,
        plan_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .newest_first(|s| s.user_id == user_id && s.braintree_plan == plan_id)
            .await
            .into_iter()
            .next())
    }

    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>> {
        Ok(self.newest_first(|s| s.user_id == user_id).await)
    }

    async fn save_customer_details(
        &self,
        billable_id: Uuid,
        details: &CustomerDetails,
    ) -> BillingResult<()> {
        self.customers
            .write()
            .await
            .insert(billable_id, details.clone());
        Ok(())
    }

    async fn load_customer_details(
        &self,
        billable_id: Uuid,
    ) -> BillingResult<Option<CustomerDetails>> {
        Ok(self.customers.read().await.get(&billable_id).cloned())
    }
}
