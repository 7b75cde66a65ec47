use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::models::{CustomerDetails, Subscription};
use crate::money::Money;
use crate::plans::BillingFrequency;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, name, braintree_id, braintree_plan, \
     billing_frequency, price_cents, quantity, trial_end_at, end_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    braintree_id: String,
    braintree_plan: String,
    billing_frequency: i16,
    price_cents: i64,
    quantity: i32,
    trial_end_at: Option<OffsetDateTime>,
    end_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let months = u8::try_from(row.billing_frequency).map_err(|_| {
            BillingError::Internal(format!(
                "Subscription {} has invalid billing frequency {}",
                row.id, row.billing_frequency
            ))
        })?;

        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            braintree_id: row.braintree_id,
            braintree_plan: row.braintree_plan,
            billing_frequency: BillingFrequency::months(months)?,
            price: Money::from_cents(row.price_cents),
            quantity: row.quantity,
            trial_end_at: row.trial_end_at,
            end_at: row.end_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    braintree_id: Option<String>,
    paypal_email: Option<String>,
    card_brand: Option<String>,
    card_last_four: Option<String>,
    trial_end_at: Option<OffsetDateTime>,
}

impl From<CustomerRow> for CustomerDetails {
    fn from(row: CustomerRow) -> Self {
        CustomerDetails {
            braintree_id: row.braintree_id,
            paypal_email: row.paypal_email,
            card_brand: row.card_brand,
            card_last_four: row.card_last_four,
            trial_end_at: row.trial_end_at,
        }
    }
}

/// Postgres-backed store over the `subscriptions` and `billable_customers` tables
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest row matching `condition`; binds `user_id` (if any) before `value`
    async fn fetch_latest(
        &self,
        condition: &str,
        user_id: Option<Uuid>,
        value: &str,
    ) -> BillingResult<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE {} ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS, condition
        );

        let mut query = sqlx::query_as::<_, SubscriptionRow>(&sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }
        query = query.bind(value);

        query
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, name, braintree_id, braintree_plan, billing_frequency,
                price_cents, quantity, trial_end_at, end_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(&subscription.name)
        .bind(&subscription.braintree_id)
        .bind(&subscription.braintree_plan)
        .bind(i16::from(subscription.billing_frequency.as_months()))
        .bind(subscription.price.cents())
        .bind(subscription.quantity)
        .bind(subscription.trial_end_at)
        .bind(subscription.end_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            "Inserted subscription row"
        );
        Ok(())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET name = $2,
                braintree_id = $3,
                braintree_plan = $4,
                billing_frequency = $5,
                price_cents = $6,
                quantity = $7,
                trial_end_at = $8,
                end_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.braintree_id)
        .bind(&subscription.braintree_plan)
        .bind(i16::from(subscription.billing_frequency.as_months()))
        .bind(subscription.price.cents())
        .bind(subscription.quantity)
        .bind(subscription.trial_end_at)
        .bind(subscription.end_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "Subscription {} not found",
                subscription.id
            )));
        }
        Ok(())
    }

    async fn find_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let sql = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn find_by_braintree_id(
        &self,
        braintree_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.fetch_latest("braintree_id = $1", None, braintree_id)
            .await
    }

    async fn find_for_user_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.fetch_latest("user_id = $1 AND name = $2", Some(user_id), name)
            .await
    }

    async fn find_for_user_by_plan(
        &self,
        user_id: Uuid,
        plan_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.fetch_latest("user_id = $1 AND braintree_plan = $2", Some(user_id), plan_id)
            .await
    }

    async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    async fn save_customer_details(
        &self,
        billable_id: Uuid,
        details: &CustomerDetails,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billable_customers (
                billable_id, braintree_id, paypal_email, card_brand, card_last_four,
                trial_end_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (billable_id) DO UPDATE
            SET braintree_id = EXCLUDED.braintree_id,
                paypal_email = EXCLUDED.paypal_email,
                card_brand = EXCLUDED.card_brand,
                card_last_four = EXCLUDED.card_last_four,
                trial_end_at = EXCLUDED.trial_end_at,
                updated_at = NOW()
            "#,
        )
        .bind(billable_id)
        .bind(&details.braintree_id)
        .bind(&details.paypal_email)
        .bind(&details.card_brand)
        .bind(&details.card_last_four)
        .bind(details.trial_end_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(billable_id = %billable_id, "Saved customer details");
        Ok(())
    }

    async fn load_customer_details(
        &self,
        billable_id: Uuid,
    ) -> BillingResult<Option<CustomerDetails>> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            SELECT braintree_id, paypal_email, card_brand, card_last_four, trial_end_at
            FROM billable_customers
            WHERE billable_id = $1
            "#,
        )
        .bind(billable_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CustomerDetails::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(billing_frequency: i16) -> SubscriptionRow {
        SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "main".to_string(),
            braintree_id: "sub000001".to_string(),
            braintree_plan: "yearly-100-1".to_string(),
            billing_frequency,
            price_cents: 10_000,
            quantity: 1,
            trial_end_at: None,
            end_at: None,
            created_at: datetime!(2026-10-18 09:00 UTC),
            updated_at: datetime!(2026-10-18 09:00 UTC),
        }
    }

    #[test]
    fn test_row_conversion() {
        let sub = Subscription::try_from(row(12)).unwrap();
        assert_eq!(sub.billing_frequency, BillingFrequency::YEARLY);
        assert_eq!(sub.price, Money::from_major(100));
    }

    #[test]
    fn test_row_with_bad_frequency_is_rejected() {
        assert!(Subscription::try_from(row(0)).is_err());
        assert!(Subscription::try_from(row(-1)).is_err());
        assert!(Subscription::try_from(row(300)).is_err());
    }
}
