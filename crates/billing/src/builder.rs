//! Fluent creation of new subscriptions

use time::Duration;

use crate::customers::{default_token, CustomerOptions, CustomerService};
use crate::error::BillingResult;
use crate::gateway::{
    DiscountAddition, DiscountChanges, GatewayCustomer, SubscriptionPayload, TrialDurationUnit,
};
use crate::models::{BillableEntity, Subscription};
use crate::plans::find_plan;

/// Extra processor options for the subscription being created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub discounts: DiscountChanges,
}

pub struct SubscriptionBuilder<'a, E: BillableEntity + ?Sized> {
    customers: &'a CustomerService,
    owner: &'a mut E,
    name: String,
    plan: String,
    trial_days: u32,
    skip_trial: bool,
    coupon: Option<String>,
}

impl<'a, E: BillableEntity + ?Sized> SubscriptionBuilder<'a, E> {
    pub fn new(customers: &'a CustomerService, owner: &'a mut E, name: &str, plan: &str) -> Self {
        Self {
            customers,
            owner,
            name: name.to_string(),
            plan: plan.to_string(),
            trial_days: 0,
            skip_trial: false,
            coupon: None,
        }
    }

    pub fn trial_days(mut self, days: u32) -> Self {
        self.trial_days = days;
        self
    }

    /// End any trial immediately; wins over `trial_days`
    pub fn skip_trial(mut self) -> Self {
        self.skip_trial = true;
        self
    }

    pub fn with_coupon(mut self, coupon: &str) -> Self {
        self.coupon = Some(coupon.to_string());
        self
    }

    /// Subscribe an existing customer with the payment method on file
    pub async fn add(self) -> BillingResult<Subscription> {
        self.create_with(None, CustomerOptions::default(), SubscriptionOptions::default())
            .await
    }

    pub async fn create(self, token: Option<&str>) -> BillingResult<Subscription> {
        self.create_with(token, CustomerOptions::default(), SubscriptionOptions::default())
            .await
    }

    pub async fn create_with(
        mut self,
        token: Option<&str>,
        customer_options: CustomerOptions,
        options: SubscriptionOptions,
    ) -> BillingResult<Subscription> {
        let customers = self.customers;
        let trial_days = self.effective_trial_days();
        let plan = find_plan(customers.gateway(), &self.plan).await?;

        let customer = self.braintree_customer(token, customer_options).await?;

        let mut discounts = options.discounts;
        if let Some(coupon) = &self.coupon {
            discounts.add.push(DiscountAddition::inherited(coupon.clone()));
        }

        let price = plan.price.with_tax(self.owner.tax_percentage());
        let payload = SubscriptionPayload {
            plan_id: plan.id.clone(),
            price,
            payment_method_token: default_token(&customer)?.to_string(),
            trial_period: trial_days > 0,
            trial_duration: trial_days,
            trial_duration_unit: TrialDurationUnit::Day,
            discounts,
        };

        let created = customers
            .gateway()
            .create_subscription(payload)
            .await?
            .into_result("Braintree failed to create subscription")?;

        let now = customers.clock().now();
        let mut subscription = Subscription::new(
            self.owner.billable_id(),
            self.name,
            created.id,
            &plan,
            price,
            now,
        );
        if trial_days > 0 {
            subscription.trial_end_at = Some(now + Duration::days(i64::from(trial_days)));
        }

        customers.store().insert_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            plan = %subscription.braintree_plan,
            trial_days = trial_days,
            "Created subscription"
        );

        Ok(subscription)
    }

    fn effective_trial_days(&self) -> u32 {
        if self.skip_trial {
            0
        } else {
            self.trial_days
        }
    }

    /// Create the customer on first use, otherwise swap in the new card
    async fn braintree_customer(
        &mut self,
        token: Option<&str>,
        options: CustomerOptions,
    ) -> BillingResult<GatewayCustomer> {
        let customers = self.customers;

        if !customers.has_braintree_id(&*self.owner) {
            return customers
                .create_as_customer(&mut *self.owner, token, options)
                .await;
        }

        if let Some(token) = token {
            customers.update_card(&mut *self.owner, token).await?;
        }
        customers.as_customer(&*self.owner).await
    }
}
