//! Subscription lifecycle
//!
//! Swapping plans, cancelling (at period end or immediately), resuming
//! within the grace period and applying coupons. The local row is only
//! written after the processor accepted the change.

use crate::builder::SubscriptionOptions;
use crate::customers::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingCycleCap, DiscountAddition, DiscountChanges, GatewaySubscription, SubscriptionUpdate,
};
use crate::models::{BillableEntity, Subscription};
use crate::plans::{find_plan, Plan};
use crate::proration::ProrationCalculator;

/// Subscription service operating on persisted subscription rows
#[derive(Clone)]
pub struct SubscriptionService {
    customers: CustomerService,
}

impl SubscriptionService {
    pub fn new(customers: CustomerService) -> Self {
        Self { customers }
    }

    pub async fn as_gateway_subscription(
        &self,
        subscription: &Subscription,
    ) -> BillingResult<GatewaySubscription> {
        self.customers
            .gateway()
            .find_subscription(&subscription.braintree_id)
            .await
    }

    // =========================================================================
    // Plan swaps
    // =========================================================================

    /// Move the subscription to `plan_id` and return the subscription now in effect
    ///
    /// - Same plan during the grace period: resumes instead.
    /// - Inactive subscription: a new one with the same name is created, no trial.
    /// - Same billing frequency: the processor subscription is updated in place.
    /// - Different billing frequency: the current subscription is cancelled now
    ///   and replaced, carrying unused value as a `plan-credit` discount.
    pub async fn swap<E: BillableEntity + ?Sized>(
        &self,
        owner: &mut E,
        subscription: &mut Subscription,
        plan_id: &str,
    ) -> BillingResult<Subscription> {
        let clock = self.customers.clock();

        if subscription.on_grace_period(clock) && subscription.is_on_plan(plan_id) {
            self.resume(subscription).await?;
            return Ok(subscription.clone());
        }

        if !subscription.active(clock) {
            let name = subscription.name.clone();
            return self
                .customers
                .new_subscription(owner, &name, plan_id)
                .skip_trial()
                .create(None)
                .await;
        }

        let gateway = self.customers.gateway();
        let target = find_plan(gateway, plan_id).await?;
        let current = find_plan(gateway, &subscription.braintree_plan).await?;

        if ProrationCalculator::would_change_billing_frequency(&current, &target) {
            return self
                .swap_across_frequencies(owner, subscription, &current, &target)
                .await;
        }

        let price = target.price.with_tax(owner.tax_percentage());
        gateway
            .update_subscription(
                &subscription.braintree_id,
                SubscriptionUpdate {
                    plan_id: Some(target.id.clone()),
                    price: Some(price),
                    billing_cycles: Some(BillingCycleCap::NeverExpires),
                    prorate_charges: Some(true),
                    ..Default::default()
                },
            )
            .await?
            .into_result("Braintree failed to swap plans")?;

        subscription.braintree_plan = target.id.clone();
        subscription.billing_frequency = target.billing_frequency;
        subscription.price = price;
        subscription.end_at = None;
        subscription.trial_end_at = None;
        self.save(subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            from_plan = %current.id,
            plan = %target.id,
            "Swapped plan"
        );

        Ok(subscription.clone())
    }

    async fn swap_across_frequencies<E: BillableEntity + ?Sized>(
        &self,
        owner: &mut E,
        subscription: &mut Subscription,
        current: &Plan,
        target: &Plan,
    ) -> BillingResult<Subscription> {
        let remote = self.as_gateway_subscription(subscription).await?;
        let credit = ProrationCalculator::credit_for_swap(
            current,
            target,
            &remote,
            self.customers.clock().today_date(),
        );

        self.cancel_now(subscription).await?;

        let name = subscription.name.clone();
        let replacement = self
            .customers
            .new_subscription(owner, &name, &target.id)
            .skip_trial()
            .create_with(
                None,
                Default::default(),
                SubscriptionOptions {
                    discounts: credit.into_discounts(),
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %replacement.id,
            replaced = %subscription.id,
            from_plan = %current.id,
            plan = %target.id,
            credit_amount = %credit.amount,
            credit_cycles = credit.number_of_billing_cycles,
            "Swapped plan across billing frequencies"
        );

        Ok(replacement)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel at the end of the billing period; during a trial, cancel now
    pub async fn cancel(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let remote = self.as_gateway_subscription(subscription).await?;

        if subscription.on_trial(self.customers.clock()) {
            self.customers
                .gateway()
                .cancel_subscription(&remote.id)
                .await?;
            self.mark_as_cancelled(subscription).await?;
        } else {
            self.customers
                .gateway()
                .update_subscription(
                    &remote.id,
                    SubscriptionUpdate {
                        billing_cycles: Some(BillingCycleCap::Cycles(remote.current_billing_cycle)),
                        ..Default::default()
                    },
                )
                .await?
                .into_result("Braintree failed to cancel subscription")?;

            let offset = self.customers.clock().now().offset();
            subscription.end_at = Some(
                remote
                    .billing_period_end_date
                    .midnight()
                    .assume_offset(offset),
            );
            self.save(subscription).await?;
        }

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            end_at = ?subscription.end_at,
            "Cancelled subscription"
        );

        Ok(())
    }

    /// Cancel at the processor and end the subscription immediately
    pub async fn cancel_now(&self, subscription: &mut Subscription) -> BillingResult<()> {
        let remote = self.as_gateway_subscription(subscription).await?;
        self.customers
            .gateway()
            .cancel_subscription(&remote.id)
            .await?;
        self.mark_as_cancelled(subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            "Cancelled subscription immediately"
        );

        Ok(())
    }

    /// Local only: end the subscription now without calling the processor
    pub async fn mark_as_cancelled(&self, subscription: &mut Subscription) -> BillingResult<()> {
        subscription.end_at = Some(self.customers.clock().now());
        self.save(subscription).await
    }

    /// Undo a cancellation while the grace period lasts
    pub async fn resume(&self, subscription: &mut Subscription) -> BillingResult<()> {
        if !subscription.on_grace_period(self.customers.clock()) {
            return Err(BillingError::StateViolation(
                "Unable to resume subscription that is not within grace period.".to_string(),
            ));
        }

        let remote = self.as_gateway_subscription(subscription).await?;
        self.customers
            .gateway()
            .update_subscription(
                &remote.id,
                SubscriptionUpdate {
                    billing_cycles: Some(BillingCycleCap::NeverExpires),
                    ..Default::default()
                },
            )
            .await?
            .into_result("Braintree failed to resume subscription")?;

        subscription.end_at = None;
        self.save(subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            "Resumed subscription"
        );

        Ok(())
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Add the coupon's discount, optionally replacing every current discount
    pub async fn apply_coupon(
        &self,
        subscription: &Subscription,
        coupon: &str,
        remove_others: bool,
    ) -> BillingResult<()> {
        if !subscription.active(self.customers.clock()) {
            return Err(BillingError::StateViolation(
                "Unable to apply coupon. Subscription not active.".to_string(),
            ));
        }

        let remove = if remove_others {
            self.as_gateway_subscription(subscription)
                .await?
                .discount_ids()
        } else {
            Vec::new()
        };

        self.customers
            .gateway()
            .update_subscription(
                &subscription.braintree_id,
                SubscriptionUpdate {
                    discounts: Some(DiscountChanges {
                        add: vec![DiscountAddition::inherited(coupon)],
                        remove,
                    }),
                    ..Default::default()
                },
            )
            .await?
            .into_result("Braintree failed to apply coupon")?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %subscription.braintree_id,
            coupon = %coupon,
            remove_others = remove_others,
            "Applied coupon"
        );

        Ok(())
    }

    /// Apply a coupon to the owner's named subscription
    pub async fn apply_coupon_for<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        coupon: &str,
        name: &str,
        remove_others: bool,
    ) -> BillingResult<()> {
        let subscription = self.customers.subscription(owner, name).await?.ok_or_else(|| {
            BillingError::InvalidArgument(
                "Unable to apply coupon. Subscription does not exist.".to_string(),
            )
        })?;

        self.apply_coupon(&subscription, coupon, remove_others)
            .await
    }

    async fn save(&self, subscription: &mut Subscription) -> BillingResult<()> {
        subscription.updated_at = self.customers.clock().now();
        self.customers.store().save_subscription(subscription).await
    }
}
