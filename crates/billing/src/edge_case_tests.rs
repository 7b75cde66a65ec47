// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Full lifecycle scenarios against the sandbox gateway:
//! - Plan swaps across billing frequencies and the carried credit
//! - Cancellation, grace periods and webhook-driven endings
//! - Coupons, invoices and one-off charges
//! - Payment method updates

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use cashier_shared::FixedClock;
    use time::macros::datetime;

    use crate::client::{BraintreeConfig, BraintreeEnvironment};
    use crate::gateway::sandbox::{SandboxGateway, NONCE_VALID_VISA};
    use crate::models::{BillableUser, Subscription};
    use crate::store::InMemoryBillingStore;
    use crate::BillingService;

    pub struct World {
        pub billing: BillingService,
        pub gateway: Arc<SandboxGateway>,
        pub store: Arc<InMemoryBillingStore>,
        pub clock: Arc<FixedClock>,
    }

    pub fn world() -> World {
        let clock = Arc::new(FixedClock::new(datetime!(2026-10-18 10:00 UTC)));
        let gateway = Arc::new(SandboxGateway::with_default_catalog(clock.clone()));
        let store = Arc::new(InMemoryBillingStore::new());
        let config = BraintreeConfig {
            environment: BraintreeEnvironment::Sandbox,
            merchant_id: "merchant".to_string(),
            public_key: "public".to_string(),
            private_key: "private".to_string(),
        };
        World {
            billing: BillingService::new(&config, gateway.clone(), store.clone(), clock.clone()),
            gateway,
            store,
            clock,
        }
    }

    pub fn taylor() -> BillableUser {
        BillableUser::new("taylor@example.com", "Taylor Otwell")
    }

    pub async fn subscribe(w: &World, user: &mut BillableUser, plan: &str) -> Subscription {
        w.billing
            .customers
            .new_subscription(user, "main", plan)
            .create(Some(NONCE_VALID_VISA))
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod swap_tests {
    use super::support::*;
    use crate::gateway::SubscriptionGateway;
    use crate::proration::PLAN_CREDIT_DISCOUNT_ID;
    use cashier_shared::Clock;
    use time::Duration;

    // =========================================================================
    // Yearly to monthly with 330 days left: 90.41 remaining -> 9 free months
    // =========================================================================
    #[tokio::test]
    async fn test_yearly_to_monthly_carries_whole_months() {
        let w = world();
        let mut user = taylor();
        let mut yearly = subscribe(&w, &mut user, "yearly-100-1").await;

        w.clock.advance(Duration::days(34));
        let monthly = w
            .billing
            .subscriptions
            .swap(&mut user, &mut yearly, "monthly-10-1")
            .await
            .unwrap();

        assert_ne!(monthly.id, yearly.id);
        assert_eq!(monthly.name, "main");
        assert!(monthly.billing_frequency.is_monthly());
        assert_eq!(yearly.end_at, Some(w.clock.now()));

        let old_remote = w.gateway.find_subscription(&yearly.braintree_id).await.unwrap();
        assert_eq!(old_remote.status, crate::gateway::GatewaySubscriptionStatus::Canceled);

        let remote = w.gateway.find_subscription(&monthly.braintree_id).await.unwrap();
        assert_eq!(remote.discounts.len(), 1);
        let credit = &remote.discounts[0];
        assert_eq!(credit.id, PLAN_CREDIT_DISCOUNT_ID);
        assert_eq!(credit.amount.to_string(), "10.00");
        assert_eq!(credit.number_of_billing_cycles, Some(9));
        assert!(!remote.trial_period);

        let current = w
            .billing
            .customers
            .subscription(&user, "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, monthly.id);
    }

    // =========================================================================
    // Swap on the day of purchase: 364 days left still rounds down to 9
    // =========================================================================
    #[tokio::test]
    async fn test_yearly_to_monthly_on_first_day() {
        let w = world();
        let mut user = taylor();
        let mut yearly = subscribe(&w, &mut user, "yearly-100-1").await;

        let monthly = w
            .billing
            .subscriptions
            .swap(&mut user, &mut yearly, "monthly-10-1")
            .await
            .unwrap();

        let remote = w.gateway.find_subscription(&monthly.braintree_id).await.unwrap();
        assert_eq!(remote.discounts[0].number_of_billing_cycles, Some(9));

        // Same instant as the cancelled row; the replacement still wins
        let current = w
            .billing
            .customers
            .subscription(&user, "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, monthly.id);
        assert!(current.active(w.clock.as_ref()));
    }

    // =========================================================================
    // Back to yearly: unused monthly credit is collapsed into one discount
    // =========================================================================
    #[tokio::test]
    async fn test_swap_back_to_yearly_collapses_credit() {
        let w = world();
        let mut user = taylor();
        let mut yearly = subscribe(&w, &mut user, "yearly-100-1").await;

        w.clock.advance(Duration::days(34));
        let mut monthly = w
            .billing
            .subscriptions
            .swap(&mut user, &mut yearly, "monthly-10-1")
            .await
            .unwrap();

        let back = w
            .billing
            .subscriptions
            .swap(&mut user, &mut monthly, "yearly-100-1")
            .await
            .unwrap();

        assert!(back.billing_frequency.is_yearly());
        let remote = w.gateway.find_subscription(&back.braintree_id).await.unwrap();
        assert_eq!(remote.discounts.len(), 1);
        assert_eq!(remote.discounts[0].amount.to_string(), "90.00");
        assert_eq!(remote.discounts[0].number_of_billing_cycles, Some(1));
    }

    // =========================================================================
    // Monthly to yearly without any credit adds no discount
    // =========================================================================
    #[tokio::test]
    async fn test_monthly_to_yearly_without_credit() {
        let w = world();
        let mut user = taylor();
        let mut monthly = subscribe(&w, &mut user, "monthly-10-1").await;

        let yearly = w
            .billing
            .subscriptions
            .swap(&mut user, &mut monthly, "yearly-100-1")
            .await
            .unwrap();

        let remote = w.gateway.find_subscription(&yearly.braintree_id).await.unwrap();
        assert!(remote.discounts.is_empty());
        assert_eq!(remote.price.to_string(), "100.00");
    }

    // =========================================================================
    // Swapping an ended subscription starts a fresh one without trial
    // =========================================================================
    #[tokio::test]
    async fn test_swap_after_subscription_ended() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;
        w.billing.subscriptions.cancel_now(&mut sub).await.unwrap();

        w.clock.advance(Duration::days(1));
        let fresh = w
            .billing
            .subscriptions
            .swap(&mut user, &mut sub, "monthly-10-2")
            .await
            .unwrap();

        assert_ne!(fresh.id, sub.id);
        assert_eq!(fresh.braintree_plan, "monthly-10-2");
        assert!(fresh.trial_end_at.is_none());
        assert_eq!(
            w.billing.customers.subscriptions(&user).await.unwrap().len(),
            2
        );
    }

    // =========================================================================
    // Same plan while on grace period resumes instead of swapping
    // =========================================================================
    #[tokio::test]
    async fn test_swap_to_same_plan_on_grace_period_resumes() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;
        w.billing.subscriptions.cancel(&mut sub).await.unwrap();

        let resumed = w
            .billing
            .subscriptions
            .swap(&mut user, &mut sub, "monthly-10-1")
            .await
            .unwrap();

        assert_eq!(resumed.id, sub.id);
        assert!(!resumed.cancelled());
        let remote = w.gateway.find_subscription(&sub.braintree_id).await.unwrap();
        assert!(remote.never_expires());
    }
}

#[cfg(test)]
mod cancellation_tests {
    use super::support::*;
    use crate::gateway::{GatewaySubscriptionStatus, SubscriptionGateway};
    use crate::store::BillingStore;
    use crate::webhooks::WebhookKind;
    use crate::WebhookOutcome;
    use cashier_shared::Clock;
    use time::Duration;

    // =========================================================================
    // Cancelling during a trial ends the subscription at once
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_during_trial_is_immediate() {
        let w = world();
        let mut user = taylor();
        let mut sub = w
            .billing
            .customers
            .new_subscription(&mut user, "main", "monthly-10-1")
            .trial_days(14)
            .create(Some(crate::gateway::sandbox::NONCE_VALID_VISA))
            .await
            .unwrap();

        w.billing.subscriptions.cancel(&mut sub).await.unwrap();

        assert_eq!(sub.end_at, Some(w.clock.now()));
        assert!(!sub.on_grace_period(w.clock.as_ref()));
        let remote = w.gateway.find_subscription(&sub.braintree_id).await.unwrap();
        assert_eq!(remote.status, GatewaySubscriptionStatus::Canceled);
    }

    // =========================================================================
    // Grace period lasts until the end of the paid period
    // =========================================================================
    #[tokio::test]
    async fn test_grace_period_expires_at_period_end() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;
        w.billing.subscriptions.cancel(&mut sub).await.unwrap();

        w.clock.advance(Duration::days(29));
        assert!(sub.on_grace_period(w.clock.as_ref()));
        assert!(w
            .billing
            .customers
            .subscribed(&user, "main", None)
            .await
            .unwrap());

        w.clock.advance(Duration::days(1));
        assert!(!sub.valid(w.clock.as_ref()));
        assert!(!w
            .billing
            .customers
            .subscribed(&user, "main", None)
            .await
            .unwrap());
    }

    // =========================================================================
    // Cancellation webhook ends a grace period early
    // =========================================================================
    #[tokio::test]
    async fn test_webhook_ends_grace_period() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;
        w.billing.subscriptions.cancel(&mut sub).await.unwrap();
        w.clock.advance(Duration::days(2));

        let signed = w
            .billing
            .webhooks
            .sample_notification(WebhookKind::SubscriptionCanceled, &sub.braintree_id)
            .unwrap();
        let outcome = w
            .billing
            .webhooks
            .receive(&signed.bt_signature, &signed.bt_payload)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Handled);

        let stored = w.store.find_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.end_at, Some(w.clock.now()));
        assert!(!stored.active(w.clock.as_ref()));
    }

    // =========================================================================
    // Expiry webhook for an active subscription
    // =========================================================================
    #[tokio::test]
    async fn test_expired_webhook_ends_active_subscription() {
        let w = world();
        let mut user = taylor();
        let sub = subscribe(&w, &mut user, "monthly-10-1").await;

        let signed = w
            .billing
            .webhooks
            .sample_notification(WebhookKind::SubscriptionExpired, &sub.braintree_id)
            .unwrap();
        w.billing
            .webhooks
            .receive(&signed.bt_signature, &signed.bt_payload)
            .await
            .unwrap();

        assert!(!w
            .billing
            .customers
            .subscribed(&user, "main", None)
            .await
            .unwrap());
    }

    // =========================================================================
    // Cancelling twice surfaces the processor's refusal
    // =========================================================================
    #[tokio::test]
    async fn test_cancel_now_twice_is_rejected() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;

        w.billing.subscriptions.cancel_now(&mut sub).await.unwrap();
        let err = w.billing.subscriptions.cancel_now(&mut sub).await.unwrap_err();
        assert!(matches!(err, crate::BillingError::GatewayRejection { .. }));
    }
}

#[cfg(test)]
mod coupon_and_invoice_tests {
    use super::support::*;
    use crate::customers::ChargeOptions;
    use crate::gateway::sandbox::{NONCE_VALID_MASTERCARD, NONCE_VALID_VISA};
    use crate::gateway::SubscriptionGateway;
    use crate::money::Money;
    use crate::BillingError;
    use time::Duration;

    // =========================================================================
    // Coupon at creation shows up on the first invoice
    // =========================================================================
    #[tokio::test]
    async fn test_coupon_invoice() {
        let w = world();
        let mut user = taylor();
        w.billing
            .customers
            .new_subscription(&mut user, "main", "monthly-10-1")
            .with_coupon("coupon-1")
            .create(Some(NONCE_VALID_VISA))
            .await
            .unwrap();

        // Unsettled transactions are hidden by default
        assert!(w.billing.customers.invoices(&user, false).await.unwrap().is_empty());

        let invoices = w
            .billing
            .customers
            .invoices_including_pending(&user)
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.total(), "$5.00");
        assert_eq!(invoice.subtotal(), "$10.00");
        assert!(invoice.has_discount());
        assert_eq!(invoice.amount_off(), "$5.00");
        assert_eq!(invoice.coupons(), vec!["coupon-1"]);

        w.gateway.settle_transaction(invoice.id()).unwrap();
        assert_eq!(w.billing.customers.invoices(&user, false).await.unwrap().len(), 1);
    }

    // =========================================================================
    // Coupon on a cancelled subscription never reaches the processor
    // =========================================================================
    #[tokio::test]
    async fn test_apply_coupon_to_ended_subscription() {
        let w = world();
        let mut user = taylor();
        let mut sub = subscribe(&w, &mut user, "monthly-10-1").await;
        w.billing.subscriptions.cancel_now(&mut sub).await.unwrap();
        let before = w.gateway.calls();

        let err = w
            .billing
            .subscriptions
            .apply_coupon(&sub, "coupon-1", false)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::StateViolation(_)));
        assert_eq!(err.to_string(), "Unable to apply coupon. Subscription not active.");
        assert_eq!(w.gateway.calls(), before);
    }

    // =========================================================================
    // Invoices belonging to another customer are invisible
    // =========================================================================
    #[tokio::test]
    async fn test_find_invoice_of_other_customer() {
        let w = world();
        let mut taylor = taylor();
        let mut other = crate::models::BillableUser::new("jane@example.com", "Jane Doe");
        subscribe(&w, &mut taylor, "monthly-10-1").await;
        subscribe(&w, &mut other, "monthly-10-1").await;

        let invoices = w
            .billing
            .customers
            .invoices_including_pending(&other)
            .await
            .unwrap();
        let foreign_id = invoices[0].id().to_string();

        assert!(w.billing.customers.find_invoice(&taylor, &foreign_id).await.is_none());
        assert!(w.billing.customers.find_invoice(&taylor, "missing").await.is_none());
        let err = w
            .billing
            .customers
            .find_invoice_or_fail(&taylor, &foreign_id)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not found: The requested invoice does not exist.");

        assert!(w.billing.customers.find_invoice(&other, &foreign_id).await.is_some());
    }

    // =========================================================================
    // Invoices are listed newest first
    // =========================================================================
    #[tokio::test]
    async fn test_charges_listed_newest_first() {
        let w = world();
        let mut user = taylor();
        subscribe(&w, &mut user, "monthly-10-1").await;

        w.clock.advance(Duration::hours(1));
        let tx = w
            .billing
            .customers
            .invoice_for(&user, "Consulting", Money::from_major(25), ChargeOptions::default())
            .await
            .unwrap();

        let invoices = w
            .billing
            .customers
            .invoices_including_pending(&user)
            .await
            .unwrap();
        assert_eq!(invoices.len(), 2);
        assert_eq!(invoices[0].id(), tx.id);
        assert_eq!(invoices[0].custom_field("description"), Some("Consulting"));
        assert_eq!(invoices[0].total(), "$25.00");
        assert!(invoices[0].subscription_id().is_none());
    }

    // =========================================================================
    // Tax applies to one-off charges
    // =========================================================================
    #[tokio::test]
    async fn test_charge_with_tax() {
        let w = world();
        let mut user = taylor();
        user.tax_percentage = 10.0;
        subscribe(&w, &mut user, "monthly-10-1").await;

        let tx = w
            .billing
            .customers
            .charge(&user, Money::from_major(10), ChargeOptions::default())
            .await
            .unwrap();
        assert_eq!(tx.amount.to_string(), "11.00");
    }

    // =========================================================================
    // New card moves active subscriptions, ended ones stay put
    // =========================================================================
    #[tokio::test]
    async fn test_update_card_moves_active_subscriptions() {
        let w = world();
        let mut user = taylor();
        let active = subscribe(&w, &mut user, "monthly-10-1").await;
        let mut ended = w
            .billing
            .customers
            .new_subscription(&mut user, "other", "monthly-10-2")
            .add()
            .await
            .unwrap();
        w.billing.subscriptions.cancel_now(&mut ended).await.unwrap();
        let old_token = w
            .gateway
            .find_subscription(&ended.braintree_id)
            .await
            .unwrap()
            .payment_method_token;

        let method = w
            .billing
            .customers
            .update_card(&mut user, NONCE_VALID_MASTERCARD)
            .await
            .unwrap();

        assert_eq!(user.details.card_last_four.as_deref(), Some("4444"));
        let remote = w.gateway.find_subscription(&active.braintree_id).await.unwrap();
        assert_eq!(remote.payment_method_token, method.token());
        let remote = w.gateway.find_subscription(&ended.braintree_id).await.unwrap();
        assert_eq!(remote.payment_method_token, old_token);
    }
}
