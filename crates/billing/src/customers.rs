//! Billable entity operations
//!
//! Everything a billable host entity can do with the processor: become a
//! customer, change its card, pay one-off charges, list invoices and query
//! its subscriptions.

use std::collections::BTreeMap;
use std::sync::Arc;

use cashier_shared::Clock;
use time::{Date, Duration, OffsetDateTime, Time};

use crate::builder::SubscriptionBuilder;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CustomerPayload, GatewayCustomer, PaymentGateway, PaymentMethod, PaymentMethodPayload,
    SalePayload, SubscriptionUpdate, Transaction, TransactionSearch, TransactionStatus,
};
use crate::invoices::Invoice;
use crate::models::{BillableEntity, CustomerDetails, Subscription};
use crate::money::Money;
use crate::store::BillingStore;

/// Extra fields for a one-off charge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChargeOptions {
    pub order_id: Option<String>,
    pub custom_fields: BTreeMap<String, String>,
}

/// Overrides for the customer record created at the processor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerOptions {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone)]
pub struct CustomerService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
}

impl CustomerService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            store,
            clock,
        }
    }

    pub(crate) fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn store(&self) -> &dyn BillingStore {
        self.store.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // =========================================================================
    // Charges
    // =========================================================================

    /// Charge the default payment method once, tax included
    pub async fn charge<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        amount: Money,
        options: ChargeOptions,
    ) -> BillingResult<Transaction> {
        let customer = self.as_customer(owner).await?;
        let token = default_token(&customer)?;

        let transaction = self
            .gateway
            .sale(SalePayload {
                amount: amount.with_tax(owner.tax_percentage()),
                payment_method_token: token.to_string(),
                submit_for_settlement: true,
                recurring: true,
                order_id: options.order_id,
                custom_fields: options.custom_fields,
            })
            .await?
            .into_result("Braintree was unable to perform a charge")?;

        tracing::info!(
            billable_id = %owner.billable_id(),
            transaction_id = %transaction.id,
            amount = %transaction.amount,
            "Charged customer"
        );

        Ok(transaction)
    }

    /// Charge with a `description` custom field, shown on the invoice
    pub async fn invoice_for<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        description: &str,
        amount: Money,
        mut options: ChargeOptions,
    ) -> BillingResult<Transaction> {
        options
            .custom_fields
            .insert("description".to_string(), description.to_string());
        self.charge(owner, amount, options).await
    }

    // =========================================================================
    // Customer and payment method
    // =========================================================================

    /// Create the processor customer and remember its payment method
    pub async fn create_as_customer<E: BillableEntity + ?Sized>(
        &self,
        owner: &mut E,
        token: Option<&str>,
        options: CustomerOptions,
    ) -> BillingResult<GatewayCustomer> {
        let (first_name, last_name) = split_name(owner.display_name());

        let payload = CustomerPayload {
            first_name: options.first_name.or(first_name),
            last_name: options.last_name.or(last_name),
            email: options.email.or_else(|| owner.email().map(str::to_string)),
            company: options.company,
            phone: options.phone,
            payment_method_nonce: token.map(str::to_string),
            verify_card: true,
        };

        let customer = self
            .gateway
            .create_customer(payload)
            .await?
            .into_result("Unable to create Braintree customer")?;

        let details = owner.customer_mut();
        details.braintree_id = Some(customer.id.clone());
        remember_payment_method(details, customer.default_payment_method());
        self.store
            .save_customer_details(owner.billable_id(), owner.customer())
            .await?;

        tracing::info!(
            billable_id = %owner.billable_id(),
            customer_id = %customer.id,
            "Created Braintree customer"
        );

        Ok(customer)
    }

    /// Vault a new default card and move every active subscription onto it
    pub async fn update_card<E: BillableEntity + ?Sized>(
        &self,
        owner: &mut E,
        token: &str,
    ) -> BillingResult<PaymentMethod> {
        let customer = self.as_customer(owner).await?;

        let method = self
            .gateway
            .create_payment_method(PaymentMethodPayload {
                customer_id: customer.id.clone(),
                payment_method_nonce: token.to_string(),
                make_default: true,
                verify_card: true,
            })
            .await?
            .into_result("Braintree was unable to create a payment method")?;

        remember_payment_method(owner.customer_mut(), Some(&method));
        self.store
            .save_customer_details(owner.billable_id(), owner.customer())
            .await?;

        self.update_subscriptions_to_payment_method(owner, method.token())
            .await?;

        tracing::info!(
            billable_id = %owner.billable_id(),
            customer_id = %customer.id,
            "Updated default payment method"
        );

        Ok(method)
    }

    async fn update_subscriptions_to_payment_method<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        token: &str,
    ) -> BillingResult<()> {
        for subscription in self.subscriptions(owner).await? {
            if !subscription.active(self.clock()) {
                continue;
            }

            self.gateway
                .update_subscription(
                    &subscription.braintree_id,
                    SubscriptionUpdate {
                        payment_method_token: Some(token.to_string()),
                        ..Default::default()
                    },
                )
                .await?
                .into_result("Braintree failed to update the subscription payment method")?;
        }
        Ok(())
    }

    pub fn has_braintree_id<E: BillableEntity + ?Sized>(&self, owner: &E) -> bool {
        owner.customer().braintree_id.is_some()
    }

    pub async fn as_customer<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
    ) -> BillingResult<GatewayCustomer> {
        let id = owner.customer().braintree_id.as_deref().ok_or_else(|| {
            BillingError::InvalidArgument(format!(
                "Billable entity {} is not a Braintree customer yet.",
                owner.billable_id()
            ))
        })?;
        self.gateway.find_customer(id).await
    }

    /// Start an entity-level trial not tied to a subscription
    pub async fn start_generic_trial<E: BillableEntity + ?Sized>(
        &self,
        owner: &mut E,
        trial_end_at: OffsetDateTime,
    ) -> BillingResult<()> {
        owner.customer_mut().trial_end_at = Some(trial_end_at);
        self.store
            .save_customer_details(owner.billable_id(), owner.customer())
            .await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn new_subscription<'a, E: BillableEntity + ?Sized>(
        &'a self,
        owner: &'a mut E,
        name: &str,
        plan_id: &str,
    ) -> SubscriptionBuilder<'a, E> {
        SubscriptionBuilder::new(self, owner, name, plan_id)
    }

    /// Latest subscription with the given name
    pub async fn subscription<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        name: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.store
            .find_for_user_by_name(owner.billable_id(), name)
            .await
    }

    /// All subscriptions, newest first
    pub async fn subscriptions<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
    ) -> BillingResult<Vec<Subscription>> {
        self.store.list_for_user(owner.billable_id()).await
    }

    /// Whether the named subscription is valid (and on `plan`, when given)
    pub async fn subscribed<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        name: &str,
        plan: Option<&str>,
    ) -> BillingResult<bool> {
        let Some(subscription) = self.subscription(owner, name).await? else {
            return Ok(false);
        };
        Ok(subscription.valid(self.clock())
            && plan.map_or(true, |plan| subscription.is_on_plan(plan)))
    }

    /// Whether the named subscription is on trial (and on `plan`, when given)
    pub async fn on_trial<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        name: &str,
        plan: Option<&str>,
    ) -> BillingResult<bool> {
        let Some(subscription) = self.subscription(owner, name).await? else {
            return Ok(false);
        };
        Ok(subscription.on_trial(self.clock())
            && plan.map_or(true, |plan| subscription.is_on_plan(plan)))
    }

    /// Generic trial, or a trial on the default subscription
    pub async fn on_any_trial<E: BillableEntity + ?Sized>(&self, owner: &E) -> BillingResult<bool> {
        if self.on_generic_trial(owner) {
            return Ok(true);
        }
        self.on_trial(owner, crate::models::DEFAULT_SUBSCRIPTION, None)
            .await
    }

    pub fn on_generic_trial<E: BillableEntity + ?Sized>(&self, owner: &E) -> bool {
        owner
            .customer()
            .trial_end_at
            .map(|trial_end| self.clock.now() < trial_end)
            .unwrap_or(false)
    }

    /// Whether the named subscription is valid and on one of `plans`
    pub async fn subscribed_to_plan<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        plans: &[&str],
        name: &str,
    ) -> BillingResult<bool> {
        let Some(subscription) = self.subscription(owner, name).await? else {
            return Ok(false);
        };
        if !subscription.valid(self.clock()) {
            return Ok(false);
        }
        Ok(plans.iter().any(|plan| subscription.is_on_plan(plan)))
    }

    /// Whether any subscription row references `plan`, valid or not
    pub async fn on_plan<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        plan: &str,
    ) -> BillingResult<bool> {
        Ok(self
            .store
            .find_for_user_by_plan(owner.billable_id(), plan)
            .await?
            .is_some())
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Transactions of the last two years; settled only unless `include_pending`
    pub async fn invoices<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        include_pending: bool,
    ) -> BillingResult<Vec<Invoice>> {
        let customer = self.as_customer(owner).await?;
        let now = self.clock.now();
        let today = now.date();
        let tomorrow = today.next_day().unwrap_or(today);

        let search = TransactionSearch {
            customer_id: customer.id,
            created_from: years_before(today, 2)
                .with_time(Time::MIDNIGHT)
                .assume_offset(now.offset()),
            created_to: tomorrow.with_time(Time::MIDNIGHT).assume_offset(now.offset()),
        };

        let invoices = self
            .gateway
            .search_transactions(search)
            .await?
            .into_iter()
            .filter(|t| include_pending || t.status == TransactionStatus::Settled)
            .map(Invoice::new)
            .collect();

        Ok(invoices)
    }

    pub async fn invoices_including_pending<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
    ) -> BillingResult<Vec<Invoice>> {
        self.invoices(owner, true).await
    }

    /// `None` when the lookup fails or the transaction belongs to someone else
    pub async fn find_invoice<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        id: &str,
    ) -> Option<Invoice> {
        let transaction = match self.gateway.find_transaction(id).await {
            Ok(transaction) => transaction,
            Err(e) => {
                tracing::debug!(transaction_id = %id, error = %e, "Invoice lookup failed");
                return None;
            }
        };

        if owner.customer().braintree_id.as_deref() != Some(transaction.customer_id.as_str()) {
            return None;
        }

        Some(Invoice::new(transaction))
    }

    pub async fn find_invoice_or_fail<E: BillableEntity + ?Sized>(
        &self,
        owner: &E,
        id: &str,
    ) -> BillingResult<Invoice> {
        self.find_invoice(owner, id)
            .await
            .ok_or_else(|| BillingError::NotFound("The requested invoice does not exist.".to_string()))
    }
}

/// Token of the customer's default payment method
pub(crate) fn default_token(customer: &GatewayCustomer) -> BillingResult<&str> {
    customer
        .default_payment_method()
        .map(PaymentMethod::token)
        .ok_or_else(|| {
            BillingError::InvalidArgument(format!(
                "Braintree customer {} has no payment method on file.",
                customer.id
            ))
        })
}

/// "Taylor Otwell" -> ("Taylor", "Otwell")
fn split_name(name: &str) -> (Option<String>, Option<String>) {
    let mut parts = name.split(' ').filter(|p| !p.is_empty());
    (
        parts.next().map(str::to_string),
        parts.next().map(str::to_string),
    )
}

fn remember_payment_method(details: &mut CustomerDetails, method: Option<&PaymentMethod>) {
    match method {
        Some(PaymentMethod::PaypalAccount { email, .. }) => {
            details.paypal_email = Some(email.clone());
            details.card_brand = None;
            details.card_last_four = None;
        }
        Some(PaymentMethod::CreditCard {
            card_type, last4, ..
        }) => {
            details.paypal_email = None;
            details.card_brand = Some(card_type.clone());
            details.card_last_four = Some(last4.clone());
        }
        None => {
            details.paypal_email = None;
            details.card_brand = None;
            details.card_last_four = None;
        }
    }
}

/// Same calendar day `years` earlier; Feb 29 falls back to Feb 28
fn years_before(date: Date, years: i32) -> Date {
    let year = date.year() - years;
    date.replace_year(year)
        .or_else(|_| {
            date.previous_day()
                .unwrap_or(date)
                .replace_year(year)
        })
        .unwrap_or(date - Duration::days(365 * i64::from(years)))
}
