//! In-memory payment processor
//!
//! Follows Braintree's sandbox behavior closely enough for the billing
//! services to be exercised end to end: test nonces, catalog discounts,
//! billing periods that end the day before the next billing date, cycle
//! caps and the validation errors the real processor returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use cashier_shared::Clock;
use time::{Date, Duration, Month};

use super::{
    BillingCycleCap, CustomerGateway, CustomerPayload, Discount, DiscountChanges, GatewayCustomer,
    GatewayResponse, GatewaySubscription, GatewaySubscriptionStatus, Modification, PaymentMethod,
    PaymentMethodPayload, PlanCatalog, SalePayload, SubscriptionGateway, SubscriptionPayload,
    SubscriptionUpdate, Transaction, TransactionGateway, TransactionSearch, TransactionStatus,
    TrialDurationUnit,
};
use crate::error::{BillingError, BillingResult};
use crate::money::Money;
use crate::plans::Plan;

/// Nonce that vaults a Visa ending in 1881
pub const NONCE_VALID_VISA: &str = "fake-valid-nonce";
/// Nonce that vaults a MasterCard ending in 4444
pub const NONCE_VALID_MASTERCARD: &str = "fake-valid-mastercard-nonce";
/// Nonce that vaults a PayPal billing agreement
pub const NONCE_PAYPAL: &str = "fake-paypal-billing-agreement-nonce";
/// Nonce the processor declines
pub const NONCE_DECLINED: &str = "fake-processor-declined-visa-nonce";

const PAYPAL_SANDBOX_EMAIL: &str = "jane.doe@example.com";

/// Mutating calls received, for asserting that a code path stayed local
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCalls {
    pub creates: usize,
    pub updates: usize,
    pub cancels: usize,
}

#[derive(Default)]
struct SandboxState {
    plans: Vec<Plan>,
    catalog_discounts: HashMap<String, Money>,
    customers: HashMap<String, GatewayCustomer>,
    token_owners: HashMap<String, String>,
    subscriptions: HashMap<String, GatewaySubscription>,
    transactions: Vec<Transaction>,
    next_id: u64,
}

impl SandboxState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:06}", prefix, self.next_id)
    }

    fn vault(&mut self, nonce: &str) -> Result<PaymentMethod, String> {
        let token = self.next_id("tok");
        match nonce {
            NONCE_VALID_VISA => Ok(PaymentMethod::CreditCard {
                token,
                card_type: "Visa".to_string(),
                last4: "1881".to_string(),
            }),
            NONCE_VALID_MASTERCARD => Ok(PaymentMethod::CreditCard {
                token,
                card_type: "MasterCard".to_string(),
                last4: "4444".to_string(),
            }),
            NONCE_PAYPAL => Ok(PaymentMethod::PaypalAccount {
                token,
                email: PAYPAL_SANDBOX_EMAIL.to_string(),
            }),
            NONCE_DECLINED => Err("Do Not Honor".to_string()),
            _ => Err("Unknown or expired payment_method_nonce.".to_string()),
        }
    }

    /// Apply removals then additions to `discounts`
    fn apply_discounts(
        &self,
        discounts: &mut Vec<Discount>,
        changes: &DiscountChanges,
    ) -> Result<(), String> {
        discounts.retain(|d| !changes.remove.contains(&d.id));

        for addition in &changes.add {
            let default_amount = self
                .catalog_discounts
                .get(&addition.inherited_from_id)
                .copied()
                .ok_or_else(|| "Inherited From ID is invalid.".to_string())?;

            if discounts.iter().any(|d| d.id == addition.inherited_from_id) {
                return Err("Cannot add a duplicate add-on or discount.".to_string());
            }

            let amount = addition.amount.unwrap_or(default_amount);
            if !amount.is_positive() {
                return Err("Amount must be greater than zero.".to_string());
            }
            if addition.number_of_billing_cycles == Some(0) {
                return Err("Number Of Billing Cycles must be greater than zero.".to_string());
            }

            discounts.push(Discount {
                id: addition.inherited_from_id.clone(),
                amount,
                number_of_billing_cycles: addition.number_of_billing_cycles,
            });
        }

        Ok(())
    }
}

/// In-memory processor sharing the services' clock
pub struct SandboxGateway {
    clock: Arc<dyn Clock>,
    state: RwLock<SandboxState>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    cancels: AtomicUsize,
}

impl SandboxGateway {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(SandboxState::default()),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Catalog used by the sandbox account: two $10 monthly plans, a $100
    /// yearly plan, a $5 coupon and the `plan-credit` discount
    pub fn with_default_catalog(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock)
            .with_plan(Plan::monthly("monthly-10-1", Money::from_major(10)))
            .with_plan(Plan::monthly("monthly-10-2", Money::from_major(10)))
            .with_plan(Plan::yearly("yearly-100-1", Money::from_major(100)))
            .with_discount("coupon-1", Money::from_major(5))
            .with_discount(crate::proration::PLAN_CREDIT_DISCOUNT_ID, Money::from_major(1))
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        self.write().plans.push(plan);
        self
    }

    /// Register a catalog discount that subscriptions can inherit from
    pub fn with_discount(self, id: &str, amount: Money) -> Self {
        self.write().catalog_discounts.insert(id.to_string(), amount);
        self
    }

    /// Move a transaction to `settled`, as the nightly settlement batch would
    pub fn settle_transaction(&self, id: &str) -> BillingResult<()> {
        let mut state = self.write();
        let transaction = state
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| BillingError::NotFound(format!("Transaction {} not found", id)))?;
        transaction.status = TransactionStatus::Settled;
        Ok(())
    }

    pub fn calls(&self) -> GatewayCalls {
        GatewayCalls {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            cancels: self.cancels.load(Ordering::SeqCst),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SandboxState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SandboxState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Same day `months` later, clamped to the end of shorter months
pub(crate) fn add_months(date: Date, months: u32) -> BillingResult<Date> {
    let index = i64::from(date.year()) * 12 + i64::from(u8::from(date.month()) - 1) + i64::from(months);
    let year = i32::try_from(index.div_euclid(12))
        .map_err(|_| BillingError::Internal("Billing date out of range".to_string()))?;
    let month = Month::try_from(index.rem_euclid(12) as u8 + 1)
        .map_err(|e| BillingError::Internal(format!("Invalid billing month: {}", e)))?;
    let day = date.day().min(time::util::days_in_year_month(year, month));

    Date::from_calendar_date(year, month, day)
        .map_err(|e| BillingError::Internal(format!("Invalid billing date: {}", e)))
}

/// Billing period that starts on `start` and lasts `months`
fn billing_period(start: Date, months: u8) -> BillingResult<(Date, Date)> {
    let next_billing_date = add_months(start, u32::from(months))?;
    let end = next_billing_date
        .previous_day()
        .ok_or_else(|| BillingError::Internal("Billing date out of range".to_string()))?;
    Ok((end, next_billing_date))
}

#[async_trait]
impl SubscriptionGateway for SandboxGateway {
    async fn create_subscription(
        &self,
        payload: SubscriptionPayload,
    ) -> BillingResult<GatewayResponse<GatewaySubscription>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        let today = now.date();
        let mut state = self.write();

        let Some(plan) = state.plans.iter().find(|p| p.id == payload.plan_id).cloned() else {
            return Ok(GatewayResponse::failure("Plan ID is invalid."));
        };
        let Some(customer_id) = state.token_owners.get(&payload.payment_method_token).cloned()
        else {
            return Ok(GatewayResponse::failure("Payment method token is invalid."));
        };

        let mut discounts = Vec::new();
        if let Err(message) = state.apply_discounts(&mut discounts, &payload.discounts) {
            return Ok(GatewayResponse::failure(message));
        }

        let on_trial = payload.trial_period && payload.trial_duration > 0;
        let first_billing_date = if !on_trial {
            today
        } else {
            match payload.trial_duration_unit {
                TrialDurationUnit::Day => today + Duration::days(i64::from(payload.trial_duration)),
                TrialDurationUnit::Month => add_months(today, payload.trial_duration)?,
            }
        };
        let (period_end, next_billing_date) =
            billing_period(first_billing_date, plan.billing_frequency.as_months())?;

        let id = state.next_id("sub");
        let subscription = GatewaySubscription {
            id: id.clone(),
            plan_id: plan.id.clone(),
            price: payload.price,
            status: GatewaySubscriptionStatus::Active,
            payment_method_token: payload.payment_method_token.clone(),
            discounts,
            current_billing_cycle: if on_trial { 0 } else { 1 },
            number_of_billing_cycles: None,
            trial_period: on_trial,
            trial_duration_days: if on_trial {
                (first_billing_date - today).whole_days() as u32
            } else {
                0
            },
            first_billing_date,
            billing_period_start_date: first_billing_date,
            billing_period_end_date: period_end,
            next_billing_date,
        };

        if !on_trial {
            let discount_total: Money = subscription.discounts.iter().map(|d| d.amount).sum();
            let transaction_id = state.next_id("txn");
            state.transactions.push(Transaction {
                id: transaction_id,
                customer_id,
                subscription_id: Some(id.clone()),
                amount: (subscription.price - discount_total).non_negative(),
                status: TransactionStatus::SubmittedForSettlement,
                created_at: now,
                add_ons: Vec::new(),
                discounts: subscription
                    .discounts
                    .iter()
                    .map(|d| Modification {
                        id: d.id.clone(),
                        amount: d.amount,
                    })
                    .collect(),
                custom_fields: BTreeMap::new(),
            });
        }

        state.subscriptions.insert(id, subscription.clone());
        Ok(GatewayResponse::Success(subscription))
    }

    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> BillingResult<GatewayResponse<GatewaySubscription>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write();

        let mut subscription = state
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Subscription {} not found", id)))?;

        if subscription.status == GatewaySubscriptionStatus::Canceled {
            return Ok(GatewayResponse::failure(
                "Subscription has been canceled and cannot be updated.",
            ));
        }

        if let Some(plan_id) = update.plan_id {
            let Some(plan) = state.plans.iter().find(|p| p.id == plan_id) else {
                return Ok(GatewayResponse::failure("Plan ID is invalid."));
            };
            if plan.billing_frequency.as_months()
                != state
                    .plans
                    .iter()
                    .find(|p| p.id == subscription.plan_id)
                    .map(|p| p.billing_frequency.as_months())
                    .unwrap_or(plan.billing_frequency.as_months())
            {
                return Ok(GatewayResponse::failure(
                    "Cannot update subscription to a plan with a different billing frequency.",
                ));
            }
            subscription.plan_id = plan_id;
        }

        if let Some(price) = update.price {
            subscription.price = price;
        }

        match update.billing_cycles {
            Some(BillingCycleCap::NeverExpires) => subscription.number_of_billing_cycles = None,
            Some(BillingCycleCap::Cycles(cycles)) => {
                if cycles < subscription.current_billing_cycle {
                    return Ok(GatewayResponse::failure(
                        "Number Of Billing Cycles cannot be less than the current billing cycle.",
                    ));
                }
                subscription.number_of_billing_cycles = Some(cycles);
            }
            None => {}
        }

        if let Some(token) = update.payment_method_token {
            if !state.token_owners.contains_key(&token) {
                return Ok(GatewayResponse::failure("Payment method token is invalid."));
            }
            subscription.payment_method_token = token;
        }

        if let Some(changes) = update.discounts {
            if let Err(message) = state.apply_discounts(&mut subscription.discounts, &changes) {
                return Ok(GatewayResponse::failure(message));
            }
        }

        state
            .subscriptions
            .insert(id.to_string(), subscription.clone());
        Ok(GatewayResponse::Success(subscription))
    }

    async fn find_subscription(&self, id: &str) -> BillingResult<GatewaySubscription> {
        self.read()
            .subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Subscription {} not found", id)))
    }

    async fn cancel_subscription(&self, id: &str) -> BillingResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write();

        let subscription = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| BillingError::NotFound(format!("Subscription {} not found", id)))?;

        if subscription.status == GatewaySubscriptionStatus::Canceled {
            return Err(BillingError::rejection(
                "Braintree failed to cancel subscription",
                "Subscription has already been canceled.",
            ));
        }

        subscription.status = GatewaySubscriptionStatus::Canceled;
        Ok(())
    }
}

#[async_trait]
impl PlanCatalog for SandboxGateway {
    async fn all_plans(&self) -> BillingResult<Vec<Plan>> {
        Ok(self.read().plans.clone())
    }
}

#[async_trait]
impl CustomerGateway for SandboxGateway {
    async fn create_customer(
        &self,
        payload: CustomerPayload,
    ) -> BillingResult<GatewayResponse<GatewayCustomer>> {
        let mut state = self.write();

        let mut payment_methods = Vec::new();
        if let Some(nonce) = payload.payment_method_nonce.as_deref() {
            match state.vault(nonce) {
                Ok(method) => payment_methods.push(method),
                Err(message) => return Ok(GatewayResponse::failure(message)),
            }
        }

        let id = state.next_id("cus");
        for method in &payment_methods {
            state
                .token_owners
                .insert(method.token().to_string(), id.clone());
        }

        let customer = GatewayCustomer {
            id: id.clone(),
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            payment_methods,
        };
        state.customers.insert(id, customer.clone());

        Ok(GatewayResponse::Success(customer))
    }

    async fn find_customer(&self, id: &str) -> BillingResult<GatewayCustomer> {
        self.read()
            .customers
            .get(id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Customer {} not found", id)))
    }

    async fn create_payment_method(
        &self,
        payload: PaymentMethodPayload,
    ) -> BillingResult<GatewayResponse<PaymentMethod>> {
        let mut state = self.write();

        if !state.customers.contains_key(&payload.customer_id) {
            return Ok(GatewayResponse::failure("Customer ID is invalid."));
        }

        let method = match state.vault(&payload.payment_method_nonce) {
            Ok(method) => method,
            Err(message) => return Ok(GatewayResponse::failure(message)),
        };

        state
            .token_owners
            .insert(method.token().to_string(), payload.customer_id.clone());

        if let Some(customer) = state.customers.get_mut(&payload.customer_id) {
            if payload.make_default {
                customer.payment_methods.insert(0, method.clone());
            } else {
                customer.payment_methods.push(method.clone());
            }
        }

        Ok(GatewayResponse::Success(method))
    }
}

#[async_trait]
impl TransactionGateway for SandboxGateway {
    async fn sale(&self, payload: SalePayload) -> BillingResult<GatewayResponse<Transaction>> {
        let now = self.clock.now();
        let mut state = self.write();

        let Some(customer_id) = state.token_owners.get(&payload.payment_method_token).cloned()
        else {
            return Ok(GatewayResponse::failure("Payment method token is invalid."));
        };
        if !payload.amount.is_positive() {
            return Ok(GatewayResponse::failure("Amount must be greater than zero."));
        }

        let transaction = Transaction {
            id: state.next_id("txn"),
            customer_id,
            subscription_id: None,
            amount: payload.amount,
            status: if payload.submit_for_settlement {
                TransactionStatus::SubmittedForSettlement
            } else {
                TransactionStatus::Authorized
            },
            created_at: now,
            add_ons: Vec::new(),
            discounts: Vec::new(),
            custom_fields: payload.custom_fields,
        };
        state.transactions.push(transaction.clone());

        Ok(GatewayResponse::Success(transaction))
    }

    async fn find_transaction(&self, id: &str) -> BillingResult<Transaction> {
        self.read()
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Transaction {} not found", id)))
    }

    async fn search_transactions(
        &self,
        search: TransactionSearch,
    ) -> BillingResult<Vec<Transaction>> {
        // Newest first; later inserts win ties
        let mut found: Vec<Transaction> = self
            .read()
            .transactions
            .iter()
            .rev()
            .filter(|t| search.matches(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
