//! Payment processor contract
//!
//! Everything the billing layer needs from Braintree, expressed as traits so
//! that the host application supplies the transport. Calls that Braintree
//! answers with a `success` flag return a [`GatewayResponse`]; lookups that
//! miss return [`BillingError::NotFound`](crate::error::BillingError::NotFound).
//!
//! [`sandbox::SandboxGateway`] is an in-memory processor with the same
//! observable behavior, used by the tests and for local development.

pub mod sandbox;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::error::{BillingError, BillingResult};
use crate::money::Money;
use crate::plans::Plan;

pub use sandbox::SandboxGateway;

/// Outcome of a processor call that can be refused
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse<T> {
    Success(T),
    Failure { message: String },
}

impl<T> GatewayResponse<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        GatewayResponse::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GatewayResponse::Success(_))
    }

    /// Turn a refusal into a `GatewayRejection` carrying `context`
    pub fn into_result(self, context: &str) -> BillingResult<T> {
        match self {
            GatewayResponse::Success(value) => Ok(value),
            GatewayResponse::Failure { message } => Err(BillingError::rejection(context, message)),
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewaySubscriptionStatus {
    Active,
    Canceled,
    Expired,
    PastDue,
    Pending,
}

/// A discount line attached to a gateway subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,
    pub amount: Money,
    /// Remaining cycles the discount applies to; `None` never expires
    pub number_of_billing_cycles: Option<u32>,
}

impl Discount {
    /// Total value still to be granted; unbounded for never-expiring discounts
    pub fn remaining_value(&self) -> Option<Money> {
        self.number_of_billing_cycles
            .map(|cycles| self.amount * i64::from(cycles))
    }
}

/// Subscription as the processor reports it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub plan_id: String,
    pub price: Money,
    pub status: GatewaySubscriptionStatus,
    pub payment_method_token: String,
    pub discounts: Vec<Discount>,
    pub current_billing_cycle: u32,
    /// Cycle cap; `None` means the subscription never expires
    pub number_of_billing_cycles: Option<u32>,
    pub trial_period: bool,
    pub trial_duration_days: u32,
    pub first_billing_date: Date,
    pub billing_period_start_date: Date,
    pub billing_period_end_date: Date,
    pub next_billing_date: Date,
}

impl GatewaySubscription {
    pub fn never_expires(&self) -> bool {
        self.number_of_billing_cycles.is_none()
    }

    pub fn discount_ids(&self) -> Vec<String> {
        self.discounts.iter().map(|d| d.id.clone()).collect()
    }
}

/// A discount to add, inheriting defaults from a catalog discount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountAddition {
    pub inherited_from_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_billing_cycles: Option<u32>,
}

impl DiscountAddition {
    /// Use the catalog discount as defined (coupons)
    pub fn inherited(id: impl Into<String>) -> Self {
        Self {
            inherited_from_id: id.into(),
            amount: None,
            number_of_billing_cycles: None,
        }
    }

    /// Override amount and cycle count of a catalog discount
    pub fn with_overrides(id: impl Into<String>, amount: Money, cycles: u32) -> Self {
        Self {
            inherited_from_id: id.into(),
            amount: Some(amount),
            number_of_billing_cycles: Some(cycles),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscountChanges {
    pub add: Vec<DiscountAddition>,
    pub remove: Vec<String>,
}

impl DiscountChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Cycle cap written on update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycleCap {
    NeverExpires,
    Cycles(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialDurationUnit {
    #[default]
    Day,
    Month,
}

/// Payload for creating a subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionPayload {
    pub plan_id: String,
    pub price: Money,
    pub payment_method_token: String,
    pub trial_period: bool,
    pub trial_duration: u32,
    pub trial_duration_unit: TrialDurationUnit,
    pub discounts: DiscountChanges,
}

/// Partial update of a subscription; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionUpdate {
    pub plan_id: Option<String>,
    pub price: Option<Money>,
    pub billing_cycles: Option<BillingCycleCap>,
    pub prorate_charges: Option<bool>,
    pub payment_method_token: Option<String>,
    pub discounts: Option<DiscountChanges>,
}

#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    async fn create_subscription(
        &self,
        payload: SubscriptionPayload,
    ) -> BillingResult<GatewayResponse<GatewaySubscription>>;

    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> BillingResult<GatewayResponse<GatewaySubscription>>;

    async fn find_subscription(&self, id: &str) -> BillingResult<GatewaySubscription>;

    async fn cancel_subscription(&self, id: &str) -> BillingResult<()>;
}

#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn all_plans(&self) -> BillingResult<Vec<Plan>>;
}

// =============================================================================
// Customers and payment methods
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard {
        token: String,
        card_type: String,
        last4: String,
    },
    PaypalAccount {
        token: String,
        email: String,
    },
}

impl PaymentMethod {
    pub fn token(&self) -> &str {
        match self {
            PaymentMethod::CreditCard { token, .. } => token,
            PaymentMethod::PaypalAccount { token, .. } => token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    /// Default payment method first
    pub payment_methods: Vec<PaymentMethod>,
}

impl GatewayCustomer {
    pub fn default_payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_methods.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomerPayload {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub payment_method_nonce: Option<String>,
    pub verify_card: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethodPayload {
    pub customer_id: String,
    pub payment_method_nonce: String,
    pub make_default: bool,
    pub verify_card: bool,
}

#[async_trait]
pub trait CustomerGateway: Send + Sync {
    async fn create_customer(
        &self,
        payload: CustomerPayload,
    ) -> BillingResult<GatewayResponse<GatewayCustomer>>;

    async fn find_customer(&self, id: &str) -> BillingResult<GatewayCustomer>;

    async fn create_payment_method(
        &self,
        payload: PaymentMethodPayload,
    ) -> BillingResult<GatewayResponse<PaymentMethod>>;
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Authorized,
    SubmittedForSettlement,
    Settling,
    Settled,
    Voided,
    ProcessorDeclined,
    Failed,
}

/// An add-on or discount line on a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_at: OffsetDateTime,
    pub add_ons: Vec<Modification>,
    pub discounts: Vec<Modification>,
    pub custom_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalePayload {
    pub amount: Money,
    pub payment_method_token: String,
    pub submit_for_settlement: bool,
    pub recurring: bool,
    pub order_id: Option<String>,
    pub custom_fields: BTreeMap<String, String>,
}

/// Transaction search criteria; bounds are inclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSearch {
    pub customer_id: String,
    pub created_from: OffsetDateTime,
    pub created_to: OffsetDateTime,
}

impl TransactionSearch {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        transaction.customer_id == self.customer_id
            && transaction.created_at >= self.created_from
            && transaction.created_at <= self.created_to
    }
}

#[async_trait]
pub trait TransactionGateway: Send + Sync {
    async fn sale(&self, payload: SalePayload) -> BillingResult<GatewayResponse<Transaction>>;

    async fn find_transaction(&self, id: &str) -> BillingResult<Transaction>;

    async fn search_transactions(
        &self,
        search: TransactionSearch,
    ) -> BillingResult<Vec<Transaction>>;
}

/// The full processor surface used by the billing services
pub trait PaymentGateway:
    SubscriptionGateway + PlanCatalog + CustomerGateway + TransactionGateway
{
}

impl<T> PaymentGateway for T where
    T: SubscriptionGateway + PlanCatalog + CustomerGateway + TransactionGateway
{
}
