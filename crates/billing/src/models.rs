//! Local billing records

use cashier_shared::Clock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::money::Money;
use crate::plans::{BillingFrequency, Plan};

/// Subscription name used when the caller does not pick one
pub const DEFAULT_SUBSCRIPTION: &str = "default";

/// A subscription row as persisted by the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub braintree_id: String,
    pub braintree_plan: String,
    pub billing_frequency: BillingFrequency,
    pub price: Money,
    pub quantity: i32,
    pub trial_end_at: Option<OffsetDateTime>,
    /// Set once cancelled; the subscription stays usable until this instant
    pub end_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        braintree_id: impl Into<String>,
        plan: &Plan,
        price: Money,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            braintree_id: braintree_id.into(),
            braintree_plan: plan.id.clone(),
            billing_frequency: plan.billing_frequency,
            price,
            quantity: 1,
            trial_end_at: None,
            end_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active, on trial, or within the grace period
    pub fn valid(&self, clock: &dyn Clock) -> bool {
        self.active(clock) || self.on_trial(clock) || self.on_grace_period(clock)
    }

    pub fn active(&self, clock: &dyn Clock) -> bool {
        self.end_at.is_none() || self.on_grace_period(clock)
    }

    pub fn cancelled(&self) -> bool {
        self.end_at.is_some()
    }

    /// Trial end is compared against the start of today, so a trial
    /// ending today is already over
    pub fn on_trial(&self, clock: &dyn Clock) -> bool {
        self.trial_end_at
            .map(|trial_end| clock.today() < trial_end)
            .unwrap_or(false)
    }

    pub fn on_grace_period(&self, clock: &dyn Clock) -> bool {
        self.end_at
            .map(|end| clock.now() < end)
            .unwrap_or(false)
    }

    pub fn is_on_plan(&self, plan_id: &str) -> bool {
        self.braintree_plan == plan_id
    }
}

/// Processor details stored for each billable entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub braintree_id: Option<String>,
    pub paypal_email: Option<String>,
    pub card_brand: Option<String>,
    pub card_last_four: Option<String>,
    /// Entity-level trial not tied to any subscription
    pub trial_end_at: Option<OffsetDateTime>,
}

/// A host type that can be billed (usually the user)
pub trait BillableEntity: Send + Sync {
    fn billable_id(&self) -> Uuid;

    fn email(&self) -> Option<&str>;

    /// Full name; split on the first space into first and last name
    fn display_name(&self) -> &str;

    fn customer(&self) -> &CustomerDetails;

    fn customer_mut(&mut self) -> &mut CustomerDetails;

    /// Percentage added on top of every charge and subscription price
    fn tax_percentage(&self) -> f64 {
        0.0
    }
}

/// Minimal billable entity for hosts without their own user type
#[derive(Debug, Clone, PartialEq)]
pub struct BillableUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub tax_percentage: f64,
    pub details: CustomerDetails,
}

impl BillableUser {
    pub fn new(email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            tax_percentage: 0.0,
            details: CustomerDetails::default(),
        }
    }
}

impl BillableEntity for BillableUser {
    fn billable_id(&self) -> Uuid {
        self.id
    }

    fn email(&self) -> Option<&str> {
        Some(&self.email)
    }

    fn display_name(&self) -> &str {
        &self.username
    }

    fn customer(&self) -> &CustomerDetails {
        &self.details
    }

    fn customer_mut(&mut self) -> &mut CustomerDetails {
        &mut self.details
    }

    fn tax_percentage(&self) -> f64 {
        self.tax_percentage
    }
}
