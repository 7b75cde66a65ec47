//! Plan catalog types

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::gateway::PlanCatalog;
use crate::money::Money;

/// Number of months between billing cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingFrequency(u8);

impl BillingFrequency {
    pub const MONTHLY: BillingFrequency = BillingFrequency(1);
    pub const YEARLY: BillingFrequency = BillingFrequency(12);

    pub fn months(months: u8) -> BillingResult<Self> {
        if months == 0 {
            return Err(BillingError::InvalidArgument(
                "Billing frequency must be at least one month".to_string(),
            ));
        }
        Ok(BillingFrequency(months))
    }

    pub fn as_months(self) -> u8 {
        self.0
    }

    pub fn is_monthly(self) -> bool {
        self == Self::MONTHLY
    }

    pub fn is_yearly(self) -> bool {
        self == Self::YEARLY
    }
}

impl std::fmt::Display for BillingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            1 => write!(f, "monthly"),
            12 => write!(f, "yearly"),
            n => write!(f, "every {} months", n),
        }
    }
}

/// A recurring plan as defined in the processor's control panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub billing_frequency: BillingFrequency,
}

impl Plan {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        billing_frequency: BillingFrequency,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            billing_frequency,
        }
    }

    pub fn monthly(id: impl Into<String>, price: Money) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, price, BillingFrequency::MONTHLY)
    }

    pub fn yearly(id: impl Into<String>, price: Money) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, price, BillingFrequency::YEARLY)
    }
}

/// Look a plan up by id in the processor's catalog
pub async fn find_plan<C: PlanCatalog + ?Sized>(catalog: &C, id: &str) -> BillingResult<Plan> {
    catalog
        .all_plans()
        .await?
        .into_iter()
        .find(|plan| plan.id == id)
        .ok_or_else(|| {
            BillingError::NotFound(format!("Unable to find Braintree plan with ID [{}].", id))
        })
}
