//! Braintree account configuration

use std::fmt;
use std::str::FromStr;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraintreeEnvironment {
    Development,
    Qa,
    Sandbox,
    Production,
}

impl BraintreeEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            BraintreeEnvironment::Development => "development",
            BraintreeEnvironment::Qa => "qa",
            BraintreeEnvironment::Sandbox => "sandbox",
            BraintreeEnvironment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        *self == BraintreeEnvironment::Production
    }
}

impl fmt::Display for BraintreeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BraintreeEnvironment {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(BraintreeEnvironment::Development),
            "qa" => Ok(BraintreeEnvironment::Qa),
            "sandbox" => Ok(BraintreeEnvironment::Sandbox),
            "production" => Ok(BraintreeEnvironment::Production),
            other => Err(BillingError::Config(format!(
                "Unknown Braintree environment: {}",
                other
            ))),
        }
    }
}

/// Merchant credentials
#[derive(Clone)]
pub struct BraintreeConfig {
    pub environment: BraintreeEnvironment,
    pub merchant_id: String,
    pub public_key: String,
    pub private_key: String,
}

// Keeps the private key out of logs
impl fmt::Debug for BraintreeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BraintreeConfig")
            .field("environment", &self.environment)
            .field("merchant_id", &self.merchant_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

impl BraintreeConfig {
    /// Read `BRAINTREE_ENVIRONMENT`, `BRAINTREE_MERCHANT_ID`,
    /// `BRAINTREE_PUBLIC_KEY` and `BRAINTREE_PRIVATE_KEY`
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| BillingError::Config(format!("{} not set", key)))
        };

        let environment: BraintreeEnvironment = require("BRAINTREE_ENVIRONMENT")?.parse()?;

        Ok(Self {
            environment,
            merchant_id: require("BRAINTREE_MERCHANT_ID")?,
            public_key: require("BRAINTREE_PUBLIC_KEY")?,
            private_key: require("BRAINTREE_PRIVATE_KEY")?,
        })
    }
}
