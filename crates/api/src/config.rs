//! Server configuration loaded from the environment

use cashier_billing::{BillingError, BraintreeConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error(transparent)]
    Braintree(#[from] BillingError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Apply pending migrations on startup
    pub run_migrations: bool,
    pub braintree: BraintreeConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let bind_address =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let run_migrations = lookup("RUN_MIGRATIONS")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_address,
            run_migrations,
            braintree: BraintreeConfig::from_lookup(&lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BRAINTREE: [(&str, &str); 4] = [
        ("BRAINTREE_ENVIRONMENT", "sandbox"),
        ("BRAINTREE_MERCHANT_ID", "merchant"),
        ("BRAINTREE_PUBLIC_KEY", "public"),
        ("BRAINTREE_PRIVATE_KEY", "private"),
    ];

    #[test]
    fn test_defaults() {
        let mut pairs = BRAINTREE.to_vec();
        pairs.push(("DATABASE_URL", "postgres://localhost/cashier"));

        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert!(config.run_migrations);
        assert_eq!(config.braintree.merchant_id, "merchant");
    }

    #[test]
    fn test_missing_database_url() {
        let err = Config::from_lookup(env(&BRAINTREE)).unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL not set");
    }

    #[test]
    fn test_missing_braintree_key() {
        let err = Config::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/cashier"),
            ("RUN_MIGRATIONS", "false"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Braintree(_)));
    }
}
