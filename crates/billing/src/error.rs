//! Billing error types

use thiserror::Error;

/// Errors raised by the billing layer
#[derive(Debug, Error)]
pub enum BillingError {
    /// The processor answered but refused the operation
    #[error("{context}: {message}")]
    GatewayRejection { context: String, message: String },

    /// The processor could not be reached or returned something unusable
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Operation not allowed in the subscription's current state
    #[error("{0}")]
    StateViolation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn rejection(context: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::GatewayRejection {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether the error means "no such record" to a caller
    pub fn is_not_found(&self) -> bool {
        matches!(self, BillingError::NotFound(_))
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
