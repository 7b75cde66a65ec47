//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cashier_billing::BillingError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Billing(err) => match err {
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::StateViolation(_) => StatusCode::CONFLICT,
                BillingError::InvalidArgument(_)
                | BillingError::WebhookSignatureInvalid
                | BillingError::WebhookPayloadInvalid(_) => StatusCode::BAD_REQUEST,
                BillingError::GatewayRejection { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::Gateway(_) => StatusCode::BAD_GATEWAY,
                BillingError::Database(_) | BillingError::Config(_) | BillingError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
