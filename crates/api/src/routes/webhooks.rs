//! Braintree webhook endpoint

use axum::{extract::State, http::StatusCode, Form};
use serde::Deserialize;

use crate::{error::ApiResult, state::AppState};

/// Braintree posts both fields form encoded; either may be missing on junk requests
#[derive(Debug, Default, Deserialize)]
pub struct WebhookForm {
    #[serde(default)]
    pub bt_signature: String,
    #[serde(default)]
    pub bt_payload: String,
}

/// Always 200 once the notification is parsed or rejected, so Braintree stops retrying.
/// Store failures surface as 500 and are retried.
pub async fn braintree_webhook(
    State(state): State<AppState>,
    Form(form): Form<WebhookForm>,
) -> ApiResult<StatusCode> {
    let outcome = state
        .webhooks
        .receive(&form.bt_signature, &form.bt_payload)
        .await?;

    tracing::debug!(outcome = ?outcome, "Webhook processed");
    Ok(StatusCode::OK)
}
