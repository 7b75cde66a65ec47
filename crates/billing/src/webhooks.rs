//! Braintree webhook handling
//!
//! Notifications arrive as two form fields: `bt_payload` (base64 encoded
//! JSON) and `bt_signature`, a `&`-separated list of
//! `public_key|hex(HMAC-SHA256(private_key, bt_payload))` pairs. Only the
//! pair for our public key is checked.
//!
//! Cancellation and expiry end the local subscription immediately; every
//! other kind is acknowledged and ignored.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cashier_shared::Clock;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::client::BraintreeConfig;
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    Check,
    SubscriptionCanceled,
    SubscriptionChargedSuccessfully,
    SubscriptionChargedUnsuccessfully,
    SubscriptionExpired,
    SubscriptionTrialEnded,
    SubscriptionWentActive,
    SubscriptionWentPastDue,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubject {
    pub id: String,
}

/// Decoded notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub kind: WebhookKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<WebhookSubject>,
}

/// Form fields of a signed notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedNotification {
    pub bt_signature: String,
    pub bt_payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A handler ran for this kind
    Handled,
    /// Valid notification of a kind nobody listens to
    Ignored,
    /// Signature or payload did not check out; dropped
    Rejected,
}

/// Webhook handler for Braintree notifications
pub struct WebhookHandler {
    public_key: String,
    private_key: String,
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
}

impl WebhookHandler {
    pub fn new(config: &BraintreeConfig, store: Arc<dyn BillingStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_keys(&config.public_key, &config.private_key, store, clock)
    }

    pub fn with_keys(
        public_key: &str,
        private_key: &str,
        store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            public_key: public_key.to_string(),
            private_key: private_key.to_string(),
            store,
            clock,
        }
    }

    fn mac(&self) -> BillingResult<HmacSha256> {
        HmacSha256::new_from_slice(self.private_key.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook private key");
            BillingError::WebhookSignatureInvalid
        })
    }

    /// Check the signature pair issued for our public key
    pub fn verify(&self, signature: &str, payload: &str) -> BillingResult<()> {
        let expected = signature
            .split('&')
            .filter_map(|pair| pair.split_once('|'))
            .find(|(public_key, _)| public_key.trim() == self.public_key)
            .map(|(_, digest)| digest.trim())
            .ok_or_else(|| {
                tracing::warn!("No webhook signature for the configured public key");
                BillingError::WebhookSignatureInvalid
            })?;

        let expected = hex::decode(expected).map_err(|_| BillingError::WebhookSignatureInvalid)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| BillingError::WebhookSignatureInvalid)
    }

    /// Verify, then decode the payload
    pub fn parse(&self, signature: &str, payload: &str) -> BillingResult<WebhookNotification> {
        self.verify(signature, payload)?;

        // Braintree wraps long payloads across lines
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let json = STANDARD
            .decode(compact)
            .map_err(|e| BillingError::WebhookPayloadInvalid(format!("base64: {}", e)))?;

        serde_json::from_slice(&json)
            .map_err(|e| BillingError::WebhookPayloadInvalid(format!("json: {}", e)))
    }

    /// Dispatch a verified notification by kind
    pub async fn handle(&self, notification: &WebhookNotification) -> BillingResult<WebhookOutcome> {
        match notification.kind {
            WebhookKind::SubscriptionCanceled | WebhookKind::SubscriptionExpired => {
                let Some(subject) = &notification.subscription else {
                    return Err(BillingError::WebhookPayloadInvalid(
                        "subscription notification without subscription".to_string(),
                    ));
                };
                self.cancel_subscription(&subject.id).await?;
                Ok(WebhookOutcome::Handled)
            }
            kind => {
                tracing::debug!(kind = ?kind, "Ignoring webhook notification");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Parse and handle; notifications that fail to parse are logged and dropped
    pub async fn receive(&self, signature: &str, payload: &str) -> BillingResult<WebhookOutcome> {
        let notification = match self.parse(signature, payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping webhook notification");
                return Ok(WebhookOutcome::Rejected);
            }
        };

        tracing::info!(
            kind = ?notification.kind,
            timestamp = %notification.timestamp,
            "Received webhook notification"
        );

        match self.handle(&notification).await {
            Err(BillingError::WebhookPayloadInvalid(message)) => {
                tracing::warn!(error = %message, "Dropping webhook notification");
                Ok(WebhookOutcome::Rejected)
            }
            other => other,
        }
    }

    /// End the local subscription now unless it already ended
    ///
    /// Returns whether a row was changed. A subscription in its grace period
    /// is ended immediately.
    pub async fn cancel_subscription(&self, braintree_id: &str) -> BillingResult<bool> {
        let Some(mut subscription) = self.store.find_by_braintree_id(braintree_id).await? else {
            tracing::debug!(braintree_id = %braintree_id, "Webhook for unknown subscription");
            return Ok(false);
        };

        let clock = self.clock.as_ref();
        if subscription.cancelled() && !subscription.on_grace_period(clock) {
            return Ok(false);
        }

        let now = clock.now();
        subscription.end_at = Some(now);
        subscription.updated_at = now;
        self.store.save_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            braintree_id = %braintree_id,
            "Marked subscription cancelled from webhook"
        );

        Ok(true)
    }

    /// Signed notification as Braintree would send it, for tests and local runs
    pub fn sample_notification(
        &self,
        kind: WebhookKind,
        subscription_id: &str,
    ) -> BillingResult<SignedNotification> {
        let notification = WebhookNotification {
            kind,
            timestamp: self.clock.now(),
            subscription: Some(WebhookSubject {
                id: subscription_id.to_string(),
            }),
        };

        let json = serde_json::to_vec(&notification)
            .map_err(|e| BillingError::Internal(format!("webhook serialization: {}", e)))?;
        let payload = STANDARD.encode(json);

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());

        Ok(SignedNotification {
            bt_signature: format!("{}|{}", self.public_key, digest),
            bt_payload: payload,
        })
    }
}
