//! Application state

use std::sync::Arc;

use cashier_billing::{BillingStore, WebhookHandler};
use cashier_shared::Clock;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn BillingStore>, clock: Arc<dyn Clock>) -> Self {
        let webhooks = Arc::new(WebhookHandler::new(&config.braintree, store, clock));
        Self { config, webhooks }
    }
}
