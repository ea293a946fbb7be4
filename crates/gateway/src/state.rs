use std::sync::Arc;

use wabridge_config::{Environment, WebhookConfig};

use crate::dispatch::Dispatcher;

/// State shared by every request handler.
pub struct GatewayState {
    pub version: &'static str,
    pub environment: Environment,
    /// Webhook inbound messages are forwarded to, if any.
    pub webhook_url: Option<String>,
    pub dispatcher: Dispatcher,
}

impl GatewayState {
    pub fn new(webhook: &WebhookConfig, dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION"),
            environment: webhook.environment(),
            webhook_url: webhook.active_url().map(str::to_string),
            dispatcher,
        })
    }
}
