//! HTTP gateway: the JSON API that sends, tracks and retracts WhatsApp
//! messages, plus the forwarder that relays inbound messages to a webhook.

pub mod dispatch;
pub mod server;
pub mod state;
pub mod webhook;

pub use {
    dispatch::{DispatchError, Dispatcher, SendReceipt},
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
    webhook::{ForwardError, WebhookForwarder, WebhookPayload},
};
