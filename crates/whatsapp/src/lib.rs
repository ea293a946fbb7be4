//! WhatsApp Web connection for wabridge.
//!
//! Implements [`MessagingConnection`](wabridge_channels::MessagingConnection)
//! on top of Baileys, which runs as a Node.js sidecar and is driven over a
//! local WebSocket.

pub mod connection;
pub mod process;
pub mod sidecar;
pub mod types;

pub use {
    connection::{WhatsAppConnection, qr_image_link},
    process::{SidecarConfig, SidecarProcess, start_sidecar},
    types::{AUTH_REJECTED_STATUS, GatewayMessage, SidecarMessage},
};
