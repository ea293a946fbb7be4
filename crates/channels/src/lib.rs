//! Messaging connection contract.
//!
//! The gateway never talks to WhatsApp directly. It holds an
//! `Arc<dyn MessagingConnection>` that can send text, retract one of its own
//! messages, and report whether the session is authenticated. Inbound
//! messages flow the other way over an mpsc channel of [`InboundMessage`].

pub mod connection;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use {
    connection::{ConnectionState, InboundMessage, MessageKey, MessagingConnection, SentMessage},
    error::{Error, Result},
};
