use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

// ── Message identity ────────────────────────────────────────────────────────

/// Key that identifies a single message on the messaging network.
///
/// Serialized in the shape the WhatsApp Web client expects for a delete
/// request (`{ remoteJid, fromMe, id }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}

impl MessageKey {
    /// Key for a message this bot sent itself. Only such messages can be
    /// retracted for everyone.
    #[must_use]
    pub fn own(chat_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            remote_jid: chat_id.into(),
            from_me: true,
            id: id.into(),
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    /// Provider-assigned message id.
    pub id: String,
    /// Chat the message landed in (normalized JID).
    pub chat_id: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl SentMessage {
    /// Build a result stamped with the current time.
    #[must_use]
    pub fn now(id: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// A message received from the messaging network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    /// Chat the message arrived in.
    pub from: String,
    /// Plain or extended text body. `None` for media-only messages.
    pub text: Option<String>,
    pub from_me: bool,
    pub timestamp: Option<i64>,
}

// ── Connection state ────────────────────────────────────────────────────────

/// Lifecycle of the WhatsApp Web session.
///
/// `Disconnected` moves back to `Connecting` automatically unless the
/// disconnect was an authentication rejection, which lands in the terminal
/// `AuthFailed` state until the operator re-pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        #[serde(skip_serializing_if = "Option::is_none")]
        phone_number: Option<String>,
    },
    AuthFailed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::AuthFailed => "auth_failed",
        }
    }
}

// ── Connection trait ────────────────────────────────────────────────────────

/// A live session to the messaging network.
#[async_trait]
pub trait MessagingConnection: Send + Sync {
    /// Send a text message and return the provider-assigned id.
    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage>;

    /// Retract a message for everyone in `chat_id`.
    async fn delete_message(&self, chat_id: &str, key: &MessageKey) -> Result<()>;

    /// Current session state.
    fn state(&self) -> ConnectionState;

    /// Whether the session is connected and authenticated.
    fn is_ready(&self) -> bool {
        self.state().is_connected()
    }
}
