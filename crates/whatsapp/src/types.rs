//! JSON protocol spoken with the Baileys sidecar over its local WebSocket.

use {
    serde::{Deserialize, Serialize},
    wabridge_channels::MessageKey,
};

/// Disconnect status code WhatsApp uses when the linked device was rejected
/// or logged out. Reconnecting with the same credentials cannot succeed.
pub const AUTH_REJECTED_STATUS: u16 = 401;

/// Messages the gateway sends to the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Open (or reopen) the WhatsApp Web socket using the multi-file auth
    /// state in `auth_dir`.
    Connect { auth_dir: String },
    SendText {
        request_id: String,
        to: String,
        text: String,
    },
    DeleteMessage {
        request_id: String,
        chat_id: String,
        key: MessageKey,
    },
}

/// Messages the sidecar sends to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    /// Pairing QR payload, refreshed periodically until scanned.
    Qr { qr: String },
    Connected {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        status_code: Option<u16>,
    },
    LoggedOut,
    InboundMessage {
        message_id: String,
        chat_jid: String,
        #[serde(default)]
        sender_jid: Option<String>,
        #[serde(default)]
        from_me: bool,
        /// `conversation` or `extendedTextMessage.text`; absent for media.
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        error: Option<String>,
    },
    DeleteResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error { error: String },
}

impl SidecarMessage {
    /// Request id for replies to a gateway request.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::SendResult { request_id, .. } | Self::DeleteResult { request_id, .. } => {
                Some(request_id)
            },
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_request_wire_shape() {
        let msg = GatewayMessage::DeleteMessage {
            request_id: "r1".into(),
            chat_id: "111@s.whatsapp.net".into(),
            key: MessageKey::own("111@s.whatsapp.net", "ABC"),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "type": "delete_message",
                "request_id": "r1",
                "chat_id": "111@s.whatsapp.net",
                "key": { "remoteJid": "111@s.whatsapp.net", "fromMe": true, "id": "ABC" },
            })
        );
    }

    #[test]
    fn parses_minimal_sidecar_events() {
        let msg: SidecarMessage =
            serde_json::from_str(r#"{"type":"disconnected","status_code":401}"#).unwrap();
        assert_eq!(
            msg,
            SidecarMessage::Disconnected {
                reason: None,
                status_code: Some(AUTH_REJECTED_STATUS),
            }
        );

        let msg: SidecarMessage = serde_json::from_str(
            r#"{"type":"inbound_message","message_id":"X","chat_jid":"222@s.whatsapp.net"}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            SidecarMessage::InboundMessage { body: None, from_me: false, .. }
        ));
    }

    #[test]
    fn gateway_sends_only_session_and_message_commands() {
        let connect = GatewayMessage::Connect {
            auth_dir: "./auth_info_baileys".into(),
        };
        assert_eq!(
            serde_json::to_value(&connect).unwrap(),
            serde_json::json!({ "type": "connect", "auth_dir": "./auth_info_baileys" })
        );
        assert!(serde_json::from_str::<GatewayMessage>(r#"{"type":"logout"}"#).is_err());
    }

    #[test]
    fn request_id_only_on_replies() {
        let reply = SidecarMessage::DeleteResult {
            request_id: "r9".into(),
            success: true,
            error: None,
        };
        assert_eq!(reply.request_id(), Some("r9"));
        assert_eq!(SidecarMessage::LoggedOut.request_id(), None);
    }
}
