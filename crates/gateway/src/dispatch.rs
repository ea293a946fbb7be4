//! Validated entry points for every gateway operation.
//!
//! Handlers parse the request and hand the fields to a [`Dispatcher`] method.
//! Each method validates its input first, then checks that the session is
//! ready before it touches the network or the ledger.

use std::sync::Arc;

use {
    serde::Serialize,
    tracing::{info, warn},
};

use {
    wabridge_channels::{ConnectionState, Error as ConnectionError, MessageKey, MessagingConnection},
    wabridge_ledger::{
        BulkDeleter, ChatSweepReport, Pacer, SentLedger, SentMessageRecord, SweepError,
        SweepSummary,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("whatsapp is not connected")]
    NotConnected,

    #[error("{0}")]
    SendFailed(String),

    #[error("{0}")]
    DeleteFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// Machine-readable code carried in error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotConnected => "not_connected",
            Self::SendFailed(_) => "send_failed",
            Self::DeleteFailed(_) => "delete_failed",
            Self::Internal(_) => "internal",
        }
    }

    fn required(field: &str) -> Self {
        Self::Validation(format!("{field} is required"))
    }
}

impl From<SweepError> for DispatchError {
    fn from(e: SweepError) -> Self {
        match e {
            SweepError::NotConnected => Self::NotConnected,
        }
    }
}

/// What a successful send returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    pub chat_id: String,
    pub timestamp: i64,
}

pub struct Dispatcher {
    connection: Arc<dyn MessagingConnection>,
    ledger: SentLedger,
    deleter: Arc<BulkDeleter>,
}

impl Dispatcher {
    pub fn new(
        connection: Arc<dyn MessagingConnection>,
        ledger: SentLedger,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        let deleter = BulkDeleter::new(ledger.clone(), Arc::clone(&connection), pacer);
        Self {
            connection,
            ledger,
            deleter: Arc::new(deleter),
        }
    }

    pub fn ledger(&self) -> &SentLedger {
        &self.ledger
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn ensure_ready(&self) -> Result<(), DispatchError> {
        if self.connection.is_ready() {
            Ok(())
        } else {
            Err(DispatchError::NotConnected)
        }
    }

    /// Send `text` to `to` and start tracking the message.
    pub async fn send(&self, to: &str, text: &str) -> Result<SendReceipt, DispatchError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(DispatchError::required("to"));
        }
        if text.trim().is_empty() {
            return Err(DispatchError::required("text"));
        }
        self.ensure_ready()?;

        let sent = self.connection.send_text(to, text).await.map_err(|e| {
            warn!(to, error = %e, "send failed");
            match e {
                ConnectionError::NotConnected => DispatchError::NotConnected,
                e => DispatchError::SendFailed(e.to_string()),
            }
        })?;

        let chat_id = if sent.chat_id.is_empty() {
            to.to_string()
        } else {
            sent.chat_id
        };
        self.ledger.record(&chat_id, &sent.id, text, sent.timestamp);
        info!(chat_id, message_id = %sent.id, "message sent");

        Ok(SendReceipt {
            message_id: sent.id,
            chat_id,
            timestamp: sent.timestamp,
        })
    }

    /// Retract one message. The ledger entry, if any, is dropped on success.
    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), DispatchError> {
        let chat_id = chat_id.trim();
        let message_id = message_id.trim();
        if chat_id.is_empty() {
            return Err(DispatchError::required("chatId"));
        }
        if message_id.is_empty() {
            return Err(DispatchError::required("messageId"));
        }
        self.ensure_ready()?;

        self.connection
            .delete_message(chat_id, &MessageKey::own(chat_id, message_id))
            .await
            .map_err(|e| {
                warn!(chat_id, message_id, error = %e, "delete failed");
                match e {
                    ConnectionError::NotConnected => DispatchError::NotConnected,
                    e => DispatchError::DeleteFailed(e.to_string()),
                }
            })?;

        let tracked = self.ledger.remove_by_id(chat_id, message_id);
        info!(chat_id, message_id, tracked, "message deleted");
        Ok(())
    }

    /// Messages tracked for `chat_id`. Works while disconnected.
    pub fn list_sent(&self, chat_id: &str) -> Result<Vec<SentMessageRecord>, DispatchError> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(DispatchError::required("chatId"));
        }
        Ok(self.ledger.list(chat_id))
    }

    /// Retract every tracked message in `chat_id`.
    ///
    /// The sweep runs on its own task and finishes even if the caller goes
    /// away.
    pub async fn delete_all_sent(&self, chat_id: &str) -> Result<ChatSweepReport, DispatchError> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(DispatchError::required("chatId"));
        }
        self.ensure_ready()?;

        let deleter = Arc::clone(&self.deleter);
        let chat_id = chat_id.to_string();
        let report = tokio::spawn(async move { deleter.delete_all_in_chat(&chat_id).await })
            .await
            .map_err(|e| DispatchError::Internal(format!("sweep task failed: {e}")))??;
        Ok(report)
    }

    /// Retract every tracked message in every chat.
    pub async fn delete_all_sent_everywhere(&self) -> Result<SweepSummary, DispatchError> {
        self.ensure_ready()?;

        let deleter = Arc::clone(&self.deleter);
        let summary = tokio::spawn(async move { deleter.delete_all_everywhere().await })
            .await
            .map_err(|e| DispatchError::Internal(format!("sweep task failed: {e}")))??;
        Ok(summary)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        wabridge_channels::mock::MockConnection,
        wabridge_ledger::NoDelay,
    };

    const CHAT: &str = "15551234567@s.whatsapp.net";

    fn dispatcher(mock: &Arc<MockConnection>) -> Dispatcher {
        let connection: Arc<dyn MessagingConnection> = Arc::clone(mock) as _;
        Dispatcher::new(connection, SentLedger::new(), Arc::new(NoDelay))
    }

    #[tokio::test]
    async fn send_records_exactly_one_entry() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);

        let receipt = d.send(CHAT, "hello").await.unwrap();
        assert_eq!(receipt.chat_id, CHAT);
        assert_eq!(receipt.message_id, "MSG1");

        let records = d.list_sent(CHAT).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "MSG1");
        assert_eq!(records[0].text, "hello");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_ledger_alone() {
        let mock = Arc::new(MockConnection::connected());
        mock.fail_sends("recipient not on whatsapp");
        let d = dispatcher(&mock);

        let err = d.send(CHAT, "hello").await.unwrap_err();
        assert!(matches!(err, DispatchError::SendFailed(ref r) if r.contains("not on whatsapp")));
        assert_eq!(err.code(), "send_failed");
        assert_eq!(d.ledger().total(), 0);
    }

    #[tokio::test]
    async fn validation_comes_before_connection_check() {
        let mock = Arc::new(MockConnection::disconnected());
        let d = dispatcher(&mock);

        assert!(matches!(d.send("", "x").await, Err(DispatchError::Validation(_))));
        assert!(matches!(d.send(CHAT, "  ").await, Err(DispatchError::Validation(_))));
        assert!(matches!(
            d.delete_message(CHAT, "").await,
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            d.delete_all_sent(" ").await,
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(d.list_sent(""), Err(DispatchError::Validation(_))));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn mutations_fail_fast_when_not_connected() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);
        d.send(CHAT, "one").await.unwrap();
        mock.set_ready(false);

        assert!(matches!(d.send(CHAT, "two").await, Err(DispatchError::NotConnected)));
        assert!(matches!(
            d.delete_message(CHAT, "MSG1").await,
            Err(DispatchError::NotConnected)
        ));
        assert!(matches!(
            d.delete_all_sent(CHAT).await,
            Err(DispatchError::NotConnected)
        ));
        assert!(matches!(
            d.delete_all_sent_everywhere().await,
            Err(DispatchError::NotConnected)
        ));

        assert_eq!(mock.call_count(), 1);
        assert_eq!(d.list_sent(CHAT).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_untracked_message_still_calls_network() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);

        d.delete_message(CHAT, "NOT-TRACKED").await.unwrap();
        let deleted = mock.deleted();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].1, MessageKey::own(CHAT, "NOT-TRACKED"));
    }

    #[tokio::test]
    async fn failed_delete_keeps_entry() {
        let mock = Arc::new(MockConnection::connected());
        mock.fail_delete("MSG1", "too old to delete");
        let d = dispatcher(&mock);
        d.send(CHAT, "hello").await.unwrap();

        let err = d.delete_message(CHAT, "MSG1").await.unwrap_err();
        assert_eq!(err.code(), "delete_failed");
        assert_eq!(err.to_string(), "too old to delete");
        assert_eq!(d.list_sent(CHAT).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_works_while_disconnected() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);
        d.send(CHAT, "a").await.unwrap();
        d.send(CHAT, "b").await.unwrap();
        mock.set_ready(false);

        let ids: Vec<_> = d.list_sent(CHAT).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["MSG1", "MSG2"]);
    }

    #[tokio::test]
    async fn delete_all_sent_clears_chat() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);
        for text in ["a", "b", "c"] {
            d.send(CHAT, text).await.unwrap();
        }

        let report = d.delete_all_sent(CHAT).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.deleted_count, 3);
        assert!(report.cleared);
        assert!(d.list_sent(CHAT).unwrap().is_empty());
        assert_eq!(mock.deleted().len(), 3);
    }

    #[tokio::test]
    async fn everywhere_sweeps_every_chat() {
        let mock = Arc::new(MockConnection::connected());
        let d = dispatcher(&mock);
        d.send("a@s.whatsapp.net", "1").await.unwrap();
        d.send("b@s.whatsapp.net", "2").await.unwrap();
        d.send("b@s.whatsapp.net", "3").await.unwrap();

        let summary = d.delete_all_sent_everywhere().await.unwrap();
        assert_eq!(summary.total_chats, 2);
        assert_eq!(summary.total_attempted, 3);
        assert_eq!(summary.total_deleted, 3);
        assert_eq!(d.ledger().total(), 0);
    }
}
