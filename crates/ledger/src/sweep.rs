//! Bulk deletion of tracked messages.
//!
//! A sweep walks one chat's backlog oldest first, retracts each message,
//! pauses between attempts, and reports every outcome. Individual failures
//! never stop a sweep. Once at least one retraction in a chat succeeds, the
//! whole backlog the sweep started from is dropped from the ledger, failed
//! entries included.
//!
//! Sweeps of the same chat are serialized by a per-chat lock, and a sweep only
//! drops the records it read at the start, so a message sent to the chat while
//! a sweep is running stays tracked for the next one.

use std::{collections::HashSet, sync::Arc};

use {
    dashmap::DashMap,
    serde::Serialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use wabridge_channels::{MessageKey, MessagingConnection};

use crate::{ledger::SentLedger, pacing::Pacer};

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Checked once before a sweep starts; nothing was attempted.
    #[error("whatsapp is not connected")]
    NotConnected,
}

/// Outcome of one retraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOutcome {
    pub message_id: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of sweeping one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSweepReport {
    pub chat_id: String,
    /// Messages attempted.
    pub total: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    /// Whether the chat's backlog was dropped from the ledger.
    pub cleared: bool,
    pub results: Vec<MessageOutcome>,
}

impl ChatSweepReport {
    fn empty(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            total: 0,
            deleted_count: 0,
            failed_count: 0,
            cleared: false,
            results: Vec::new(),
        }
    }

    /// Nothing was tracked, nothing was attempted.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.total == 0
    }

    /// Outcomes that failed, with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = &MessageOutcome> {
        self.results.iter().filter(|r| !r.deleted)
    }
}

/// Totals across every chat swept by [`BulkDeleter::delete_all_everywhere`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub total_chats: usize,
    pub total_attempted: usize,
    pub total_deleted: usize,
    pub total_failed: usize,
    pub chats: Vec<ChatSweepReport>,
}

impl SweepSummary {
    fn push(&mut self, report: ChatSweepReport) {
        self.total_chats += 1;
        self.total_attempted += report.total;
        self.total_deleted += report.deleted_count;
        self.total_failed += report.failed_count;
        self.chats.push(report);
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.total_attempted == 0
    }
}

/// Retracts tracked messages chat by chat.
pub struct BulkDeleter {
    ledger: SentLedger,
    connection: Arc<dyn MessagingConnection>,
    pacer: Arc<dyn Pacer>,
    chat_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BulkDeleter {
    pub fn new(
        ledger: SentLedger,
        connection: Arc<dyn MessagingConnection>,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            ledger,
            connection,
            pacer,
            chat_locks: DashMap::new(),
        }
    }

    /// Retract every tracked message in `chat_id`.
    pub async fn delete_all_in_chat(&self, chat_id: &str) -> Result<ChatSweepReport, SweepError> {
        self.ensure_ready()?;
        Ok(self.sweep_chat(chat_id).await)
    }

    /// Retract every tracked message in every chat, one chat at a time.
    pub async fn delete_all_everywhere(&self) -> Result<SweepSummary, SweepError> {
        self.ensure_ready()?;

        let chat_ids = self.ledger.all_chat_ids();
        let mut summary = SweepSummary::default();
        if chat_ids.is_empty() {
            debug!("no tracked chats to sweep");
            return Ok(summary);
        }

        info!(chats = chat_ids.len(), "sweeping sent messages in all chats");
        for chat_id in chat_ids {
            summary.push(self.sweep_chat(&chat_id).await);
        }
        info!(
            chats = summary.total_chats,
            deleted = summary.total_deleted,
            failed = summary.total_failed,
            "finished sweeping all chats"
        );
        Ok(summary)
    }

    fn ensure_ready(&self) -> Result<(), SweepError> {
        if self.connection.is_ready() {
            Ok(())
        } else {
            Err(SweepError::NotConnected)
        }
    }

    async fn sweep_chat(&self, chat_id: &str) -> ChatSweepReport {
        let lock = self.chat_lock(chat_id);
        let report = {
            let _guard = lock.lock().await;
            self.sweep_locked(chat_id).await
        };
        drop(lock);
        self.chat_locks
            .remove_if(chat_id, |_, lock| Arc::strong_count(lock) == 1);
        report
    }

    async fn sweep_locked(&self, chat_id: &str) -> ChatSweepReport {
        let backlog = self.ledger.list(chat_id);
        if backlog.is_empty() {
            debug!(chat_id, "no tracked messages to sweep");
            return ChatSweepReport::empty(chat_id);
        }

        info!(chat_id, total = backlog.len(), "sweeping sent messages");
        let mut report = ChatSweepReport::empty(chat_id);
        for record in &backlog {
            let key = MessageKey::own(chat_id, &record.id);
            match self.connection.delete_message(chat_id, &key).await {
                Ok(()) => {
                    report.deleted_count += 1;
                    report.results.push(MessageOutcome {
                        message_id: record.id.clone(),
                        deleted: true,
                        error: None,
                    });
                },
                Err(e) => {
                    warn!(chat_id, message_id = %record.id, error = %e, "failed to delete message");
                    report.failed_count += 1;
                    report.results.push(MessageOutcome {
                        message_id: record.id.clone(),
                        deleted: false,
                        error: Some(e.to_string()),
                    });
                },
            }
            report.total += 1;
            self.pacer.pause().await;
        }

        // One success clears the whole backlog, failures included.
        if report.deleted_count > 0 {
            let ids: HashSet<String> = backlog.into_iter().map(|r| r.id).collect();
            self.ledger.remove_all(chat_id, &ids);
            report.cleared = true;
        }

        info!(
            chat_id,
            deleted = report.deleted_count,
            failed = report.failed_count,
            cleared = report.cleared,
            "finished sweeping chat"
        );
        report
    }

    fn chat_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.chat_locks
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        super::*,
        crate::pacing::NoDelay,
        async_trait::async_trait,
        wabridge_channels::mock::MockConnection,
    };

    const CHAT: &str = "111@s.whatsapp.net";

    fn deleter(ledger: &SentLedger, conn: &Arc<MockConnection>) -> BulkDeleter {
        BulkDeleter::new(ledger.clone(), conn.clone(), Arc::new(NoDelay))
    }

    fn seed(ledger: &SentLedger, chat: &str, ids: &[&str]) {
        for (i, id) in ids.iter().enumerate() {
            ledger.record(chat, id, "hello", i as i64);
        }
    }

    #[derive(Default)]
    struct CountingPacer(AtomicUsize);

    #[async_trait]
    impl Pacer for CountingPacer {
        async fn pause(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn empty_chat_is_noop_without_network_calls() {
        let ledger = SentLedger::new();
        let conn = Arc::new(MockConnection::connected());

        let report = deleter(&ledger, &conn)
            .delete_all_in_chat(CHAT)
            .await
            .unwrap();

        assert!(report.is_noop());
        assert_eq!(report.total, 0);
        assert!(!report.cleared);
        assert_eq!(conn.call_count(), 0);
    }

    #[tokio::test]
    async fn all_succeed_clears_chat() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A", "B", "C"]);
        let conn = Arc::new(MockConnection::connected());

        let report = deleter(&ledger, &conn)
            .delete_all_in_chat(CHAT)
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.deleted_count, 3);
        assert_eq!(report.failed_count, 0);
        assert!(report.cleared);
        assert!(!ledger.all_chat_ids().contains(&CHAT.to_string()));

        let deleted = conn.deleted();
        let ids: Vec<_> = deleted.iter().map(|(_, k)| k.id.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C"]);
        assert!(deleted.iter().all(|(chat, k)| chat == CHAT && k.from_me));
    }

    #[tokio::test]
    async fn partial_failure_still_clears_chat() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A", "B", "C", "D"]);
        let conn = Arc::new(MockConnection::connected());
        conn.fail_delete("B", "message too old");
        conn.fail_delete("D", "rate limited");

        let report = deleter(&ledger, &conn)
            .delete_all_in_chat(CHAT)
            .await
            .unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.deleted_count, 2);
        assert_eq!(report.failed_count, 2);
        let failures: Vec<_> = report
            .failures()
            .map(|f| (f.message_id.as_str(), f.error.as_deref()))
            .collect();
        assert_eq!(
            failures,
            [("B", Some("message too old")), ("D", Some("rate limited"))]
        );
        assert!(report.cleared);
        assert!(ledger.list(CHAT).is_empty());
    }

    #[tokio::test]
    async fn all_failed_keeps_chat_tracked() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A", "B"]);
        let conn = Arc::new(MockConnection::connected());
        conn.fail_delete("A", "nope");
        conn.fail_delete("B", "nope");

        let report = deleter(&ledger, &conn)
            .delete_all_in_chat(CHAT)
            .await
            .unwrap();

        assert_eq!(report.failed_count, 2);
        assert!(!report.cleared);
        assert_eq!(ledger.len(CHAT), 2);
    }

    #[tokio::test]
    async fn pauses_after_every_attempt() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A", "B", "C"]);
        let conn = Arc::new(MockConnection::connected());
        conn.fail_delete("B", "nope");
        let pacer = Arc::new(CountingPacer::default());

        BulkDeleter::new(ledger.clone(), conn.clone(), pacer.clone())
            .delete_all_in_chat(CHAT)
            .await
            .unwrap();

        assert_eq!(pacer.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_connected_does_nothing() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A"]);
        let conn = Arc::new(MockConnection::disconnected());
        let deleter = deleter(&ledger, &conn);

        assert!(matches!(
            deleter.delete_all_in_chat(CHAT).await,
            Err(SweepError::NotConnected)
        ));
        assert!(matches!(
            deleter.delete_all_everywhere().await,
            Err(SweepError::NotConnected)
        ));
        assert_eq!(conn.call_count(), 0);
        assert_eq!(ledger.len(CHAT), 1);
    }

    #[tokio::test]
    async fn everywhere_sweeps_each_chat() {
        let ledger = SentLedger::new();
        seed(&ledger, "a@s.whatsapp.net", &["A1", "A2"]);
        seed(&ledger, "b@g.us", &["B1"]);
        let conn = Arc::new(MockConnection::connected());
        conn.fail_delete("A2", "nope");

        let summary = deleter(&ledger, &conn)
            .delete_all_everywhere()
            .await
            .unwrap();

        assert_eq!(summary.total_chats, 2);
        assert_eq!(summary.total_attempted, 3);
        assert_eq!(summary.total_deleted, 2);
        assert_eq!(summary.total_failed, 1);
        assert_eq!(
            summary.total_deleted,
            summary.chats.iter().map(|c| c.deleted_count).sum::<usize>()
        );
        assert!(ledger.all_chat_ids().is_empty());
    }

    #[tokio::test]
    async fn everywhere_with_nothing_tracked_is_noop() {
        let conn = Arc::new(MockConnection::connected());
        let summary = deleter(&SentLedger::new(), &conn)
            .delete_all_everywhere()
            .await
            .unwrap();
        assert!(summary.is_noop());
        assert_eq!(summary.total_chats, 0);
        assert_eq!(conn.call_count(), 0);
    }

    #[tokio::test]
    async fn lock_map_is_pruned_after_sweep() {
        let ledger = SentLedger::new();
        seed(&ledger, CHAT, &["A"]);
        let conn = Arc::new(MockConnection::connected());
        let deleter = deleter(&ledger, &conn);

        deleter.delete_all_in_chat(CHAT).await.unwrap();
        assert!(deleter.chat_locks.is_empty());
    }
}
