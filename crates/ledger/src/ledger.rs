use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, RwLock},
};

use {serde::Serialize, tracing::debug};

/// A message this bot sent during the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessageRecord {
    /// Provider-assigned message id.
    pub id: String,
    pub text: String,
    pub chat_id: String,
    /// Capture time, unix seconds.
    pub timestamp: i64,
}

/// In-memory map of chat id to the messages sent there, oldest first.
///
/// Every method takes the lock once and releases it before returning, so each
/// operation is atomic on its own. The lock is never held across an `.await`.
/// Chats with no tracked messages have no entry.
#[derive(Debug, Clone, Default)]
pub struct SentLedger {
    chats: Arc<RwLock<BTreeMap<String, Vec<SentMessageRecord>>>>,
}

impl SentLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record to `chat_id`'s sequence.
    ///
    /// Recording an id that is already tracked for the chat is a no-op.
    pub fn record(&self, chat_id: &str, id: &str, text: &str, timestamp: i64) {
        let mut chats = self.chats.write().unwrap_or_else(|e| e.into_inner());
        let records = chats.entry(chat_id.to_string()).or_default();
        if records.iter().any(|r| r.id == id) {
            debug!(chat_id, message_id = id, "message already tracked");
            return;
        }
        records.push(SentMessageRecord {
            id: id.to_string(),
            text: text.to_string(),
            chat_id: chat_id.to_string(),
            timestamp,
        });
    }

    /// Tracked messages for `chat_id`, oldest first. Empty when untracked.
    #[must_use]
    pub fn list(&self, chat_id: &str) -> Vec<SentMessageRecord> {
        let chats = self.chats.read().unwrap_or_else(|e| e.into_inner());
        chats.get(chat_id).cloned().unwrap_or_default()
    }

    /// Number of tracked messages for `chat_id`.
    #[must_use]
    pub fn len(&self, chat_id: &str) -> usize {
        let chats = self.chats.read().unwrap_or_else(|e| e.into_inner());
        chats.get(chat_id).map_or(0, Vec::len)
    }

    /// Remove one record. Returns whether it was tracked.
    pub fn remove_by_id(&self, chat_id: &str, id: &str) -> bool {
        self.remove_ids(chat_id, |candidate| candidate == id) > 0
    }

    /// Remove every record of `chat_id` whose id is in `ids`. Records added
    /// after `ids` was collected are kept. Returns how many were removed.
    pub fn remove_all(&self, chat_id: &str, ids: &HashSet<String>) -> usize {
        self.remove_ids(chat_id, |candidate| ids.contains(candidate))
    }

    /// Drop the whole sequence for `chat_id`. Returns how many records it held.
    pub fn clear(&self, chat_id: &str) -> usize {
        let mut chats = self.chats.write().unwrap_or_else(|e| e.into_inner());
        chats.remove(chat_id).map_or(0, |records| records.len())
    }

    /// Chats with at least one tracked message, sorted.
    #[must_use]
    pub fn all_chat_ids(&self) -> Vec<String> {
        let chats = self.chats.read().unwrap_or_else(|e| e.into_inner());
        chats.keys().cloned().collect()
    }

    /// Total tracked messages across all chats.
    #[must_use]
    pub fn total(&self) -> usize {
        let chats = self.chats.read().unwrap_or_else(|e| e.into_inner());
        chats.values().map(Vec::len).sum()
    }

    fn remove_ids(&self, chat_id: &str, matches: impl Fn(&str) -> bool) -> usize {
        let mut chats = self.chats.write().unwrap_or_else(|e| e.into_inner());
        let Some(records) = chats.get_mut(chat_id) else {
            return 0;
        };
        let before = records.len();
        records.retain(|r| !matches(&r.id));
        let removed = before - records.len();
        if records.is_empty() {
            chats.remove(chat_id);
        }
        removed
    }
}
