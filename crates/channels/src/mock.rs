//! In-memory [`MessagingConnection`] for tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;

use crate::{ConnectionState, Error, MessageKey, MessagingConnection, Result, SentMessage};

/// Records every call and answers from scripted outcomes.
#[derive(Default)]
pub struct MockConnection {
    ready: AtomicBool,
    next_id: AtomicU64,
    send_error: Mutex<Option<String>>,
    delete_errors: Mutex<HashMap<String, String>>,
    sent: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<(String, MessageKey)>>,
}

impl MockConnection {
    /// A connected mock.
    #[must_use]
    pub fn connected() -> Self {
        let mock = Self::default();
        mock.set_ready(true);
        mock
    }

    /// A mock whose session is down.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make every subsequent send fail with `reason`.
    pub fn fail_sends(&self, reason: impl Into<String>) {
        *self.send_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Make deletion of `message_id` fail with `reason`.
    pub fn fail_delete(&self, message_id: impl Into<String>, reason: impl Into<String>) {
        self.delete_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id.into(), reason.into());
    }

    /// `(to, text)` of every send attempt, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `(chat_id, key)` of every delete attempt, in order.
    #[must_use]
    pub fn deleted(&self) -> Vec<(String, MessageKey)> {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Total network calls made (sends plus deletes).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.sent().len() + self.deleted().len()
    }
}

#[async_trait]
impl MessagingConnection for MockConnection {
    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((to.to_string(), text.to_string()));
        if let Some(reason) = self
            .send_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(Error::rejected(reason));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SentMessage::now(format!("MSG{n}"), to))
    }

    async fn delete_message(&self, chat_id: &str, key: &MessageKey) -> Result<()> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((chat_id.to_string(), key.clone()));
        // Let concurrent callers interleave like a real network round trip.
        tokio::task::yield_now().await;
        let failure = self
            .delete_errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key.id)
            .cloned();
        match failure {
            Some(reason) => Err(Error::rejected(reason)),
            None => Ok(()),
        }
    }

    fn state(&self) -> ConnectionState {
        if self.ready.load(Ordering::SeqCst) {
            ConnectionState::Connected { phone_number: None }
        } else {
            ConnectionState::Disconnected
        }
    }
}
