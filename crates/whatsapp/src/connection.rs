//! WhatsApp Web session backed by the Baileys sidecar.
//!
//! A supervisor task owns the sidecar socket (and optionally the sidecar
//! process). It walks the session through [`ConnectionState`]:
//! `Connecting` until the sidecar reports `connected`, back to `Disconnected`
//! on a recoverable close followed by an automatic reconnect, or into the
//! terminal `AuthFailed` when WhatsApp rejects the credentials.
//!
//! Send and delete requests are correlated with their replies by request id
//! and bounded by the configured request timeout.

use std::{
    sync::{Arc, RwLock as StdRwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    tokio::{
        sync::{Notify, RwLock, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use {
    wabridge_channels::{
        ConnectionState, Error, InboundMessage, MessageKey, MessagingConnection, Result,
        SentMessage,
    },
    wabridge_config::WhatsAppConfig,
};

use crate::{
    process::{SidecarConfig, SidecarProcess, port_from_url, start_sidecar},
    sidecar::{MessageCallback, SidecarHandle, connect_with_retry},
    types::{AUTH_REJECTED_STATUS, GatewayMessage, SidecarMessage},
};

const CONNECT_ATTEMPTS: u32 = 10;
const QR_IMAGE_SERVICE: &str = "https://api.qrserver.com/v1/create-qr-code/?size=200x200&data=";

/// Link that renders `qr` as an image, for operators without a terminal QR.
#[must_use]
pub fn qr_image_link(qr: &str) -> String {
    format!("{QR_IMAGE_SERVICE}{}", urlencoding::encode(qr))
}

/// Shared handle to the WhatsApp session.
#[derive(Clone)]
pub struct WhatsAppConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: WhatsAppConfig,
    state: StdRwLock<ConnectionState>,
    qr_code: StdRwLock<Option<String>>,
    sidecar: RwLock<Option<SidecarHandle>>,
    pending: DashMap<String, oneshot::Sender<SidecarMessage>>,
    inbound: mpsc::Sender<InboundMessage>,
    reconnect: Notify,
    auth_failed: Notify,
    cancel: CancellationToken,
}

impl WhatsAppConnection {
    /// Create the session handle and the receiver inbound messages arrive on.
    /// Nothing connects until [`start`](Self::start) is called.
    pub fn new(config: WhatsAppConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let inner = Inner {
            config,
            state: StdRwLock::new(ConnectionState::Disconnected),
            qr_code: StdRwLock::new(None),
            sidecar: RwLock::new(None),
            pending: DashMap::new(),
            inbound,
            reconnect: Notify::new(),
            auth_failed: Notify::new(),
            cancel: CancellationToken::new(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            inbound_rx,
        )
    }

    /// Spawn the supervisor task.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.supervise())
    }

    /// Stop the supervisor and the sidecar process it started, if any.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Pairing QR payload while waiting for a scan.
    pub fn qr_code(&self) -> Option<String> {
        self.inner
            .qr_code
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn request(
        &self,
        operation: &'static str,
        build: impl FnOnce(String) -> GatewayMessage,
    ) -> Result<SidecarMessage> {
        if !self.is_ready() {
            return Err(Error::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request_id.clone(), tx);

        let handle = self.inner.sidecar.read().await.clone();
        let sent = match handle {
            Some(handle) => handle.send(build(request_id.clone())).await,
            None => Err(Error::NotConnected),
        };
        if let Err(e) = sent {
            self.inner.pending.remove(&request_id);
            return Err(e);
        }

        let timeout = self.inner.config.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::rejected("whatsapp sidecar connection lost")),
            Err(_) => {
                self.inner.pending.remove(&request_id);
                warn!(operation, %request_id, "whatsapp sidecar did not answer in time");
                Err(Error::timeout(operation, timeout))
            },
        }
    }
}

#[async_trait]
impl MessagingConnection for WhatsAppConnection {
    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage> {
        let reply = self
            .request("send_text", |request_id| GatewayMessage::SendText {
                request_id,
                to: to.to_string(),
                text: text.to_string(),
            })
            .await?;

        match reply {
            SidecarMessage::SendResult {
                success: true,
                message_id: Some(id),
                chat_id,
                timestamp,
                ..
            } => {
                let mut sent = SentMessage::now(id, chat_id.unwrap_or_else(|| to.to_string()));
                if let Some(ts) = timestamp {
                    sent.timestamp = ts;
                }
                debug!(to, message_id = %sent.id, "message sent");
                Ok(sent)
            },
            SidecarMessage::SendResult { success: true, .. } => {
                Err(Error::rejected("whatsapp returned no message id"))
            },
            SidecarMessage::SendResult { error, .. } => Err(Error::rejected(
                error.unwrap_or_else(|| "send failed".to_string()),
            )),
            other => Err(Error::rejected(format!(
                "unexpected sidecar reply to send: {other:?}"
            ))),
        }
    }

    async fn delete_message(&self, chat_id: &str, key: &MessageKey) -> Result<()> {
        let reply = self
            .request("delete_message", |request_id| {
                GatewayMessage::DeleteMessage {
                    request_id,
                    chat_id: chat_id.to_string(),
                    key: key.clone(),
                }
            })
            .await?;

        match reply {
            SidecarMessage::DeleteResult { success: true, .. } => {
                debug!(chat_id, message_id = %key.id, "message deleted");
                Ok(())
            },
            SidecarMessage::DeleteResult { error, .. } => Err(Error::rejected(
                error.unwrap_or_else(|| "delete failed".to_string()),
            )),
            other => Err(Error::rejected(format!(
                "unexpected sidecar reply to delete: {other:?}"
            ))),
        }
    }

    fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!(from = state.label(), to = next.label(), "whatsapp state change");
            *state = next;
        }
    }

    /// Drop every waiting request; their callers see a lost connection.
    fn fail_pending(&self) {
        self.pending.clear();
    }

    fn handle_sidecar_message(&self, msg: SidecarMessage) {
        match msg {
            SidecarMessage::Qr { qr } => {
                info!("whatsapp QR code received, scan it from Linked devices in the app");
                info!(link = %qr_image_link(&qr), "QR code image");
                debug!(qr = %qr, "whatsapp QR payload");
                *self.qr_code.write().unwrap_or_else(|e| e.into_inner()) = Some(qr);
            },
            SidecarMessage::Connected { phone_number } => {
                info!(?phone_number, "whatsapp connected");
                *self.qr_code.write().unwrap_or_else(|e| e.into_inner()) = None;
                self.set_state(ConnectionState::Connected { phone_number });
            },
            SidecarMessage::Disconnected {
                reason,
                status_code,
            } => {
                if status_code == Some(AUTH_REJECTED_STATUS) {
                    error!(?reason, "whatsapp rejected the session, not reconnecting");
                    self.set_state(ConnectionState::AuthFailed);
                    self.auth_failed.notify_one();
                } else {
                    warn!(?reason, ?status_code, "whatsapp connection closed, reconnecting");
                    self.set_state(ConnectionState::Disconnected);
                    self.reconnect.notify_one();
                }
            },
            SidecarMessage::LoggedOut => {
                warn!("whatsapp session logged out");
                self.set_state(ConnectionState::AuthFailed);
                self.auth_failed.notify_one();
            },
            SidecarMessage::InboundMessage {
                message_id,
                chat_jid,
                from_me,
                body,
                timestamp,
                ..
            } => {
                debug!(from = %chat_jid, %message_id, "received inbound message");
                let message = InboundMessage {
                    message_id,
                    from: chat_jid,
                    text: body,
                    from_me,
                    timestamp,
                };
                match self.inbound.try_send(message) {
                    Ok(()) => {},
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        warn!(message_id = %dropped.message_id, "inbound queue full, dropping message");
                    },
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("inbound queue closed");
                    },
                }
            },
            reply @ (SidecarMessage::SendResult { .. } | SidecarMessage::DeleteResult { .. }) => {
                let Some(request_id) = reply.request_id().map(str::to_owned) else {
                    return;
                };
                match self.pending.remove(&request_id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(reply);
                    },
                    None => debug!(%request_id, "reply for unknown or expired request"),
                }
            },
            SidecarMessage::Error { error } => {
                warn!(%error, "whatsapp sidecar error");
            },
        }
    }

    async fn supervise(self: Arc<Self>) {
        let delay = self.config.reconnect_delay();
        let mut process: Option<SidecarProcess> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.current_state() == ConnectionState::AuthFailed {
                error!(
                    auth_dir = %self.config.auth_dir.display(),
                    "whatsapp authentication rejected; remove the auth directory and restart to pair again"
                );
                self.cancel.cancelled().await;
                break;
            }

            if let Err(e) = self.ensure_process(&mut process).await {
                warn!(error = %e, "failed to start whatsapp sidecar");
                if self.pause(delay).await {
                    break;
                }
                continue;
            }

            self.set_state(ConnectionState::Connecting);
            let callback: MessageCallback = {
                let inner = Arc::clone(&self);
                Arc::new(move |msg| inner.handle_sidecar_message(msg))
            };
            let (handle, mut closed) =
                match connect_with_retry(&self.config.sidecar_url, callback, CONNECT_ATTEMPTS).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "whatsapp sidecar unreachable");
                        self.set_state(ConnectionState::Disconnected);
                        if self.pause(delay).await {
                            break;
                        }
                        continue;
                    },
                };
            *self.sidecar.write().await = Some(handle.clone());
            self.send_connect(&handle).await;

            let cancelled = loop {
                tokio::select! {
                    () = self.cancel.cancelled() => break true,
                    () = self.auth_failed.notified() => break false,
                    _ = &mut closed => {
                        warn!("lost connection to whatsapp sidecar");
                        break false;
                    },
                    () = self.reconnect.notified() => {
                        if self.pause(delay).await {
                            break true;
                        }
                        if self.current_state() != ConnectionState::AuthFailed {
                            info!("reconnecting whatsapp session");
                            self.set_state(ConnectionState::Connecting);
                            self.send_connect(&handle).await;
                        }
                    },
                }
            };

            *self.sidecar.write().await = None;
            drop(handle);
            self.fail_pending();
            if self.current_state() != ConnectionState::AuthFailed {
                self.set_state(ConnectionState::Disconnected);
            }
            if cancelled || self.pause(delay).await {
                break;
            }
        }

        if let Some(mut process) = process
            && let Err(e) = process.stop().await
        {
            warn!(error = %e, "failed to stop whatsapp sidecar");
        }
        info!("whatsapp supervisor stopped");
    }

    async fn ensure_process(
        &self,
        process: &mut Option<SidecarProcess>,
    ) -> wabridge_common::Result<()> {
        let Some(sidecar_dir) = self.config.sidecar_dir.as_ref() else {
            return Ok(());
        };
        if let Some(running) = process.as_mut() {
            if running.is_running() {
                return Ok(());
            }
            warn!("whatsapp sidecar process died, restarting");
        }

        let config = SidecarConfig {
            sidecar_dir: sidecar_dir.clone(),
            entry: self.config.sidecar_entry.clone(),
            port: port_from_url(&self.config.sidecar_url)?,
            auth_dir: self.config.auth_dir.clone(),
        };
        *process = Some(start_sidecar(&config).await?);
        Ok(())
    }

    async fn send_connect(&self, handle: &SidecarHandle) {
        let msg = GatewayMessage::Connect {
            auth_dir: self.config.auth_dir.display().to_string(),
        };
        if let Err(e) = handle.send(msg).await {
            warn!(error = %e, "failed to ask sidecar to connect");
        }
    }

    /// Sleep for `delay`. Returns `true` if shutdown was requested meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => true,
            () = tokio::time::sleep(delay) => false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (WhatsAppConnection, mpsc::Receiver<InboundMessage>) {
        WhatsAppConnection::new(WhatsAppConfig::default())
    }

    fn connected(conn: &WhatsAppConnection) {
        conn.inner
            .handle_sidecar_message(SidecarMessage::Connected {
                phone_number: Some("15550001111".into()),
            });
    }

    #[test]
    fn starts_disconnected() {
        let (conn, _rx) = connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_ready());
    }

    #[test]
    fn qr_is_stored_until_connected() {
        let (conn, _rx) = connection();
        conn.inner
            .handle_sidecar_message(SidecarMessage::Qr { qr: "2@abc".into() });
        assert_eq!(conn.qr_code().as_deref(), Some("2@abc"));

        connected(&conn);
        assert!(conn.is_ready());
        assert!(conn.qr_code().is_none());
    }

    #[tokio::test]
    async fn recoverable_disconnect_requests_reconnect() {
        let (conn, _rx) = connection();
        connected(&conn);
        conn.inner
            .handle_sidecar_message(SidecarMessage::Disconnected {
                reason: Some("connection lost".into()),
                status_code: Some(428),
            });

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let notified =
            tokio::time::timeout(Duration::from_millis(100), conn.inner.reconnect.notified())
                .await;
        assert!(notified.is_ok());
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let (conn, _rx) = connection();
        connected(&conn);
        conn.inner
            .handle_sidecar_message(SidecarMessage::Disconnected {
                reason: None,
                status_code: Some(AUTH_REJECTED_STATUS),
            });
        assert_eq!(conn.state(), ConnectionState::AuthFailed);

        let (conn, _rx) = connection();
        conn.inner.handle_sidecar_message(SidecarMessage::LoggedOut);
        assert_eq!(conn.state(), ConnectionState::AuthFailed);
    }

    #[tokio::test]
    async fn auth_rejection_wakes_supervisor() {
        let (conn, _rx) = connection();
        connected(&conn);
        conn.inner
            .handle_sidecar_message(SidecarMessage::Disconnected {
                reason: Some("logged out".into()),
                status_code: Some(AUTH_REJECTED_STATUS),
            });
        let woken =
            tokio::time::timeout(Duration::from_millis(100), conn.inner.auth_failed.notified())
                .await;
        assert!(woken.is_ok());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), conn.inner.reconnect.notified())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn inbound_messages_reach_receiver() {
        let (conn, mut rx) = connection();
        conn.inner
            .handle_sidecar_message(SidecarMessage::InboundMessage {
                message_id: "IN1".into(),
                chat_jid: "222@s.whatsapp.net".into(),
                sender_jid: None,
                from_me: false,
                body: Some("ping".into()),
                timestamp: Some(1_700_000_000),
            });

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.from, "222@s.whatsapp.net");
        assert_eq!(msg.text.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn reply_resolves_pending_request() {
        let (conn, _rx) = connection();
        let (tx, rx) = oneshot::channel();
        conn.inner.pending.insert("r1".into(), tx);

        conn.inner
            .handle_sidecar_message(SidecarMessage::DeleteResult {
                request_id: "r1".into(),
                success: true,
                error: None,
            });

        assert!(matches!(
            rx.await.unwrap(),
            SidecarMessage::DeleteResult { success: true, .. }
        ));
        assert!(conn.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn requests_fail_fast_when_not_ready() {
        let (conn, _rx) = connection();
        let err = conn.send_text("111@s.whatsapp.net", "hi").await.unwrap_err();
        assert!(err.is_not_connected());
        let err = conn
            .delete_message("111@s.whatsapp.net", &MessageKey::own("111@s.whatsapp.net", "A"))
            .await
            .unwrap_err();
        assert!(err.is_not_connected());
        assert!(conn.inner.pending.is_empty());
    }

    #[test]
    fn qr_link_is_url_encoded() {
        assert_eq!(
            qr_image_link("2@a+b/c"),
            "https://api.qrserver.com/v1/create-qr-code/?size=200x200&data=2%40a%2Bb%2Fc"
        );
    }
}
