//! WebSocket client for the Baileys sidecar.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    wabridge_channels::{Error, Result},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Called for every message the sidecar sends. Runs on the reader task, so it
/// must not block.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

const OUTGOING_BUFFER: usize = 64;

/// Handle to an open sidecar WebSocket.
#[derive(Clone)]
pub struct SidecarHandle {
    outgoing: mpsc::Sender<GatewayMessage>,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a message for the sidecar.
    pub async fn send(&self, msg: GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.outgoing
            .send(msg)
            .await
            .map_err(|_| Error::NotConnected)
    }
}

/// Open a WebSocket to the sidecar at `url`.
///
/// The returned receiver resolves once the socket closes for any reason.
pub async fn connect(
    url: &str,
    callback: MessageCallback,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| Error::external(format!("connect to sidecar at {url}"), e))?;
    let (mut sink, mut stream) = ws.split();

    let connected = Arc::new(AtomicBool::new(true));
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<GatewayMessage>(OUTGOING_BUFFER);
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to encode sidecar message");
                    continue;
                },
            };
            if let Err(e) = sink.send(Message::text(json)).await {
                warn!(error = %e, "failed to write to sidecar");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_connected = Arc::clone(&connected);
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<SidecarMessage>(text.as_str()) {
                        Ok(msg) => callback(msg),
                        Err(e) => warn!(error = %e, "unrecognized sidecar message"),
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "sidecar closed the socket");
                    break;
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "sidecar socket error");
                    break;
                },
            }
        }
        reader_connected.store(false, Ordering::SeqCst);
        let _ = closed_tx.send(());
    });

    info!(url, "connected to whatsapp sidecar");
    Ok((
        SidecarHandle {
            outgoing: outgoing_tx,
            connected,
        },
        closed_rx,
    ))
}

/// [`connect`] with linear backoff, for sidecars that are still starting.
pub async fn connect_with_retry(
    url: &str,
    callback: MessageCallback,
    max_attempts: u32,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let mut attempt = 1;
    loop {
        match connect(url, Arc::clone(&callback)).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < max_attempts => {
                let delay = Duration::from_millis(500 * u64::from(attempt)).min(Duration::from_secs(5));
                debug!(attempt, error = %e, ?delay, "sidecar not reachable yet, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}
