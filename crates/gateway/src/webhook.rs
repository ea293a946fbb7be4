//! Forwards inbound WhatsApp messages to the configured webhook.

use std::{sync::Arc, time::Duration};

use {
    serde::Serialize,
    tokio::{
        sync::mpsc,
        task::{JoinHandle, JoinSet},
    },
    tracing::{debug, info, warn},
};

use {
    wabridge_channels::InboundMessage,
    wabridge_config::{Environment, WebhookConfig},
};

/// Deliveries allowed in flight before the forwarder stops reading the queue.
const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("no webhook configured for the {0} environment")]
    NoWebhook(Environment),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook answered {0}")]
    Status(reqwest::StatusCode),
}

/// Body POSTed to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub from: String,
    pub text: String,
}

impl WebhookPayload {
    /// Payload for `msg`, or `None` for messages that are not forwarded:
    /// our own messages, media without text, and messages with no sender.
    #[must_use]
    pub fn from_inbound(msg: &InboundMessage) -> Option<Self> {
        if msg.from_me || msg.from.is_empty() {
            return None;
        }
        let text = msg.text.as_deref().filter(|t| !t.is_empty())?;
        Some(Self {
            from: msg.from.clone(),
            text: text.to_string(),
        })
    }
}

pub struct WebhookForwarder {
    client: reqwest::Client,
    environment: Environment,
    url: Option<String>,
    timeout: Duration,
}

impl WebhookForwarder {
    #[must_use]
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            environment: config.environment(),
            url: config.active_url().map(str::to_string),
            timeout: config.timeout(),
        }
    }

    /// Drain `inbound` on a background task until every sender is gone.
    pub fn spawn(self, inbound: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbound))
    }

    /// Deliveries run concurrently, so a slow webhook call does not hold up
    /// the messages behind it.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        match &self.url {
            Some(url) => info!(environment = %self.environment, %url, "forwarding inbound messages"),
            None => warn!(
                environment = %self.environment,
                "no webhook configured, inbound messages will be dropped"
            ),
        }

        let forwarder = Arc::new(self);
        let mut in_flight = JoinSet::new();
        while let Some(msg) = inbound.recv().await {
            let Some(payload) = WebhookPayload::from_inbound(&msg) else {
                debug!(message_id = %msg.message_id, from_me = msg.from_me, "skipping inbound message");
                continue;
            };

            while in_flight.try_join_next().is_some() {}
            if in_flight.len() >= MAX_IN_FLIGHT {
                in_flight.join_next().await;
            }
            let forwarder = Arc::clone(&forwarder);
            in_flight.spawn(async move { forwarder.deliver(payload).await });
        }

        while in_flight.join_next().await.is_some() {}
        debug!("inbound queue closed, webhook forwarder stopping");
    }

    async fn deliver(&self, payload: WebhookPayload) {
        match self.forward(&payload).await {
            Ok(()) => debug!(from = %payload.from, "inbound message forwarded"),
            Err(ForwardError::NoWebhook(_)) => {
                info!(from = %payload.from, "inbound message dropped, no webhook configured");
            },
            Err(e) => warn!(from = %payload.from, error = %e, "failed to forward inbound message"),
        }
    }

    /// POST one payload to the active webhook.
    pub async fn forward(&self, payload: &WebhookPayload) -> Result<(), ForwardError> {
        let Some(url) = self.url.as_deref() else {
            return Err(ForwardError::NoWebhook(self.environment));
        };
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ForwardError::Status(status))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{Json, Router, extract::State, http::StatusCode, routing::post},
    };

    fn inbound(from: &str, text: Option<&str>, from_me: bool) -> InboundMessage {
        InboundMessage {
            message_id: "IN1".into(),
            from: from.into(),
            text: text.map(str::to_string),
            from_me,
            timestamp: None,
        }
    }

    /// Webhook stub answering with `status` and reporting every body it gets.
    async fn stub_webhook(status: StatusCode) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                          Json(body): Json<serde_json::Value>| async move {
                        let _ = tx.send(body);
                        status
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), rx)
    }

    fn config(url: Option<String>) -> WebhookConfig {
        WebhookConfig {
            environment: "prod".into(),
            prod_url: url,
            ..Default::default()
        }
    }

    #[test]
    fn own_and_textless_messages_are_skipped() {
        assert!(WebhookPayload::from_inbound(&inbound("a@s.whatsapp.net", Some("hi"), true)).is_none());
        assert!(WebhookPayload::from_inbound(&inbound("a@s.whatsapp.net", None, false)).is_none());
        assert!(WebhookPayload::from_inbound(&inbound("a@s.whatsapp.net", Some(""), false)).is_none());
        assert!(WebhookPayload::from_inbound(&inbound("", Some("hi"), false)).is_none());
        assert_eq!(
            WebhookPayload::from_inbound(&inbound("a@s.whatsapp.net", Some("hi"), false)),
            Some(WebhookPayload {
                from: "a@s.whatsapp.net".into(),
                text: "hi".into(),
            })
        );
    }

    #[tokio::test]
    async fn forwards_to_active_environment() {
        let (url, mut bodies) = stub_webhook(StatusCode::OK).await;
        let forwarder = WebhookForwarder::new(&config(Some(url)));
        let (tx, rx) = mpsc::channel(8);
        let task = forwarder.spawn(rx);

        tx.send(inbound("a@s.whatsapp.net", Some("mine"), true)).await.unwrap();
        tx.send(inbound("b@s.whatsapp.net", Some("hello"), false)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let body = bodies.recv().await.unwrap();
        assert_eq!(body, serde_json::json!({ "from": "b@s.whatsapp.net", "text": "hello" }));
        assert!(bodies.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_webhook_does_not_hold_up_later_messages() {
        let (tx, mut bodies) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(tx): State<mpsc::UnboundedSender<serde_json::Value>>,
                     Json(body): Json<serde_json::Value>| async move {
                        if body["text"] == "slow" {
                            tokio::time::sleep(Duration::from_secs(3)).await;
                        }
                        let _ = tx.send(body);
                        StatusCode::OK
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let forwarder = WebhookForwarder::new(&config(Some(format!("http://{addr}/hook"))));
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let _task = forwarder.spawn(inbound_rx);
        inbound_tx.send(inbound("a@s.whatsapp.net", Some("slow"), false)).await.unwrap();
        inbound_tx.send(inbound("b@s.whatsapp.net", Some("fast"), false)).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), bodies.recv())
            .await
            .expect("later message waited on the slow webhook")
            .unwrap();
        assert_eq!(first["text"], "fast");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _bodies) = stub_webhook(StatusCode::BAD_GATEWAY).await;
        let forwarder = WebhookForwarder::new(&config(Some(url)));
        let payload = WebhookPayload {
            from: "a@s.whatsapp.net".into(),
            text: "hi".into(),
        };
        assert!(matches!(
            forwarder.forward(&payload).await,
            Err(ForwardError::Status(StatusCode::BAD_GATEWAY))
        ));
    }

    #[tokio::test]
    async fn missing_webhook_drops_messages() {
        let forwarder = WebhookForwarder::new(&config(None));
        let payload = WebhookPayload {
            from: "a@s.whatsapp.net".into(),
            text: "hi".into(),
        };
        assert!(matches!(
            forwarder.forward(&payload).await,
            Err(ForwardError::NoWebhook(Environment::Prod))
        ));
    }
}
