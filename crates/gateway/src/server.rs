use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    serde::Serialize,
    serde_json::{Value, json},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    wabridge_channels::MessagingConnection,
    wabridge_config::WabridgeConfig,
    wabridge_ledger::{ChatSweepReport, FixedDelay, SentLedger, SweepSummary},
    wabridge_whatsapp::WhatsAppConnection,
};

use crate::{
    dispatch::{DispatchError, Dispatcher},
    state::GatewayState,
    webhook::WebhookForwarder,
};

type AppState = Arc<GatewayState>;

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/send", post(send_handler))
        .route("/delete-message", post(delete_message_handler))
        .route("/sent-messages/{chat_id}", get(sent_messages_handler))
        .route("/delete-all-sent", post(delete_all_sent_handler))
        .route(
            "/delete-all-sent-everywhere",
            post(delete_all_sent_everywhere_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the WhatsApp session, the webhook forwarder and the HTTP server, and
/// run until Ctrl-C.
pub async fn start_gateway(config: WabridgeConfig) -> anyhow::Result<()> {
    let (whatsapp, inbound) = WhatsAppConnection::new(config.whatsapp.clone());
    let supervisor = whatsapp.start();
    let forwarder = WebhookForwarder::new(&config.webhook).spawn(inbound);

    let connection: Arc<dyn MessagingConnection> = Arc::new(whatsapp.clone());
    let pacer = Arc::new(FixedDelay(config.deletion.pacing()));
    let dispatcher = Dispatcher::new(connection, SentLedger::new(), pacer);
    let state = GatewayState::new(&config.webhook, dispatcher);
    let app = build_gateway_app(state);

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        environment = %config.webhook.environment(),
        "wabridge listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    whatsapp.shutdown();
    if let Err(e) = supervisor.await {
        warn!(error = %e, "whatsapp supervisor ended abnormally");
    }
    forwarder.abort();
    info!("wabridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Errors ───────────────────────────────────────────────────────────────────

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(json!({ "error": self.to_string(), "code": self.code() })),
        )
            .into_response()
    }
}

/// Unwrap a JSON body, answering malformed bodies with a validation error.
fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, DispatchError> {
    body.map(|Json(v)| v)
        .map_err(|e| DispatchError::Validation(format!("invalid JSON body: {}", e.body_text())))
}

fn str_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or("")
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": "wabridge",
        "version": state.version,
        "status": "running",
        "environment": state.environment.as_str(),
        "webhookUrl": state.webhook_url,
        "connection": state.dispatcher.connection_state(),
        "endpoints": {
            "POST /send": {
                "description": "Send a WhatsApp text message",
                "body": {
                    "to": "Recipient JID (e.g., 1234567890@s.whatsapp.net)",
                    "text": "Message to send",
                },
            },
            "POST /delete-message": {
                "description": "Delete one message for everyone",
                "body": { "chatId": "Chat JID", "messageId": "Id returned by /send" },
            },
            "GET /sent-messages/{chatId}": {
                "description": "List messages sent to a chat that are still tracked",
            },
            "POST /delete-all-sent": {
                "description": "Delete every tracked message in a chat",
                "body": { "chatId": "Chat JID" },
            },
            "POST /delete-all-sent-everywhere": {
                "description": "Delete every tracked message in every chat",
            },
            "GET /health": {
                "description": "Connection state and ledger size",
            },
        },
        "example": {
            "url": "POST http://localhost:3000/send",
            "body": {
                "to": "1234567890@s.whatsapp.net",
                "text": "Hello from the bot!",
            },
        },
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.dispatcher.ledger();
    Json(json!({
        "status": "ok",
        "connection": state.dispatcher.connection_state(),
        "trackedChats": ledger.all_chat_ids().len(),
        "trackedMessages": ledger.total(),
    }))
}

async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, DispatchError> {
    let body = json_body(body)?;
    let receipt = state
        .dispatcher
        .send(str_field(&body, "to"), str_field(&body, "text"))
        .await?;
    Ok(Json(json!({
        "sent": true,
        "messageId": receipt.message_id,
        "chatId": receipt.chat_id,
        "timestamp": receipt.timestamp,
    }))
    .into_response())
}

async fn delete_message_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, DispatchError> {
    let body = json_body(body)?;
    let chat_id = str_field(&body, "chatId").trim();
    let message_id = str_field(&body, "messageId").trim();
    state.dispatcher.delete_message(chat_id, message_id).await?;
    Ok(Json(json!({
        "deleted": true,
        "messageId": message_id,
        "chatId": chat_id,
    }))
    .into_response())
}

async fn sent_messages_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Response, DispatchError> {
    let records = state.dispatcher.list_sent(&chat_id)?;
    Ok(Json(json!({
        "chatId": chat_id,
        "count": records.len(),
        "sentMessages": records,
    }))
    .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSweepBody {
    deleted: bool,
    #[serde(flatten)]
    report: ChatSweepReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl From<ChatSweepReport> for ChatSweepBody {
    fn from(report: ChatSweepReport) -> Self {
        let message = if report.is_noop() {
            Some("No tracked messages to delete in this chat")
        } else if report.deleted_count == 0 {
            Some("No message could be deleted, the chat is still tracked")
        } else {
            None
        };
        Self {
            deleted: report.deleted_count > 0,
            report,
            message,
        }
    }
}

async fn delete_all_sent_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, DispatchError> {
    let body = json_body(body)?;
    let report = state
        .dispatcher
        .delete_all_sent(str_field(&body, "chatId"))
        .await?;
    Ok(Json(ChatSweepBody::from(report)).into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepSummaryBody {
    deleted: bool,
    #[serde(flatten)]
    summary: SweepSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

async fn delete_all_sent_everywhere_handler(
    State(state): State<AppState>,
) -> Result<Response, DispatchError> {
    let summary = state.dispatcher.delete_all_sent_everywhere().await?;
    let message = summary
        .is_noop()
        .then_some("No tracked messages to delete");
    Ok(Json(SweepSummaryBody {
        deleted: summary.total_deleted > 0,
        summary,
        message,
    })
    .into_response())
}
