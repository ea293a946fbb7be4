/// Config schema types (server, webhook, whatsapp sidecar, deletion pacing).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WabridgeConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub whatsapp: WhatsAppConfig,
    pub deletion: DeletionConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0" so automation hosts on the
    /// LAN can reach the API.
    pub bind: String,
    /// Port to listen on. Defaults to 3000.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

/// Deployment environment, selects which webhook URL inbound messages go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Test,
    Prod,
}

impl Environment {
    /// Parse an environment name. Accepts `test`, `prod` and `production`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "test" => Some(Self::Test),
            "prod" | "production" => Some(Self::Prod),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound webhook that receives inbound WhatsApp messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Active environment name ("test" or "prod").
    pub environment: String,
    /// Webhook URL used in the test environment.
    pub test_url: Option<String>,
    /// Webhook URL used in the prod environment.
    pub prod_url: Option<String>,
    /// Per-request timeout for webhook calls.
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            environment: "test".into(),
            test_url: None,
            prod_url: None,
            timeout_secs: 10,
        }
    }
}

impl WebhookConfig {
    /// The parsed environment, falling back to `Test` for unknown names.
    /// Validation reports unknown names separately.
    #[must_use]
    pub fn environment(&self) -> Environment {
        Environment::parse(&self.environment).unwrap_or(Environment::Test)
    }

    /// The webhook URL for the active environment, if one is configured.
    #[must_use]
    pub fn active_url(&self) -> Option<&str> {
        let url = match self.environment() {
            Environment::Test => self.test_url.as_deref(),
            Environment::Prod => self.prod_url.as_deref(),
        };
        url.map(str::trim).filter(|u| !u.is_empty())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Connection to the WhatsApp Web sidecar (Baileys).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// WebSocket URL the sidecar listens on.
    pub sidecar_url: String,
    /// Directory containing the sidecar code. When set, the gateway spawns
    /// and supervises the sidecar process itself.
    pub sidecar_dir: Option<PathBuf>,
    /// Entry script inside `sidecar_dir`.
    pub sidecar_entry: String,
    /// Directory the sidecar stores its multi-file auth state in.
    pub auth_dir: PathBuf,
    /// Delay before re-issuing a connect after a recoverable disconnect.
    pub reconnect_delay_ms: u64,
    /// Maximum time to wait for the sidecar to answer a send/delete request.
    pub request_timeout_secs: u64,
    /// Capacity of the inbound message queue feeding the webhook forwarder.
    pub inbound_buffer: usize,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_url: "ws://127.0.0.1:3101".into(),
            sidecar_dir: None,
            sidecar_entry: "dist/index.js".into(),
            auth_dir: PathBuf::from("./auth_info_baileys"),
            reconnect_delay_ms: 3_000,
            request_timeout_secs: 30,
            inbound_buffer: 256,
        }
    }
}

impl WhatsAppConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Bulk deletion behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Pause between consecutive deletion requests, in milliseconds.
    pub pacing_ms: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self { pacing_ms: 200 }
    }
}

impl DeletionConfig {
    #[must_use]
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}
