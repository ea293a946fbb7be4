//! Configuration validation.
//!
//! Checks a loaded [`WabridgeConfig`] for values that parse but cannot work:
//! unknown environment names, malformed webhook or sidecar URLs, missing
//! webhook for the active environment.

use crate::schema::{Environment, WabridgeConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "webhook.prod_url"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Validate a loaded config.
#[must_use]
pub fn validate(config: &WabridgeConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if Environment::parse(&config.webhook.environment).is_none() {
        result.push(
            Severity::Error,
            "webhook.environment",
            format!(
                "unknown environment \"{}\" (expected \"test\" or \"prod\")",
                config.webhook.environment
            ),
        );
    }

    for (path, value) in [
        ("webhook.test_url", config.webhook.test_url.as_deref()),
        ("webhook.prod_url", config.webhook.prod_url.as_deref()),
    ] {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        match url::Url::parse(value) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {},
            Ok(u) => result.push(
                Severity::Error,
                path,
                format!("webhook URL must use http or https, got \"{}\"", u.scheme()),
            ),
            Err(e) => result.push(Severity::Error, path, format!("invalid URL: {e}")),
        }
    }

    if config.webhook.active_url().is_none() {
        result.push(
            Severity::Warning,
            "webhook",
            format!(
                "no webhook URL for environment \"{}\"; inbound messages will be dropped",
                config.webhook.environment()
            ),
        );
    }

    match url::Url::parse(&config.whatsapp.sidecar_url) {
        Ok(u) if matches!(u.scheme(), "ws" | "wss") => {},
        Ok(_) => result.push(
            Severity::Error,
            "whatsapp.sidecar_url",
            "sidecar URL must use ws:// or wss://",
        ),
        Err(e) => result.push(
            Severity::Error,
            "whatsapp.sidecar_url",
            format!("invalid URL: {e}"),
        ),
    }

    if config.deletion.pacing_ms == 0 {
        result.push(
            Severity::Warning,
            "deletion.pacing_ms",
            "pacing disabled; bulk deletions may be rate limited by WhatsApp",
        );
    }

    if config.server.port == 0 {
        result.push(
            Severity::Info,
            "server.port",
            "port 0 binds a random free port",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> WabridgeConfig {
        let mut cfg = WabridgeConfig::default();
        cfg.webhook.test_url = Some("https://n8n.local/webhook-test/wa".into());
        cfg
    }

    #[test]
    fn configured_defaults_are_clean() {
        let result = validate(&configured());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_environment_is_error() {
        let mut cfg = configured();
        cfg.webhook.environment = "staging".into();
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "webhook.environment")
        );
    }

    #[test]
    fn malformed_webhook_url_is_error() {
        let mut cfg = configured();
        cfg.webhook.prod_url = Some("not a url".into());
        assert!(validate(&cfg).has_errors());

        cfg.webhook.prod_url = Some("ftp://files.example/wa".into());
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn missing_active_webhook_is_warning() {
        let result = validate(&WabridgeConfig::default());
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn http_sidecar_url_is_error() {
        let mut cfg = configured();
        cfg.whatsapp.sidecar_url = "http://127.0.0.1:3101".into();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn zero_pacing_is_warning() {
        let mut cfg = configured();
        cfg.deletion.pacing_ms = 0;
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }
}
