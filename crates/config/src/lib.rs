//! Configuration loading, validation, and env substitution.
//!
//! Config files: `wabridge.toml`, `wabridge.yaml`, or `wabridge.json`
//! Searched in `./` then `~/.config/wabridge/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        DeletionConfig, Environment, ServerConfig, WabridgeConfig, WebhookConfig, WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
