use std::path::{Path, PathBuf};

use {
    tracing::{debug, warn},
    wabridge_common::{Context, Result},
};

use crate::{env_subst::substitute_env, schema::WabridgeConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "wabridge.toml",
    "wabridge.yaml",
    "wabridge.yml",
    "wabridge.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<WabridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wabridge.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wabridge/wabridge.{toml,yaml,yml,json}` (user-global)
///
/// Returns `WabridgeConfig::default()` if no config file is found.
pub fn discover_and_load() -> WabridgeConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    WabridgeConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/wabridge/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wabridge").map(|d| d.config_dir().to_path_buf())
}

/// Apply the environment variables the bridge has always honoured on top of
/// the file config: `PORT`, `WABRIDGE_ENVIRONMENT` (falling back to
/// `NODE_ENV`), `WEBHOOK_URL_TEST`, `WEBHOOK_URL_PROD` and
/// `WABRIDGE_SIDECAR_URL`.
pub fn apply_env_overrides(config: &mut WabridgeConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with a custom lookup, so tests never touch
/// the process environment.
pub fn apply_env_overrides_with(
    config: &mut WabridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = lookup("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(env) = lookup("WABRIDGE_ENVIRONMENT").or_else(|| lookup("NODE_ENV")) {
        config.webhook.environment = env;
    }
    if let Some(url) = lookup("WEBHOOK_URL_TEST") {
        config.webhook.test_url = Some(url);
    }
    if let Some(url) = lookup("WEBHOOK_URL_PROD") {
        config.webhook.prod_url = Some(url);
    }
    if let Some(url) = lookup("WABRIDGE_SIDECAR_URL") {
        config.whatsapp.sidecar_url = url;
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<WabridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).context("invalid TOML config"),
        "yaml" | "yml" => serde_yaml::from_str(raw).context("invalid YAML config"),
        "json" => serde_json::from_str(raw).context("invalid JSON config"),
        _ => Err(wabridge_common::Error::message(format!(
            "unsupported config format: .{ext}"
        ))),
    }
}
