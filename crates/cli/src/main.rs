mod config_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use wabridge_config::{Severity, WabridgeConfig};

#[derive(Parser)]
#[command(name = "wabridge", about = "HTTP bridge for sending and retracting WhatsApp messages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value and `PORT`).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Config file to load instead of searching the default locations.
    #[arg(long, global = true, env = "WABRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config file (or defaults), then environment overrides, then CLI flags.
fn load_config(cli: &Cli) -> anyhow::Result<WabridgeConfig> {
    let mut config = match cli.config {
        Some(ref path) => wabridge_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => wabridge_config::discover_and_load(),
    };
    wabridge_config::apply_env_overrides(&mut config);

    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Gateway) => {
            info!(version = env!("CARGO_PKG_VERSION"), "wabridge starting");

            let result = wabridge_config::validate(&config);
            for d in &result.diagnostics {
                match d.severity {
                    Severity::Error => error!(path = %d.path, "{}", d.message),
                    Severity::Warning => warn!(path = %d.path, "{}", d.message),
                    Severity::Info => info!(path = %d.path, "{}", d.message),
                }
            }
            if result.has_errors() {
                anyhow::bail!(
                    "invalid configuration ({} error(s)), run `wabridge config check` for details",
                    result.count(Severity::Error)
                );
            }

            wabridge_gateway::start_gateway(config).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
    }
}
