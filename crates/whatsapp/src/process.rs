//! Sidecar process management for the WhatsApp Baileys sidecar.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
    wabridge_common::{Context, Error, Result},
};

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
}

impl SidecarProcess {
    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the sidecar to exit, killing it after a grace period.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping whatsapp sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Some(pid) = self.child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            self.child.kill().await?;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "whatsapp sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit after SIGTERM, killing");
                self.child.kill().await?;
            },
        }
        Ok(())
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing the sidecar code.
    pub sidecar_dir: PathBuf,
    /// Entry script, relative to `sidecar_dir`.
    pub entry: String,
    /// Port the sidecar should listen on.
    pub port: u16,
    /// Directory for the multi-file auth state.
    pub auth_dir: PathBuf,
}

/// Spawn `node <entry>` in the sidecar directory and forward its output to
/// tracing.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    if !has_entry(&config.sidecar_dir, &config.entry) {
        return Err(Error::message(format!(
            "whatsapp sidecar entry not found at {}; run `npm install && npm run build` in {}",
            config.sidecar_dir.join(&config.entry).display(),
            config.sidecar_dir.display()
        )));
    }

    info!(
        path = %config.sidecar_dir.display(),
        port = config.port,
        "starting whatsapp sidecar process"
    );

    let mut child = Command::new("node")
        .arg(&config.entry)
        .current_dir(&config.sidecar_dir)
        .env("WABRIDGE_SIDECAR_PORT", config.port.to_string())
        .env("WABRIDGE_AUTH_DIR", &config.auth_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn sidecar process")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                forward_log_line(&line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "whatsapp_sidecar", "{line}");
            }
        });
    }

    // Give node a moment to fail on a bad install before reporting success.
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to check sidecar process status")?
    {
        return Err(Error::message(format!(
            "sidecar process exited immediately with status: {status}"
        )));
    }

    info!(port = config.port, "whatsapp sidecar process started");
    Ok(SidecarProcess { child })
}

/// Re-emit a sidecar stdout line, mapping pino JSON levels onto tracing.
fn forward_log_line(line: &str) {
    match parse_pino_line(line) {
        Some((level, msg)) => match level {
            0..=20 => debug!(target: "whatsapp_sidecar", "{msg}"),
            21..=30 => info!(target: "whatsapp_sidecar", "{msg}"),
            31..=40 => warn!(target: "whatsapp_sidecar", "{msg}"),
            _ => error!(target: "whatsapp_sidecar", "{msg}"),
        },
        None => info!(target: "whatsapp_sidecar", "{line}"),
    }
}

fn parse_pino_line(line: &str) -> Option<(u64, String)> {
    if !line.starts_with('{') {
        return None;
    }
    let log: serde_json::Value = serde_json::from_str(line).ok()?;
    let level = log.get("level").and_then(|v| v.as_u64()).unwrap_or(30);
    let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(line);
    Some((level, msg.to_string()))
}

/// Port to hand the sidecar, taken from the URL the gateway connects to.
pub fn port_from_url(sidecar_url: &str) -> Result<u16> {
    let parsed = url::Url::parse(sidecar_url).context("invalid sidecar URL")?;
    parsed
        .port_or_known_default()
        .with_context(|| format!("sidecar URL has no port: {sidecar_url}"))
}

/// Whether a sidecar directory looks usable.
pub fn has_entry(sidecar_dir: &Path, entry: &str) -> bool {
    sidecar_dir.join(entry).exists()
}
