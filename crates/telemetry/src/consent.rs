//! Consent sources: the editor setting and the companion CLI's own opt-in.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use sfdx_telemetry_core::config::{CliConfig, EditorTelemetrySettings};
use sfdx_telemetry_core::error::{Result, TelemetryError};

/// Environment variable the CLI honours to switch its telemetry off.
pub const DISABLE_TELEMETRY_ENV: &str = "SFDX_DISABLE_TELEMETRY";

/// Host configuration reader.
pub trait HostSettings: Send + Sync {
    /// Value of the `telemetry.enabled` setting under the extension namespace.
    fn telemetry_enabled(&self) -> bool;
}

impl HostSettings for EditorTelemetrySettings {
    fn telemetry_enabled(&self) -> bool {
        self.enabled
    }
}

/// The companion CLI tool's telemetry opt-in.
#[async_trait]
pub trait CliConsent: Send + Sync {
    /// Whether the CLI currently allows telemetry.
    async fn is_telemetry_allowed(&self) -> Result<bool>;

    /// Switch CLI telemetry off. Fire-and-forget.
    fn disable_telemetry(&self);
}

/// [`CliConsent`] backed by the `sfdx` executable's global config.
#[derive(Debug, Clone)]
pub struct SfdxCliConsent {
    executable: String,
}

impl SfdxCliConsent {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn from_config(config: &CliConfig) -> Self {
        Self::new(config.executable.clone())
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }
}

#[async_trait]
impl CliConsent for SfdxCliConsent {
    async fn is_telemetry_allowed(&self) -> Result<bool> {
        if disabled_by_env(std::env::var(DISABLE_TELEMETRY_ENV).ok().as_deref()) {
            debug!(env = DISABLE_TELEMETRY_ENV, "CLI telemetry disabled by environment");
            return Ok(false);
        }

        let output = tokio::process::Command::new(&self.executable)
            .args(["force:config:get", "disableTelemetry", "--json"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;

        parse_config_get_output(&String::from_utf8_lossy(&output.stdout))
    }

    fn disable_telemetry(&self) {
        let mut command = std::process::Command::new(&self.executable);
        command
            .args(["force:config:set", "disableTelemetry=true", "--global"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Inside a runtime the child is reaped by a task; otherwise by a thread.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut child = match tokio::process::Command::from(command).spawn() {
                    Ok(child) => child,
                    Err(err) => return self.log_spawn_failure(&err),
                };
                handle.spawn(async move { log_disable_outcome(child.wait().await) });
            }
            Err(_) => {
                let mut child = match command.spawn() {
                    Ok(child) => child,
                    Err(err) => return self.log_spawn_failure(&err),
                };
                std::thread::spawn(move || log_disable_outcome(child.wait()));
            }
        }
    }
}

impl SfdxCliConsent {
    fn log_spawn_failure(&self, err: &std::io::Error) {
        warn!(error = %err, executable = %self.executable, "failed to run CLI to disable telemetry");
    }
}

fn log_disable_outcome(status: std::io::Result<std::process::ExitStatus>) {
    match status {
        Ok(status) if status.success() => debug!("CLI telemetry disabled"),
        Ok(status) => warn!(%status, "CLI refused to disable telemetry"),
        Err(err) => warn!(error = %err, "failed to wait for CLI"),
    }
}

#[derive(Debug, Deserialize)]
struct ConfigGetOutput {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    result: Vec<ConfigEntry>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigEntry {
    #[serde(default)]
    value: Option<serde_json::Value>,
}

/// Interpret the JSON printed by `force:config:get disableTelemetry --json`.
///
/// Telemetry is allowed unless `disableTelemetry` is set to true.
pub fn parse_config_get_output(stdout: &str) -> Result<bool> {
    let parsed: ConfigGetOutput = serde_json::from_str(stdout.trim())?;
    if parsed.status != 0 {
        return Err(TelemetryError::CliConsent(
            parsed
                .message
                .unwrap_or_else(|| format!("config:get exited with status {}", parsed.status)),
        ));
    }

    let disabled = parsed
        .result
        .first()
        .and_then(|entry| entry.value.as_ref())
        .map(is_truthy)
        .unwrap_or(false);
    Ok(!disabled)
}

fn disabled_by_env(value: Option<&str>) -> bool {
    value.map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(false)
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
