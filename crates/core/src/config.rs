//! TOML-based configuration for the telemetry service.

use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extension id reported in every event's `extensionName` property.
pub const DEFAULT_EXTENSION_ID: &str = "salesforcedx-vscode-core";

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Top-level configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    /// Editor settings namespace, mirrored from the host's settings file.
    #[serde(rename = "salesforcedx-vscode-core", default)]
    pub editor: EditorSettings,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub cli: CliConfig,
}

/// Settings living under the extension's namespace in the editor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EditorSettings {
    #[serde(default)]
    pub telemetry: EditorTelemetrySettings,
}

/// `salesforcedx-vscode-core.telemetry.*`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorTelemetrySettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for EditorTelemetrySettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Remote collector settings used when the reporter is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    #[serde(default = "default_extension_id")]
    pub extension_id: String,
    #[serde(default = "default_extension_version")]
    pub extension_version: String,
    #[serde(default)]
    pub instrumentation_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            extension_id: default_extension_id(),
            extension_version: default_extension_version(),
            instrumentation_key: String::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Companion CLI tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_cli_executable")]
    pub executable: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            executable: default_cli_executable(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_extension_id() -> String {
    DEFAULT_EXTENSION_ID.into()
}

fn default_extension_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_cli_executable() -> String {
    "sfdx".into()
}

impl TelemetryConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load configuration, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::generate_default())
        }
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TelemetryError::Config(format!("failed to parse config: {e}")))
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        if self.reporter.extension_id.trim().is_empty() {
            return Err(TelemetryError::Config(
                "reporter.extension_id must not be empty".into(),
            ));
        }

        if !(self.reporter.endpoint.starts_with("https://")
            || self.reporter.endpoint.starts_with("http://"))
        {
            return Err(TelemetryError::Config(format!(
                "reporter.endpoint must be an http(s) URL: {}",
                self.reporter.endpoint
            )));
        }

        if self.reporter.timeout_secs == 0 {
            return Err(TelemetryError::Config(
                "reporter.timeout_secs must be greater than zero".into(),
            ));
        }

        if self.cli.executable.trim().is_empty() {
            return Err(TelemetryError::Config(
                "cli.executable must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        Self::default()
    }
}
