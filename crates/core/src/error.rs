//! Error types shared by the telemetry crates.

use thiserror::Error;

/// Top-level error type for telemetry setup operations.
///
/// None of these ever reach an extension caller: the service turns them into
/// a disabled reporter.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("CLI consent check failed: {0}")]
    CliConsent(String),

    #[error("reporter error: {0}")]
    Reporter(String),
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A convenience Result alias that defaults to [`TelemetryError`].
pub type Result<T> = std::result::Result<T, TelemetryError>;
