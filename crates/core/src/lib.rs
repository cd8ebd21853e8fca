//! Shared building blocks for the extension telemetry service: error types and
//! TOML configuration.

pub mod config;
pub mod error;
