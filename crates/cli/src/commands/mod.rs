pub mod disable;
pub mod send;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use sfdx_telemetry::{HttpReporterFactory, SfdxCliConsent, TelemetryService};
use sfdx_telemetry_core::config::TelemetryConfig;
use tracing::info;

/// Load and validate the configuration file, falling back to defaults when it is absent.
pub fn load_config(config_path: &str) -> anyhow::Result<TelemetryConfig> {
    let config = TelemetryConfig::load_or_default(Path::new(config_path))?;
    config.validate()?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

/// Wire a telemetry service from configuration.
pub fn build_service(config: &TelemetryConfig) -> Arc<TelemetryService> {
    TelemetryService::new(
        config.reporter.extension_id.clone(),
        Arc::new(config.editor.telemetry.clone()),
        Arc::new(SfdxCliConsent::from_config(&config.cli)),
        Arc::new(HttpReporterFactory::new(config.reporter.clone())),
    )
}
