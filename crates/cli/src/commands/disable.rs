use sfdx_telemetry::{CliConsent, SfdxCliConsent};

use super::load_config;

/// Run the `disable` command: switch the companion CLI's telemetry off.
pub fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    SfdxCliConsent::from_config(&config.cli).disable_telemetry();
    println!(
        "Requested '{} force:config:set disableTelemetry=true --global'.",
        config.cli.executable
    );
    Ok(())
}
