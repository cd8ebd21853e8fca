use sfdx_telemetry::HostSettings;

use super::{build_service, load_config};

/// Run the `status` command: show how telemetry consent resolves.
///
/// Only reads the consent sources; unlike initialization it never switches
/// CLI telemetry off.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(&config);

    let editor_enabled = config.editor.telemetry.telemetry_enabled();
    let cli_allowed = service.check_cli_telemetry().await;

    println!("Telemetry Status");
    println!("================");
    println!("Extension:      {}", service.extension_name());
    println!("Editor setting: {}", on_off(editor_enabled));
    println!("CLI allows:     {}", on_off(cli_allowed));
    println!("Effective:      {}", on_off(editor_enabled && cli_allowed));
    println!("Collector:      {}", config.reporter.endpoint);

    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}
