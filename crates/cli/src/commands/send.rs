use sfdx_telemetry::{ExtensionContext, TelemetryBuilder};

use super::{build_service, load_config};

/// Run the `send` command: initialize telemetry and forward one custom event.
pub async fn run(
    config_path: &str,
    machine_id: &str,
    event: &str,
    properties: &[(String, String)],
    measurements: &[(String, f64)],
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let service = build_service(&config);
    service
        .initialize_service(&ExtensionContext::default(), machine_id)
        .await;

    if service.reporter().is_none() {
        println!("Telemetry is disabled or no reporter is configured; nothing sent.");
        return Ok(());
    }

    let mut builder = TelemetryBuilder::new();
    for (key, value) in properties {
        builder.add_property(key.as_str(), value.as_str());
    }
    for (key, value) in measurements {
        builder.add_measurement(key.as_str(), *value);
    }
    let data = builder.build();

    service.send_event_data(event, data.properties, data.measurements);
    service.dispose().await;

    println!("Sent event '{}'.", event);
    Ok(())
}
