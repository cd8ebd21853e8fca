use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "sfdx-telemetry",
    about = "Inspect and exercise extension telemetry consent",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "sfdx-telemetry.toml")]
    config: String,

    /// Per-install identifier reported with every event (random when omitted)
    #[arg(long)]
    machine_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show how the editor setting and CLI opt-in resolve
    Status,
    /// Send a custom event to the collector
    Send {
        /// Event name
        event: String,
        /// Event property, as key=value (repeatable)
        #[arg(long = "prop", value_parser = parse_property)]
        properties: Vec<(String, String)>,
        /// Event measurement, as key=number (repeatable)
        #[arg(long = "measure", value_parser = parse_measurement)]
        measurements: Vec<(String, f64)>,
    },
    /// Turn off the companion CLI's telemetry
    Disable,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_measurement(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = parse_property(raw)?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid number in '{raw}': {e}"))?;
    Ok((key, value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let machine_id = cli
        .machine_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match cli.command {
        Commands::Status => {
            commands::status::run(&cli.config).await?;
        }
        Commands::Send {
            event,
            properties,
            measurements,
        } => {
            commands::send::run(&cli.config, &machine_id, &event, &properties, &measurements)
                .await?;
        }
        Commands::Disable => {
            commands::disable::run(&cli.config)?;
        }
    }

    Ok(())
}
