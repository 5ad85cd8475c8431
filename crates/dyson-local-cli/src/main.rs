//! dyson-local CLI: watch a purifier's status over its local MQTT broker.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dyson_local_client::setup::{load_config, load_descriptor};
use dyson_local_client::{exponential_backoff, ChannelObserver, DeviceConnection, DeviceEvent};
use dyson_local_credentials::Credentials;
use dyson_local_discovery::NetworkDiscovery;
use dyson_local_protocol::MqttTransport;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dyson-local",
    about = "Talk to Dyson purifiers on the local network",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a device and print its status messages until interrupted.
    Watch {
        /// Device descriptor (.json manifest entry or .toml).
        #[arg(short, long)]
        device: PathBuf,
    },

    /// Resolve a `.local` hostname over mDNS.
    Resolve {
        /// Hostname to resolve, e.g. NN2-EU-KHA1234A.local.
        hostname: String,
    },

    /// Check that a device descriptor's local credentials decrypt.
    Decrypt {
        /// Device descriptor (.json manifest entry or .toml).
        #[arg(short, long)]
        device: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    match cli.command {
        Commands::Watch { device } => {
            let descriptor = load_descriptor(&device)?;
            let (observer, mut events) = ChannelObserver::new();
            let conn = DeviceConnection::new(
                descriptor,
                config.connection.clone(),
                NetworkDiscovery::mdns(),
                MqttTransport::new(config.connection.keep_alive()),
                Arc::new(observer),
            )?;

            tokio::select! {
                result = exponential_backoff(config.retry.options(), || conn.start()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted before the device connected");
                    return Ok(());
                }
            }
            println!("Watching {}", conn.topics().status);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => print_event(event)?,
                        None => break,
                    },
                    result = tokio::signal::ctrl_c() => {
                        result?;
                        break;
                    }
                }
            }

            conn.stop().await?;
        }
        Commands::Resolve { hostname } => {
            let addr = NetworkDiscovery::mdns().resolve(&hostname).await?;
            println!("{hostname}: {addr}");
        }
        Commands::Decrypt { device } => {
            let descriptor = load_descriptor(&device)?;
            let credentials = Credentials::from_descriptor(&descriptor)?;
            // The password itself is never printed.
            println!("Username: {}", credentials.username());
            println!("Password: {} characters", credentials.password().len());
        }
    }

    Ok(())
}

fn print_event(event: DeviceEvent) -> anyhow::Result<()> {
    match event {
        DeviceEvent::SensorReading(reading) => {
            println!(
                "sensor {} {}",
                reading.time.as_deref().unwrap_or("-"),
                serde_json::to_string(&reading.data)?
            );
        }
        DeviceEvent::CurrentState(state) => {
            println!(
                "state {} {}",
                state.time.as_deref().unwrap_or("-"),
                serde_json::to_string(&state.product_state)?
            );
        }
        DeviceEvent::StateChange(change) => {
            for (field, old, new) in change.changes() {
                println!(
                    "change {} {field}: {old} -> {new}",
                    change.time.as_deref().unwrap_or("-")
                );
            }
        }
        DeviceEvent::DecodeError(err) => eprintln!("{err}"),
    }
    Ok(())
}
