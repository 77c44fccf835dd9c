//! Fotohora - location reporter service and viewer CLI.
//!
//! Run with: `cargo run -p fotohora-service`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fotohora_core::{RemoteStore, ReporterExit, SimulatedLocationProvider, viewer};
use fotohora_service::{Config, StoreBackend, Supervisor, default_config_path, display, identity};
use fotohora_types::DeviceIdentity;

/// Fotohora - periodic location reporter with a remotely tuned cadence.
#[derive(Parser, Debug)]
#[command(name = "fotohora")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store URL (overrides config and selects the firebase backend).
    #[arg(long, global = true)]
    store_url: Option<String>,

    /// Device identity (overrides config).
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Initial reporting interval in milliseconds (overrides config).
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reporter in the foreground (default behavior).
    Run,

    /// Set the reporting interval every reporter follows.
    SetInterval {
        /// Interval in seconds.
        seconds: f64,
    },

    /// List devices and their last known positions.
    Devices {
        /// Keep printing the device list as it changes.
        #[arg(short, long)]
        follow: bool,
    },

    /// Print the position history of a device.
    History {
        /// Device identity.
        device: String,
    },

    /// Set the display color of a device.
    Color {
        /// Device identity.
        device: String,
        /// Color as #rrggbb.
        color: String,
    },

    /// Set the display name of a device.
    Name {
        /// Device identity.
        device: String,
        /// Display name.
        name: String,
    },

    /// Check that the store accepts writes.
    Check,

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_reporter(config).await,
        Command::Config => {
            let mut shown = config.clone();
            if shown.store.auth_token.is_some() {
                shown.store.auth_token = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
        Command::SetInterval { seconds } => {
            let interval = Duration::try_from_secs_f64(seconds)
                .ok()
                .filter(|d| !d.is_zero())
                .with_context(|| format!("invalid interval: {} seconds", seconds))?;
            let store = config.store.open_shared()?;
            let applied = viewer::set_reporting_interval(store.as_ref(), interval).await?;
            println!("Reporting interval set to {} ms", applied.interval_millis());
            Ok(())
        }
        Command::Devices { follow: false } => {
            let store = config.store.open_shared()?;
            let devices = viewer::list_devices(store.as_ref()).await?;
            print!("{}", display::format_devices(&devices));
            Ok(())
        }
        Command::Devices { follow: true } => {
            let store = config.store.open_shared()?;
            follow_devices(store.as_ref()).await
        }
        Command::History { device } => {
            let store = config.store.open_shared()?;
            let device = parse_device(&device)?;
            let history = viewer::device_history(store.as_ref(), &device).await?;
            print!("{}", display::format_history(&history));
            Ok(())
        }
        Command::Color { device, color } => {
            let store = config.store.open_shared()?;
            let device = parse_device(&device)?;
            let color = viewer::set_device_color(store.as_ref(), &device, &color).await?;
            println!("Color of {} set to {}", device, color);
            Ok(())
        }
        Command::Name { device, name } => {
            let store = config.store.open_shared()?;
            let device = parse_device(&device)?;
            viewer::set_device_name(store.as_ref(), &device, &name).await?;
            println!("Name of {} set to {}", device, name.trim());
            Ok(())
        }
        Command::Check => {
            let store = config.store.open_shared()?;
            match viewer::check_connection(store.as_ref()).await {
                Ok(()) => {
                    println!("Connection OK");
                    Ok(())
                }
                Err(e) => bail!("Connection failed: {}", e),
            }
        }
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let core_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fotohora_service=info".parse()?)
                .add_directive(format!("fotohora_core={}", core_level).parse()?),
        )
        .init();
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!(
                "Ignoring config at {}: {}",
                default_config_path().display(),
                e
            );
            Config::default()
        }),
    };

    if let Some(url) = &args.store_url {
        config.store.backend = StoreBackend::Firebase;
        config.store.url = url.clone();
    }
    if let Some(id) = &args.device_id {
        config.device.id = Some(id.clone());
    }
    if let Some(interval) = args.interval_ms {
        config.reporter.default_interval_ms = interval;
    }

    config.validate()?;
    Ok(config)
}

fn parse_device(raw: &str) -> anyhow::Result<DeviceIdentity> {
    DeviceIdentity::new(raw).with_context(|| format!("invalid device id: {:?}", raw))
}

async fn follow_devices(store: &dyn RemoteStore) -> anyhow::Result<()> {
    let mut devices = viewer::watch_devices(store).await?;
    let mut first = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = devices.next() => match update {
                Some(Ok(snapshot)) => {
                    if !first {
                        println!();
                    }
                    first = false;
                    print!("{}", display::format_devices(&snapshot));
                }
                Some(Err(e)) => warn!("Device stream error: {}", e),
                None => bail!("Device stream closed by the store"),
            },
        }
    }
    store.unsubscribe(devices.id()).await;
    Ok(())
}

async fn run_reporter(config: Config) -> anyhow::Result<()> {
    let device = identity::resolve(config.device.id.as_deref());
    let store = config.store.open()?;
    let provider = Arc::new(SimulatedLocationProvider::new(
        config.simulation.origin(),
        config.simulation.step_meters,
    ));

    info!(
        "Starting reporter for {} ({} store, default interval {} ms)",
        device, config.store.backend, config.reporter.default_interval_ms
    );

    let supervisor = Supervisor::new(store, provider, device, config.reporter.clone());
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                ctrl_c.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    match supervisor.run(cancel).await {
        ReporterExit::Stopped => Ok(()),
        exit => bail!("Reporter stopped: {}", exit),
    }
}
