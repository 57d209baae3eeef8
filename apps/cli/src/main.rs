use std::sync::Arc;

use antlink_core::events::{AntEvent, AntObserver};
use antlink_core::session::{Session, SessionConfig};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "antlink",
    author,
    version,
    about = "ANT+ trainer bridge",
    long_about = "Pairs with a heart rate strap and an FE-C trainer through an ANT+ USB \
                  stick and serves the decoded telemetry over TCP."
)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// TCP port for the telemetry server
    #[arg(long)]
    port: Option<u16>,

    /// Heart rate strap device number (0 pairs with any)
    #[arg(long)]
    hrm_device: Option<u32>,

    /// Trainer device number (0 pairs with any)
    #[arg(long)]
    fec_device: Option<u32>,

    /// Rider weight in kilograms
    #[arg(long)]
    rider_weight: Option<f64>,

    /// Bike weight in kilograms
    #[arg(long)]
    bike_weight: Option<f64>,

    /// Wheel diameter in meters
    #[arg(long)]
    wheel_diameter: Option<f64>,

    /// Seconds to wait for a stick to appear
    #[arg(long)]
    device_timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(n) = self.hrm_device {
            config.hrm_device_number = n;
        }
        if let Some(n) = self.fec_device {
            config.fec_device_number = n;
        }
        if let Some(w) = self.rider_weight {
            config.rider_weight_kg = w;
        }
        if let Some(w) = self.bike_weight {
            config.bike_weight_kg = w;
        }
        if let Some(d) = self.wheel_diameter {
            config.wheel_diameter_m = d;
        }
        if let Some(t) = self.device_timeout {
            config.device_timeout_secs = t;
        }
        Ok(config)
    }
}

/// Prints session lifecycle events to stderr.
struct CliObserver {
    verbose: bool,
}

impl AntObserver for CliObserver {
    fn on_event(&self, event: &AntEvent) {
        match event {
            AntEvent::StickConnected {
                serial_number,
                version,
                max_channels,
                max_networks,
            } => {
                eprintln!(
                    "✓ ANT stick connected: serial {serial_number}, version {version}, \
                     {max_channels} channels, {max_networks} networks"
                );
            }
            AntEvent::StickLost { message } => {
                eprintln!("✗ Stick lost: {message}");
            }
            AntEvent::ChannelStateChanged { kind, from, to } => {
                if self.verbose {
                    eprintln!("→ {kind}: {from} → {to}");
                }
            }
            AntEvent::SensorPaired {
                kind,
                device_number,
            } => {
                eprintln!("✓ Paired with {kind} (device {device_number})");
            }
            AntEvent::ClientConnected { peer } => {
                eprintln!("✓ Client connected: {peer}");
            }
            AntEvent::ClientDisconnected { peer } => {
                eprintln!("✗ Client disconnected: {peer}");
            }
            AntEvent::SlopeRequested { slope } => {
                if self.verbose {
                    eprintln!("→ Slope set to {slope}%");
                }
            }
            AntEvent::UserParamsRequested {
                rider_weight_kg,
                bike_weight_kg,
                wheel_diameter_m,
            } => {
                if self.verbose {
                    eprintln!(
                        "→ User params: rider {rider_weight_kg} kg, bike {bike_weight_kg} kg, \
                         wheel {wheel_diameter_m} m"
                    );
                }
            }
        }
    }
}

fn main() {
    let args = Args::parse();
    let verbose = args.verbose;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ FAILED: {e}");
            std::process::exit(1);
        }
    };

    info!("antlink starting");
    let observer = Arc::new(CliObserver { verbose });
    let mut session = Session::with_observer(config, observer);

    if let Err(e) = session.run() {
        error!("session failed: {e}");
        eprintln!("✗ FAILED: {e}");
        std::process::exit(1);
    }
}
