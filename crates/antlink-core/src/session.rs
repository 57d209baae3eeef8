//! Session: high-level orchestrator tying the stick, the channels and the
//! telemetry server together.
//!
//! Owns the rebuild policy: a failed stick is dropped and reopened, a
//! closed channel is recreated with the same device number so a running
//! simulation does not silently switch sensors.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::channel::ChannelState;
use crate::clock::MonotonicClock;
use crate::error::AntError;
use crate::events::{AntEvent, AntObserver, TracingObserver};
use crate::profiles::{FitnessEquipment, HeartRateMonitor, Profile, ProfileKind};
use crate::protocol::constants::ANT_PLUS_NETWORK_KEY;
use crate::stick::AntStick;
use crate::telemetry::TelemetryServer;
use crate::transport::{NusbTransport, TransportError};

/// Configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// TCP port for the telemetry fan-out.
    pub port: u16,
    /// Heart rate strap to pair with; 0 searches for any.
    pub hrm_device_number: u32,
    /// Trainer to pair with; 0 searches for any.
    pub fec_device_number: u32,
    /// Rider weight, sent to the trainer in the user configuration page.
    pub rider_weight_kg: f64,
    pub bike_weight_kg: f64,
    pub wheel_diameter_m: f64,
    /// How long to wait for a stick to appear on the bus.
    pub device_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 7500,
            hrm_device_number: 0,
            fec_device_number: 0,
            rider_weight_kg: 75.0,
            bike_weight_kg: 10.0,
            wheel_diameter_m: 0.668,
            device_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub struct Session<O: AntObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl Session<TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: AntObserver + 'static> Session<O> {
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    /// Run until a fatal error. The telemetry server outlives individual
    /// sticks, so clients stay connected across stick rebuilds.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        let clock = MonotonicClock::new();
        let mut server = TelemetryServer::bind(
            self.config.port,
            clock.clone(),
            Arc::clone(&self.observer) as Arc<dyn AntObserver>,
        )?;
        info!(port = self.config.port, "telemetry server listening");

        loop {
            let transport = self.wait_for_stick()?;
            if let Err(e) = self.run_stick(transport, &mut server, &clock) {
                self.observer.on_event(&AntEvent::StickLost {
                    message: e.to_string(),
                });
                warn!(error = %e, "stick failed, rebuilding");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    fn wait_for_stick(&self) -> Result<NusbTransport> {
        info!("waiting for ANT stick...");
        let timeout = Duration::from_secs(self.config.device_timeout_secs.max(1));
        let start = Instant::now();

        loop {
            match NusbTransport::open() {
                Ok(transport) => return Ok(transport),
                Err(TransportError::DeviceNotFound { .. }) => {
                    if start.elapsed() > timeout {
                        return Err(anyhow!(AntError::NotFound));
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn run_stick(
        &self,
        transport: NusbTransport,
        server: &mut TelemetryServer,
        clock: &Arc<MonotonicClock>,
    ) -> Result<()> {
        let mut stick = AntStick::open(transport)?;
        self.observer.on_event(&AntEvent::StickConnected {
            serial_number: stick.serial_number(),
            version: stick.version().to_owned(),
            max_channels: stick.max_channels(),
            max_networks: stick.max_networks(),
        });

        stick.set_network_key(&ANT_PLUS_NETWORK_KEY)?;

        let mut hrm = self.open_hrm(&mut stick, clock, self.config.hrm_device_number)?;
        let mut fec = self.open_fec(&mut stick, clock, self.config.fec_device_number)?;
        let mut hrm_state = ChannelState::Searching;
        let mut fec_state = ChannelState::Searching;

        loop {
            stick.tick()?;
            hrm = self.supervise(&mut stick, clock, hrm, &mut hrm_state, ProfileKind::HeartRate)?;
            fec = self.supervise(
                &mut stick,
                clock,
                fec,
                &mut fec_state,
                ProfileKind::FitnessEquipment,
            )?;
            server.tick(&mut stick);
        }
    }

    /// Report state edges and rebuild the channel when it closed. The
    /// replacement searches for the same device number, so a mid-session
    /// partner change cannot happen.
    fn supervise(
        &self,
        stick: &mut AntStick<NusbTransport>,
        clock: &Arc<MonotonicClock>,
        number: u8,
        prev_state: &mut ChannelState,
        kind: ProfileKind,
    ) -> Result<u8> {
        let Some(channel) = stick.channel(number) else {
            return Ok(number);
        };

        let state = channel.state();
        if state != *prev_state {
            self.observer.on_event(&AntEvent::ChannelStateChanged {
                kind,
                from: *prev_state,
                to: state,
            });
            if state == ChannelState::Open {
                self.observer.on_event(&AntEvent::SensorPaired {
                    kind,
                    device_number: channel.channel_id().device_number,
                });
            }
            *prev_state = state;
        }

        if state != ChannelState::Closed {
            return Ok(number);
        }

        let device_number = channel.channel_id().device_number;
        info!(kind = %kind, device_number, "rebuilding closed channel");
        stick.release_channel(number);
        let replacement = match kind {
            ProfileKind::HeartRate => self.open_hrm(stick, clock, device_number)?,
            ProfileKind::FitnessEquipment => self.open_fec(stick, clock, device_number)?,
        };
        *prev_state = ChannelState::Searching;
        Ok(replacement)
    }

    fn open_hrm(
        &self,
        stick: &mut AntStick<NusbTransport>,
        clock: &Arc<MonotonicClock>,
        device_number: u32,
    ) -> Result<u8, AntError> {
        stick.open_channel(
            Profile::HeartRate(HeartRateMonitor::new(clock.clone())),
            device_number,
        )
    }

    fn open_fec(
        &self,
        stick: &mut AntStick<NusbTransport>,
        clock: &Arc<MonotonicClock>,
        device_number: u32,
    ) -> Result<u8, AntError> {
        let mut fec = FitnessEquipment::new(clock.clone());
        fec.set_user_params(
            self.config.rider_weight_kg,
            self.config.bike_weight_kg,
            self.config.wheel_diameter_m,
        );
        stick.open_channel(Profile::FitnessEquipment(fec), device_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 7500);
        assert_eq!(config.hrm_device_number, 0);
        assert_eq!(config.rider_weight_kg, 75.0);
        assert_eq!(config.device_timeout_secs, 60);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = SessionConfig::default();
        config.port = 9000;
        config.fec_device_number = 0x3412;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.fec_device_number, 0x3412);
        assert_eq!(parsed.bike_weight_kg, 10.0);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let parsed: SessionConfig = toml::from_str("port = 8000\n").unwrap();
        assert_eq!(parsed.port, 8000);
        assert_eq!(parsed.rider_weight_kg, 75.0);
        assert_eq!(parsed.wheel_diameter_m, 0.668);
    }
}
