//! Event system for UI decoupling.
//!
//! The session reports lifecycle edges through an observer so the CLI (or
//! any other frontend) can render them without being wired into the
//! protocol stack.

use std::net::SocketAddr;

use crate::channel::ChannelState;
use crate::profiles::ProfileKind;

/// Events emitted while a session runs.
#[derive(Debug, Clone)]
pub enum AntEvent {
    /// A stick was opened and identified.
    StickConnected {
        serial_number: u32,
        version: String,
        max_channels: u8,
        max_networks: u8,
    },
    /// The stick failed; the session will rebuild it.
    StickLost { message: String },
    /// A channel moved between searching/open/closed.
    ChannelStateChanged {
        kind: ProfileKind,
        from: ChannelState,
        to: ChannelState,
    },
    /// A channel learned its master's device number.
    SensorPaired { kind: ProfileKind, device_number: u32 },
    /// A telemetry client connected.
    ClientConnected { peer: SocketAddr },
    /// A telemetry client went away.
    ClientDisconnected { peer: SocketAddr },
    /// A client asked for a new track slope.
    SlopeRequested { slope: f64 },
    /// A client sent new rider/bike parameters.
    UserParamsRequested {
        rider_weight_kg: f64,
        bike_weight_kg: f64,
        wheel_diameter_m: f64,
    },
}

/// Observer trait for receiving session events.
pub trait AntObserver: Send + Sync {
    fn on_event(&self, event: &AntEvent);
}

/// Discards all events.
pub struct NullObserver;

impl AntObserver for NullObserver {
    fn on_event(&self, _event: &AntEvent) {}
}

/// Logs events through `tracing`.
pub struct TracingObserver;

impl AntObserver for TracingObserver {
    fn on_event(&self, event: &AntEvent) {
        match event {
            AntEvent::StickConnected {
                serial_number,
                version,
                max_channels,
                max_networks,
            } => {
                tracing::info!(
                    serial = serial_number,
                    version = %version,
                    max_channels,
                    max_networks,
                    "stick connected"
                );
            }
            AntEvent::StickLost { message } => {
                tracing::warn!(message = %message, "stick lost");
            }
            AntEvent::ChannelStateChanged { kind, from, to } => {
                tracing::info!(kind = %kind, from = %from, to = %to, "channel state changed");
            }
            AntEvent::SensorPaired {
                kind,
                device_number,
            } => {
                tracing::info!(kind = %kind, device_number, "sensor paired");
            }
            AntEvent::ClientConnected { peer } => {
                tracing::info!(peer = %peer, "telemetry client connected");
            }
            AntEvent::ClientDisconnected { peer } => {
                tracing::info!(peer = %peer, "telemetry client disconnected");
            }
            AntEvent::SlopeRequested { slope } => {
                tracing::info!(slope, "slope command received");
            }
            AntEvent::UserParamsRequested {
                rider_weight_kg,
                bike_weight_kg,
                wheel_diameter_m,
            } => {
                tracing::info!(
                    rider_weight_kg,
                    bike_weight_kg,
                    wheel_diameter_m,
                    "user parameters received"
                );
            }
        }
    }
}
