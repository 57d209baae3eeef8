//! antlink-core: driver for ANT+ USB radio sticks.
//!
//! Pairs with nearby ANT+ sensors (heart rate straps, FE-C trainers),
//! decodes their broadcasts into typed measurements, sends acknowledged
//! control commands back, and fans the readings out over TCP.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: framing, message ids, channel events
//! - **Transport**: USB communication abstraction (nusb, mock) plus the
//!   frame-level reader/writer
//! - **Stick**: device setup, channel allocation, frame demultiplexing
//! - **Channel**: per-sensor state machine and acknowledged-write queue
//! - **Profiles**: heart rate and fitness equipment decoders/encoders
//! - **Telemetry**: newline-delimited TCP fan-out with inbound commands
//! - **Session**: orchestrator owning the rebuild policy
//!
//! # Example
//!
//! ```no_run
//! use antlink_core::session::{Session, SessionConfig};
//!
//! let config = SessionConfig {
//!     port: 7500,
//!     ..Default::default()
//! };
//! let mut session = Session::new(config);
//! session.run().expect("session failed");
//! ```

pub mod channel;
pub mod clock;
pub mod error;
pub mod events;
pub mod profiles;
pub mod protocol;
pub mod session;
pub mod stick;
pub mod telemetry;
pub mod transport;

// Re-exports for convenience
pub use channel::{AntChannel, ChannelId, ChannelState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::AntError;
pub use events::{AntEvent, AntObserver, NullObserver, TracingObserver};
pub use profiles::{FitnessEquipment, HeartRateMonitor, Profile, ProfileKind};
pub use session::{Session, SessionConfig};
pub use stick::AntStick;
pub use telemetry::{Telemetry, TelemetryServer};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
