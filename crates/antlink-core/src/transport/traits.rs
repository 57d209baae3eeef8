//! USB transport abstraction.
//!
//! Defines the `UsbTransport` trait for raw bulk endpoint I/O, allowing
//! different implementations (nusb, mock, etc.). Framing lives above this
//! trait in [`crate::transport::framed`].

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device not found: VID={vid:04X}")]
    DeviceNotFound { vid: u16 },

    #[error("failed to open device: {0}")]
    OpenFailed(String),

    #[error("failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("no bulk {direction} endpoint on interface 0")]
    EndpointNotFound { direction: &'static str },

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("endpoint {endpoint:#04X} stalled")]
    Stall { endpoint: u8 },

    #[error("device disconnected")]
    Disconnected,

    #[error("transfer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl TransportError {
    /// Timeouts are an expected outcome of polling reads; everything else
    /// is fatal for the stick.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract bulk USB transport.
///
/// One IN and one OUT transfer may be in flight at a time; implementations
/// must keep a timed-out IN transfer pending and hand its data to the next
/// `read` call rather than submitting a second transfer alongside it.
pub trait UsbTransport: Send + Sync {
    /// Read up to `max_len` bytes from the bulk IN endpoint, waiting at
    /// most `timeout`. An expired wait returns `TransportError::Timeout`.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write `data` to the bulk OUT endpoint and wait for completion.
    fn write(&self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// Whether the device is believed to still be attached.
    fn is_connected(&self) -> bool;

    /// Product id of the opened device.
    fn product_id(&self) -> u16;
}
