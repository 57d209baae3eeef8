//! Error taxonomy for the protocol stack.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum AntError {
    /// No matching USB stick is plugged in.
    #[error("no ANT stick found")]
    NotFound,

    /// A USB submit, cancel or halt-clear failed. Fatal for the stick.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reader could not produce a frame within its deadline.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// Bad checksum, short response or impossible header.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// A valid frame arrived, but not the one the current exchange awaited.
    #[error("unexpected response: expected id {expected:#04X}, got {got:#04X}")]
    UnexpectedResponse { expected: u8, got: u8 },

    /// A channel setup command was rejected or answered out of order.
    #[error("channel {channel} command {command:#04X} failed: {event}")]
    CommandFailed {
        channel: u8,
        command: u8,
        event: crate::protocol::ChannelEvent,
    },

    /// The channel id reply disagrees with the device we previously paired
    /// with. Fatal for that channel.
    #[error("channel {channel} pairing mismatch: expected {expected}, observed {observed}")]
    PairingMismatch {
        channel: u8,
        expected: u32,
        observed: u32,
    },

    /// All channel numbers on the stick are in use.
    #[error("no free channel number (stick supports {max_channels})")]
    Exhausted { max_channels: u8 },
}
