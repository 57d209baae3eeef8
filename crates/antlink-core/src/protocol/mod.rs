//! ANT wire protocol: framing, message ids, channel events.

pub mod constants;
pub mod event;
pub mod frame;

pub use event::ChannelEvent;
pub use frame::{encode, scan, valid_checksum, Frame, FrameError, Scanned};
