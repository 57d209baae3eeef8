//! USB transport: the raw bulk device abstraction and the frame-level
//! reader/writer built on top of it.

pub mod framed;
pub mod mock;
pub mod nusb_transport;
pub mod traits;

pub use framed::{FrameReader, FrameWriter};
pub use mock::MockTransport;
pub use nusb_transport::NusbTransport;
pub use traits::{TransportError, UsbTransport};
