//! Frame-level reader and writer over a [`UsbTransport`].
//!
//! The reader owns the receive buffer: bulk IN transfers deliver arbitrary
//! byte chunks, and a single frame may span several of them (or one chunk
//! may hold several frames). The writer sends one encoded frame per bulk
//! OUT transfer and waits for its completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::AntError;
use crate::protocol::{scan, Frame, Scanned};

use super::traits::UsbTransport;

/// How long a single polling read waits before giving the caller back
/// control.
pub const READ_SLICE: Duration = Duration::from_millis(10);

/// Overall deadline for a synchronous exchange to produce a frame.
pub const FRAME_DEADLINE: Duration = Duration::from_secs(1);

/// Bulk OUT completion timeout.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for a single transport read.
const READ_CHUNK: usize = 256;

pub struct FrameReader<T: UsbTransport> {
    transport: Arc<T>,
    buffer: Vec<u8>,
}

impl<T: UsbTransport> FrameReader<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Produce a frame if one is available, blocking for at most one
    /// [`READ_SLICE`]. Returns `Ok(None)` when no complete frame arrived.
    pub fn try_next_frame(&mut self) -> Result<Option<Frame>, AntError> {
        if let Some(frame) = self.scan_buffer()? {
            return Ok(Some(frame));
        }
        match self.transport.read(READ_CHUNK, READ_SLICE) {
            Ok(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                self.scan_buffer()
            }
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Produce the next frame, polling in [`READ_SLICE`] steps until
    /// `deadline` elapses.
    pub fn next_frame(&mut self, deadline: Duration) -> Result<Frame, AntError> {
        let start = Instant::now();
        loop {
            if let Some(frame) = self.try_next_frame()? {
                return Ok(frame);
            }
            if start.elapsed() >= deadline {
                return Err(AntError::Timeout);
            }
        }
    }

    fn scan_buffer(&mut self) -> Result<Option<Frame>, AntError> {
        let (consumed, scanned) = scan(&self.buffer);
        self.buffer.drain(..consumed);
        match scanned {
            Scanned::Frame(frame) => Ok(Some(frame)),
            Scanned::Incomplete => Ok(None),
            // Corrupt bytes already dropped; abort the outer operation.
            Scanned::BadChecksum => Err(AntError::Framing("bad checksum")),
        }
    }
}

pub struct FrameWriter<T: UsbTransport> {
    transport: Arc<T>,
}

impl<T: UsbTransport> FrameWriter<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Encode `frame` and transmit it, waiting for the transfer to
    /// complete.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), AntError> {
        let bytes = frame
            .encode()
            .map_err(|_| AntError::Framing("payload too long"))?;
        self.transport.write(&bytes, WRITE_TIMEOUT)?;
        Ok(())
    }
}
