//! Frame assembly and parsing.
//!
//! Every message exchanged with the stick is framed as
//! `SYNC | len | id | payload[len] | checksum`, where the checksum is the
//! XOR of all preceding bytes. A frame is valid iff the XOR of every byte
//! including the checksum is zero.

use thiserror::Error;

use super::constants::{FRAME_OVERHEAD, SYNC_BYTE};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload too long: {len} bytes (max 255)")]
    PayloadTooLong { len: usize },
}

/// A parsed frame: message id plus raw payload. The sync byte, length and
/// checksum only exist on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(id: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Serialize to wire bytes, appending the XOR checksum.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.id, &self.payload)
    }

    /// First payload byte, which for channel messages is the channel
    /// number.
    pub fn channel(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Assemble a wire frame for `id` with `payload`.
pub fn encode(id: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > 255 {
        return Err(FrameError::PayloadTooLong { len: payload.len() });
    }
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.push(SYNC_BYTE);
    out.push(payload.len() as u8);
    out.push(id);
    out.extend_from_slice(payload);
    out.push(xor(&out));
    Ok(out)
}

/// True when the XOR of every byte, trailing checksum included, is zero.
pub fn valid_checksum(frame_bytes: &[u8]) -> bool {
    !frame_bytes.is_empty() && xor(frame_bytes) == 0
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |c, b| c ^ b)
}

/// Outcome of scanning a receive buffer for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scanned {
    /// Not enough bytes for a complete frame yet.
    Incomplete,
    /// A complete, checksum-valid frame.
    Frame(Frame),
    /// A complete frame whose checksum did not match.
    BadChecksum,
}

/// Search `buf` for the next frame.
///
/// Returns the number of bytes the caller must drop from the front of the
/// buffer together with the scan outcome. Garbage before the sync byte is
/// always counted in the drop count; for `Frame` and `BadChecksum` the
/// count also covers the frame bytes themselves.
pub fn scan(buf: &[u8]) -> (usize, Scanned) {
    // Discard anything before the sync byte.
    let skipped = buf
        .iter()
        .position(|&b| b == SYNC_BYTE)
        .unwrap_or(buf.len());
    let buf = &buf[skipped..];

    if buf.len() < FRAME_OVERHEAD {
        return (skipped, Scanned::Incomplete);
    }
    let total = buf[1] as usize + FRAME_OVERHEAD;
    if buf.len() < total {
        return (skipped, Scanned::Incomplete);
    }

    let frame_bytes = &buf[..total];
    if !valid_checksum(frame_bytes) {
        return (skipped + total, Scanned::BadChecksum);
    }
    let frame = Frame::new(frame_bytes[2], &frame_bytes[3..total - 1]);
    (skipped + total, Scanned::Frame(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let bytes = encode(0x4A, &[0x00]).unwrap();
        assert_eq!(bytes, vec![0xA4, 0x01, 0x4A, 0x00, 0xA4 ^ 0x01 ^ 0x4A]);
        assert!(valid_checksum(&bytes));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; 256];
        assert_eq!(
            encode(0x4E, &payload),
            Err(FrameError::PayloadTooLong { len: 256 })
        );
    }

    #[test]
    fn test_scan_roundtrip_with_trailing_garbage() {
        let mut bytes = encode(0x4E, &[0x00, 0x10, 0x19, 0xFF]).unwrap();
        let frame_len = bytes.len();
        bytes.extend_from_slice(&[0x12, 0x55, 0xA4]);

        let (consumed, scanned) = scan(&bytes);
        assert_eq!(consumed, frame_len);
        assert_eq!(
            scanned,
            Scanned::Frame(Frame::new(0x4E, vec![0x00, 0x10, 0x19, 0xFF]))
        );
    }

    #[test]
    fn test_scan_discards_leading_garbage() {
        let mut bytes = vec![0x00, 0x7F, 0x13]; // no sync byte in here
        let frame = encode(0x6F, &[0x20]).unwrap();
        bytes.extend_from_slice(&frame);

        let (consumed, scanned) = scan(&bytes);
        assert_eq!(consumed, 3 + frame.len());
        assert_eq!(scanned, Scanned::Frame(Frame::new(0x6F, vec![0x20])));
    }

    #[test]
    fn test_scan_needs_more_bytes() {
        let bytes = encode(0x4E, &[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        for cut in 0..bytes.len() {
            let (consumed, scanned) = scan(&bytes[..cut]);
            assert_eq!(consumed, 0);
            assert_eq!(scanned, Scanned::Incomplete, "cut at {cut}");
        }
    }

    #[test]
    fn test_single_byte_flip_breaks_checksum() {
        let bytes = encode(0x40, &[0x00, 0x42, 0x00]).unwrap();
        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut mutated = bytes.clone();
                mutated[i] ^= 1 << bit;
                assert!(
                    !valid_checksum(&mutated),
                    "flip of byte {i} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_scan_reports_bad_checksum() {
        let mut bytes = encode(0x4E, &[0x00, 0x10]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let (consumed, scanned) = scan(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(scanned, Scanned::BadChecksum);
    }

    #[test]
    fn test_scan_empty_and_pure_garbage() {
        assert_eq!(scan(&[]), (0, Scanned::Incomplete));
        assert_eq!(scan(&[0x01, 0x02, 0x03]), (3, Scanned::Incomplete));
    }
}
