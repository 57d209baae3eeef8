//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};
use crate::protocol::{encode, Frame};

/// Mock transport for unit testing the protocol stack.
///
/// Inbound bytes are served from a queue of chunks, one chunk per `read`
/// call, so tests can also exercise frames split across reads. Writes are
/// captured verbatim. Clones share the same queues, so a test can keep a
/// handle after giving the transport away.
#[derive(Clone)]
pub struct MockTransport {
    read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: Arc<Mutex<bool>>,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            pid: 0x1008,
        }
    }

    /// Queue raw bytes to be returned by one `read` call.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.read_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue one encoded frame.
    pub fn queue_frame(&self, id: u8, payload: &[u8]) {
        let bytes = encode(id, payload).expect("test frame too long");
        self.queue_bytes(&bytes);
    }

    /// All captured writes, in submission order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes decoded back into frames.
    pub fn written_frames(&self) -> Vec<Frame> {
        self.writes()
            .iter()
            .map(|bytes| {
                match crate::protocol::scan(bytes) {
                    (_, crate::protocol::Scanned::Frame(frame)) => frame,
                    other => panic!("captured write is not a frame: {other:?}"),
                }
            })
            .collect()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate unplugging the stick.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn read(&self, _max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.read_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn write(&self, data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::STARTUP_MESSAGE;

    #[test]
    fn test_read_queue_order() {
        let mock = MockTransport::new();
        mock.queue_bytes(&[1, 2, 3]);
        mock.queue_bytes(&[4]);

        assert_eq!(
            mock.read(64, Duration::from_millis(10)).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(mock.read(64, Duration::from_millis(10)).unwrap(), vec![4]);
        assert!(matches!(
            mock.read(64, Duration::from_millis(10)),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_write_capture() {
        let mock = MockTransport::new();
        mock.write(b"hello", Duration::from_millis(10)).unwrap();
        mock.write(b"world", Duration::from_millis(10)).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"hello");
        assert_eq!(writes[1], b"world");
    }

    #[test]
    fn test_queue_frame_roundtrips() {
        let mock = MockTransport::new();
        mock.queue_frame(STARTUP_MESSAGE, &[0x20]);
        let bytes = mock.read(64, Duration::from_millis(10)).unwrap();
        assert!(crate::protocol::valid_checksum(&bytes));
        assert_eq!(bytes[2], STARTUP_MESSAGE);
    }

    #[test]
    fn test_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());
        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"x", Duration::from_millis(10)).is_err());
        mock.reconnect();
        assert!(mock.write(b"x", Duration::from_millis(10)).is_ok());
    }
}
