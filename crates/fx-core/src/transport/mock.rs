//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{SerialTransport, TransportError};
use crate::protocol::constants::{ACK, ENQ};
use crate::protocol::frame::build_frame;

/// Mock transport for unit testing session logic.
///
/// Clones share the same queues, so a test can keep a handle after moving
/// the transport into a session.
#[derive(Clone)]
pub struct MockTransport {
    /// Bytes the "device" will send, in order.
    rx_queue: Arc<Mutex<VecDeque<u8>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Answer every ENQ with ACK without queueing it.
    auto_ack_enq: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            auto_ack_enq: Arc::new(Mutex::new(false)),
        }
    }

    /// Mock that ACKs every handshake on its own.
    pub fn with_auto_handshake() -> Self {
        let mock = Self::new();
        *mock.auto_ack_enq.lock().unwrap() = true;
        mock
    }

    /// Queue raw bytes for the host to read.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.rx_queue.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Queue a single ACK byte.
    pub fn queue_ack(&self) {
        self.queue_bytes(&[ACK]);
    }

    /// Queue a framed response carrying `payload`.
    pub fn queue_frame(&self, payload: &[u8]) {
        self.queue_bytes(&build_frame(payload));
    }

    /// Bytes queued but not yet read.
    pub fn pending_rx(&self) -> usize {
        self.rx_queue.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        if data == [ENQ] && *self.auto_ack_enq.lock().unwrap() {
            self.rx_queue.lock().unwrap().push_front(ACK);
        }
        Ok(data.len())
    }

    /// An empty queue waits at most 1 ms, so deadline loops stay cheap.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let byte = self.rx_queue.lock().unwrap().pop_front();
        if byte.is_none() {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(byte)
    }

    fn port_name(&self) -> String {
        "mock".to_string()
    }
}
