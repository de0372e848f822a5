//! Mock transport for testing
//!
//! Cloneable handle: tests keep one clone to inject telemetry and inspect
//! sent commands while the engine owns the other.

use super::PacketTransport;
use crate::error::Result;
use crate::packet::{CommandPacket, TelemetryPacket};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Mock transport for hardware-free testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    rx_queue: VecDeque<TelemetryPacket>,
    sent: Vec<CommandPacket>,
    open: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                rx_queue: VecDeque::new(),
                sent: Vec::new(),
                open: true,
            })),
        }
    }

    /// Inject a telemetry packet to be received by the engine
    pub fn inject(&self, packet: TelemetryPacket) {
        self.inner.lock().rx_queue.push_back(packet);
    }

    /// Get a copy of all commands sent so far
    pub fn sent_commands(&self) -> Vec<CommandPacket> {
        self.inner.lock().sent.clone()
    }

    /// Number of commands sent so far
    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    /// Clear the sent command log
    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }

    /// Simulate the link going down; subsequent sends fail
    pub fn close(&self) {
        self.inner.lock().open = false;
    }
}

impl PacketTransport for MockTransport {
    fn send(&mut self, cmd: &CommandPacket) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(crate::error::Error::TransportClosed);
        }
        inner.sent.push(*cmd);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<TelemetryPacket>> {
        if let Some(pkt) = self.inner.lock().rx_queue.pop_front() {
            return Ok(Some(pkt));
        }
        // Nothing queued: emulate a blocking read timing out. Sleep a
        // fraction of the timeout so injected packets are picked up promptly.
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(self.inner.lock().rx_queue.pop_front())
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::StatusPacket;

    #[test]
    fn test_inject_and_receive() {
        let mock = MockTransport::new();
        let mut engine_side = mock.clone();

        mock.inject(TelemetryPacket::Status(StatusPacket::default()));
        let pkt = engine_side.receive(Duration::from_millis(1)).unwrap();
        assert!(matches!(pkt, Some(TelemetryPacket::Status(_))));

        // Queue drained: next receive times out empty
        let pkt = engine_side.receive(Duration::from_millis(1)).unwrap();
        assert!(pkt.is_none());
    }

    #[test]
    fn test_send_recorded() {
        let mock = MockTransport::new();
        let mut engine_side = mock.clone();

        engine_side
            .send(&CommandPacket::SetVelocity { mm_per_sec: 100.0 })
            .unwrap();
        assert_eq!(mock.sent_count(), 1);
        assert_eq!(
            mock.sent_commands()[0],
            CommandPacket::SetVelocity { mm_per_sec: 100.0 }
        );
    }

    #[test]
    fn test_closed_transport_rejects_send() {
        let mock = MockTransport::new();
        let mut engine_side = mock.clone();
        mock.close();
        assert!(!engine_side.is_open());
        assert!(engine_side.send(&CommandPacket::Stop).is_err());
    }
}
