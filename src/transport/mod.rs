//! Transport layer for the motor controller link
//!
//! The engine does not care whether packets travel over a serial port, a TCP
//! socket, or a simulator pipe; it only needs discrete packets in and
//! command packets out. Byte-level framing, checksumming, and reconnection
//! belong to the transport implementation.

use crate::error::Result;
use crate::packet::{CommandPacket, TelemetryPacket};
use std::time::Duration;

pub mod mock;
pub use mock::MockTransport;

/// Transport trait for packet exchange with the device
pub trait PacketTransport: Send {
    /// Send one command packet
    fn send(&mut self, cmd: &CommandPacket) -> Result<()>;

    /// Receive the next telemetry packet, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no packet arrived within the timeout; the
    /// reader thread treats that as a normal idle tick, not an error.
    fn receive(&mut self, timeout: Duration) -> Result<Option<TelemetryPacket>>;

    /// Whether the underlying link is still usable
    fn is_open(&self) -> bool;
}
