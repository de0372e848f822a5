//! The task-cycle loop and the transport reader loop
//!
//! # Cycle order
//!
//! Every cycle, in strict order:
//!
//! 1. Drain all packets received since the last cycle and dispatch each to
//!    its handler (status, IO, encoder, or a registered custom handler);
//!    malformed packets are logged and skipped without aborting the cycle.
//! 2. Update elapsed-time bookkeeping and the connection state machine
//!    (first contact, stabilizing grace period, staleness timeout).
//! 3. Run sensor interpretation hooks so actions see current-cycle data.
//! 4. Resolve the active action set. The resolver runs even while direct
//!    motion overrides are active, keeping action state machines and
//!    diagnostics live; its output is simply not applied to an overridden
//!    channel.
//! 5. Reflect the resulting motion into command packets and send them,
//!    unless disconnected — loss of connection fails safe by suppressing
//!    all outgoing motion.
//! 6. Sleep the remainder of the period. An overrun is logged and the next
//!    cycle starts immediately; cycles are never skipped to "catch up".
//!
//! # Reader loop
//!
//! The reader thread does bounded-timeout receives so it can notice the
//! stop flag, and hands completed packets to the cycle thread through an
//! unbounded channel drained non-blockingly at the top of each cycle.

use super::{ConnectionState, RobotInner};
use crate::packet::TelemetryPacket;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Receive timeout for one transport read; keeps the port mutex hold time
/// bounded so command sends interleave with reads
const READ_TIMEOUT_MS: u64 = 5;

/// Back-off after a transport read error before retrying
const READ_ERROR_BACKOFF_MS: u64 = 10;

/// Reader loop - receives packets and hands them to the cycle thread
pub(crate) fn reader_loop(inner: Arc<RobotInner>, tx: Sender<TelemetryPacket>) {
    let timeout = Duration::from_millis(READ_TIMEOUT_MS);

    while !inner.stop_requested.load(Ordering::Acquire) {
        let received = {
            let mut transport = inner.transport.lock();
            transport.receive(timeout)
        };

        match received {
            Ok(Some(packet)) => {
                if tx.send(packet).is_err() {
                    // Cycle loop is gone; nothing left to feed
                    break;
                }
            }
            Ok(None) => {
                // Timeout is the idle case, nothing to do
            }
            Err(e) => {
                log::error!("Transport receive error: {}", e);
                std::thread::sleep(Duration::from_millis(READ_ERROR_BACKOFF_MS));
            }
        }
    }

    log::debug!("Reader thread exiting");
}

/// The fixed-period engine loop
pub(crate) fn cycle_loop(inner: Arc<RobotInner>, rx: Receiver<TelemetryPacket>) {
    let period = inner.config.cycle_period();
    let mut reflector = super::reflect::StateReflector::new(inner.config.command_refresh());
    let mut stabilizing_since: Option<Instant> = None;

    log::info!(
        "Cycle loop started (period {}ms, timeout {}ms)",
        inner.config.cycle_period_ms,
        inner.config.connection_timeout_ms
    );

    loop {
        let cycle_start = Instant::now();
        if inner.stop_requested.load(Ordering::Acquire) {
            break;
        }

        // 1. Drain and dispatch packets
        let got_state_packet = drain_packets(&inner, &rx);

        // 2. Connection state machine + staleness
        update_connection(&inner, got_state_packet, &mut stabilizing_since, &mut reflector);

        // 3. Sensor interpretation hooks
        inner.run_sensor_interp_hooks();

        // 4. Action resolution
        let resolved = {
            let mut actions = inner.actions.lock();
            inner
                .resolver
                .lock()
                .resolve(&mut actions, inner.config.log_actions)
        };
        *inner.last_resolved.lock() = resolved;

        // 5. Reflect into outgoing commands, direct motion first per channel
        let now = Instant::now();
        let window = inner.config.direct_precedence();
        let (direct_trans, direct_rot, direct_lat) = {
            let mut direct = inner.direct.lock();
            (
                direct.trans_active(now, window),
                direct.rot_active(now, window),
                direct.lat_active(now, window),
            )
        };

        if *inner.conn.lock() == ConnectionState::Connected {
            let heading = inner.state.lock().pose.heading;
            let commands =
                reflector.reflect(&resolved, direct_trans, direct_rot, direct_lat, heading, now);
            if !commands.is_empty() {
                let mut transport = inner.transport.lock();
                let mut failed = false;
                for cmd in &commands {
                    if let Err(e) = transport.send(cmd) {
                        log::error!("Command send failed: {}", e);
                        failed = true;
                        break;
                    }
                }
                drop(transport);
                if failed {
                    inner.set_connection_state(ConnectionState::Disconnected);
                }
            }
        }

        // 6. Sleep out the period
        let elapsed = cycle_start.elapsed();
        if elapsed.as_millis() as u64 > inner.config.cycle_overrun_warn_ms {
            log::warn!(
                "Cycle overrun: {}ms (period {}ms)",
                elapsed.as_millis(),
                inner.config.cycle_period_ms
            );
        }
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }

    inner.set_connection_state(ConnectionState::Disconnected);
    *inner.run_exited.lock() = true;
    inner.run_cond.notify_all();
    log::info!("Cycle loop exited");
}

/// Drain the packet queue into the state snapshot; returns whether a valid
/// status packet was applied
fn drain_packets(inner: &RobotInner, rx: &Receiver<TelemetryPacket>) -> bool {
    let mut got_state_packet = false;
    let mut state = inner.state.lock();
    state.begin_cycle();

    while let Ok(packet) = rx.try_recv() {
        match packet {
            TelemetryPacket::Status(pkt) => {
                if state.apply_status(&pkt) {
                    got_state_packet = true;
                } else {
                    log::warn!("Malformed status packet dropped");
                }
            }
            TelemetryPacket::Io(pkt) => {
                if !state.apply_io(&pkt) {
                    log::warn!("Malformed IO packet dropped");
                }
            }
            TelemetryPacket::Encoder(pkt) => {
                if !state.apply_encoder(&pkt) {
                    log::warn!("Malformed encoder packet dropped");
                }
            }
            TelemetryPacket::Other { id, payload } => {
                let mut handlers = inner.packet_handlers.lock();
                match handlers.get_mut(&id) {
                    Some(handler) => {
                        if !handler(payload.as_slice(), &mut *state) {
                            log::warn!("Handler rejected packet id 0x{:02X}", id);
                        }
                    }
                    None => {
                        log::trace!("Unhandled packet id 0x{:02X} ({} bytes)", id, payload.len());
                    }
                }
            }
        }
    }

    got_state_packet
}

/// Advance the connection state machine
fn update_connection(
    inner: &RobotInner,
    got_state_packet: bool,
    stabilizing_since: &mut Option<Instant>,
    reflector: &mut super::reflect::StateReflector,
) {
    let current = *inner.conn.lock();
    let timeout = inner.config.connection_timeout();

    let stale = {
        let state = inner.state.lock();
        match state.last_packet {
            Some(at) => at.elapsed() > timeout,
            None => false,
        }
    };

    match current {
        ConnectionState::Connecting => {
            if got_state_packet {
                *stabilizing_since = Some(Instant::now());
                inner.set_connection_state(ConnectionState::Stabilizing);
            }
        }
        ConnectionState::Stabilizing => {
            if stale {
                *stabilizing_since = None;
                inner.set_connection_state(ConnectionState::Disconnected);
            } else if stabilizing_since
                .map(|since| since.elapsed() >= inner.config.stabilizing())
                .unwrap_or(true)
            {
                *stabilizing_since = None;
                // Device may have rebooted since we last latched setpoints
                reflector.reset();
                inner.set_connection_state(ConnectionState::Connected);
            }
        }
        ConnectionState::Connected => {
            if stale {
                log::warn!(
                    "No state packet for more than {}ms, connection lost",
                    inner.config.connection_timeout_ms
                );
                inner.set_connection_state(ConnectionState::Disconnected);
            }
        }
        ConnectionState::Disconnected => {
            // A device that starts talking again re-enters through the
            // stabilizing grace period
            if got_state_packet {
                *stabilizing_since = Some(Instant::now());
                inner.set_connection_state(ConnectionState::Stabilizing);
            }
        }
    }
}
