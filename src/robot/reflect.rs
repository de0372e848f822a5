//! State reflection: desired motion → outgoing command packets
//!
//! Runs at the tail of every cycle. Each output channel is latched: a
//! command is sent only when its value changed since the last send, or when
//! the refresh interval elapsed — the refresh keeps the device watchdog fed
//! without flooding the link with identical packets, the same cadence
//! discipline the stock controllers expect from their heartbeat traffic.
//!
//! Direct motion overrides are applied per channel here: an overridden
//! channel reflects the direct command, the others reflect resolver output.

use super::direct::{RotCommand, TransCommand};
use crate::action::{DesiredMotion, RotTarget};
use crate::packet::CommandPacket;
use crate::types::norm_degrees;
use std::time::{Duration, Instant};

/// One latched output channel
#[derive(Default)]
struct Latched {
    last: Option<CommandPacket>,
    sent_at: Option<Instant>,
}

impl Latched {
    /// Queue `cmd` if it changed or the refresh interval elapsed
    fn push(
        &mut self,
        cmd: CommandPacket,
        now: Instant,
        refresh: Duration,
        out: &mut Vec<CommandPacket>,
    ) {
        let due = match (self.last, self.sent_at) {
            (Some(last), Some(at)) => last != cmd || now.duration_since(at) >= refresh,
            _ => true,
        };
        if due {
            self.last = Some(cmd);
            self.sent_at = Some(now);
            out.push(cmd);
        }
    }

    fn reset(&mut self) {
        self.last = None;
        self.sent_at = None;
    }
}

/// Reflects resolved/overridden motion into the minimal set of command
/// packets for this cycle
pub struct StateReflector {
    refresh: Duration,
    trans: Latched,
    rot: Latched,
    lat: Latched,
    max_vel: Latched,
    max_neg_vel: Latched,
    max_rot_vel: Latched,
    trans_accel: Latched,
    trans_decel: Latched,
    rot_accel: Latched,
    rot_decel: Latched,
}

impl StateReflector {
    /// Create a reflector with the given refresh interval
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            trans: Latched::default(),
            rot: Latched::default(),
            lat: Latched::default(),
            max_vel: Latched::default(),
            max_neg_vel: Latched::default(),
            max_rot_vel: Latched::default(),
            trans_accel: Latched::default(),
            trans_decel: Latched::default(),
            rot_accel: Latched::default(),
            rot_decel: Latched::default(),
        }
    }

    /// Forget all latched values, forcing a full resend
    ///
    /// Called on reconnect: the device may have rebooted and lost every
    /// setpoint we latched.
    pub fn reset(&mut self) {
        self.trans.reset();
        self.rot.reset();
        self.lat.reset();
        self.max_vel.reset();
        self.max_neg_vel.reset();
        self.max_rot_vel.reset();
        self.trans_accel.reset();
        self.trans_decel.reset();
        self.rot_accel.reset();
        self.rot_decel.reset();
    }

    /// Compute this cycle's outgoing command packets
    ///
    /// `current_heading` is needed to resolve relative heading requests into
    /// absolute setpoints before they go on the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn reflect(
        &mut self,
        resolved: &DesiredMotion,
        direct_trans: Option<TransCommand>,
        direct_rot: Option<RotCommand>,
        direct_lat: Option<f64>,
        current_heading: f64,
        now: Instant,
    ) -> Vec<CommandPacket> {
        let mut out = Vec::new();

        // Translation: direct override first, resolver output otherwise.
        // Direct commands bypass action-proposed bounds; the caller asked
        // for that exact motion.
        if let Some(cmd) = direct_trans {
            let pkt = match cmd {
                TransCommand::Velocity(v) => CommandPacket::SetVelocity { mm_per_sec: v },
                TransCommand::MoveDistance(d) => CommandPacket::MoveDistance { mm: d },
                TransCommand::Stop => CommandPacket::Stop,
            };
            self.trans.push(pkt, now, self.refresh, &mut out);
        } else {
            let (vel, strength) = resolved.vel();
            if strength > 0.0 {
                let mut v = vel;
                if let Some(max) = resolved.max_vel() {
                    v = v.min(max);
                }
                if let Some(min) = resolved.max_neg_vel() {
                    v = v.max(min);
                }
                self.trans
                    .push(CommandPacket::SetVelocity { mm_per_sec: v }, now, self.refresh, &mut out);
            }
        }

        // Rotation
        if let Some(cmd) = direct_rot {
            let pkt = match cmd {
                RotCommand::RotVel(w) => CommandPacket::SetRotVel { deg_per_sec: w },
                RotCommand::Heading(h) => CommandPacket::SetHeading { deg: h },
            };
            self.rot.push(pkt, now, self.refresh, &mut out);
        } else if let Some((target, _strength)) = resolved.rot() {
            let pkt = match target {
                RotTarget::Heading(h) => CommandPacket::SetHeading { deg: norm_degrees(h) },
                RotTarget::DeltaHeading(d) => CommandPacket::SetHeading {
                    deg: norm_degrees(current_heading + d),
                },
                RotTarget::RotVel(w) => {
                    let mut w = w;
                    if let Some(max) = resolved.max_rot_vel() {
                        w = w.clamp(-max, max);
                    }
                    CommandPacket::SetRotVel { deg_per_sec: w }
                }
            };
            self.rot.push(pkt, now, self.refresh, &mut out);
        }

        // Lateral
        if let Some(v) = direct_lat {
            self.lat
                .push(CommandPacket::SetLatVel { mm_per_sec: v }, now, self.refresh, &mut out);
        } else {
            let (lat, strength) = resolved.lat_vel();
            if strength > 0.0 {
                let mut v = lat;
                if let Some(max) = resolved.max_lat_vel() {
                    v = v.clamp(-max, max);
                }
                self.lat
                    .push(CommandPacket::SetLatVel { mm_per_sec: v }, now, self.refresh, &mut out);
            }
        }

        // Bound channels go to the device as well so its own profiler
        // enforces them between our cycles.
        if let Some(v) = resolved.max_vel() {
            self.max_vel
                .push(CommandPacket::SetMaxVel { mm_per_sec: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.max_neg_vel() {
            self.max_neg_vel
                .push(CommandPacket::SetMaxNegVel { mm_per_sec: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.max_rot_vel() {
            self.max_rot_vel
                .push(CommandPacket::SetMaxRotVel { deg_per_sec: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.trans_accel() {
            self.trans_accel
                .push(CommandPacket::SetTransAccel { mm_per_sec2: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.trans_decel() {
            self.trans_decel
                .push(CommandPacket::SetTransDecel { mm_per_sec2: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.rot_accel() {
            self.rot_accel
                .push(CommandPacket::SetRotAccel { deg_per_sec2: v }, now, self.refresh, &mut out);
        }
        if let Some(v) = resolved.rot_decel() {
            self.rot_decel
                .push(CommandPacket::SetRotDecel { deg_per_sec2: v }, now, self.refresh, &mut out);
        }

        out
    }
}
