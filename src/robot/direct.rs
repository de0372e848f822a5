//! Direct motion override tracking
//!
//! Explicit motion calls made outside the action/resolver path (teleop,
//! scripted moves) take precedence over action-driven output on the same
//! channel for a bounded window. The translation and rotation channels are
//! tracked independently: a direct velocity command does not stop an action
//! from steering, and vice versa. Once the window elapses without a refresh,
//! actions regain the channel automatically.

use crate::types::Pose;
use std::time::{Duration, Instant};

/// Direct translational command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransCommand {
    /// Velocity setpoint in mm/s
    Velocity(f64),
    /// Device-profiled move of a fixed distance in mm
    MoveDistance(f64),
    /// Immediate stop
    Stop,
}

/// Direct rotational command
///
/// Relative heading requests are resolved to absolute headings at call time,
/// so refreshing the window does not re-apply the delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotCommand {
    /// Rotational velocity setpoint in deg/s
    RotVel(f64),
    /// Absolute heading setpoint in degrees
    Heading(f64),
}

/// Goal bookkeeping for the move-distance done predicate
#[derive(Debug, Clone, Copy)]
pub struct MoveGoal {
    /// Pose when the move was commanded
    pub start: Pose,
    /// Commanded distance in mm (negative = backward)
    pub distance: f64,
}

/// Per-channel direct motion state
#[derive(Default)]
pub struct DirectMotion {
    trans: Option<(TransCommand, Instant)>,
    rot: Option<(RotCommand, Instant)>,
    lat: Option<(f64, Instant)>,
    move_goal: Option<MoveGoal>,
    heading_goal: Option<f64>,
}

impl DirectMotion {
    /// Take over the translation channel
    pub fn set_trans(&mut self, cmd: TransCommand, now: Instant) {
        self.trans = Some((cmd, now));
    }

    /// Take over the rotation channel
    pub fn set_rot(&mut self, cmd: RotCommand, now: Instant) {
        self.rot = Some((cmd, now));
        if let RotCommand::Heading(deg) = cmd {
            self.heading_goal = Some(deg);
        }
    }

    /// Take over the lateral channel
    pub fn set_lat(&mut self, mm_per_sec: f64, now: Instant) {
        self.lat = Some((mm_per_sec, now));
    }

    /// Record a move-distance goal for the done predicate
    pub fn set_move_goal(&mut self, start: Pose, distance: f64) {
        self.move_goal = Some(MoveGoal { start, distance });
    }

    /// Stop both motion channels immediately
    pub fn stop(&mut self, now: Instant) {
        self.trans = Some((TransCommand::Stop, now));
        self.rot = Some((RotCommand::RotVel(0.0), now));
        self.lat = None;
        self.move_goal = None;
    }

    /// Hand control back to actions on every channel
    pub fn clear(&mut self) {
        self.trans = None;
        self.rot = None;
        self.lat = None;
    }

    /// Active translation override, purging it if the window expired
    pub fn trans_active(&mut self, now: Instant, window: Duration) -> Option<TransCommand> {
        purge(&mut self.trans, now, window);
        self.trans.map(|(cmd, _)| cmd)
    }

    /// Active rotation override, purging it if the window expired
    pub fn rot_active(&mut self, now: Instant, window: Duration) -> Option<RotCommand> {
        purge(&mut self.rot, now, window);
        self.rot.map(|(cmd, _)| cmd)
    }

    /// Active lateral override, purging it if the window expired
    pub fn lat_active(&mut self, now: Instant, window: Duration) -> Option<f64> {
        purge(&mut self.lat, now, window);
        self.lat.map(|(v, _)| v)
    }

    /// True if any channel is currently overridden
    pub fn any_active(&mut self, now: Instant, window: Duration) -> bool {
        self.trans_active(now, window).is_some()
            || self.rot_active(now, window).is_some()
            || self.lat_active(now, window).is_some()
    }

    /// Last commanded move goal, if any
    pub fn move_goal(&self) -> Option<MoveGoal> {
        self.move_goal
    }

    /// Last commanded absolute heading, if any
    pub fn heading_goal(&self) -> Option<f64> {
        self.heading_goal
    }
}

fn purge<T>(slot: &mut Option<(T, Instant)>, now: Instant, window: Duration) {
    let expired = matches!(slot, Some((_, at)) if now.duration_since(*at) >= window);
    if expired {
        *slot = None;
    }
}
