//! Speed limiter action
//!
//! Contributes only bound channels, never values. Because bounds resolve by
//! tightest-wins rather than priority, this works registered at any
//! priority — typically a low one, well below the behaviors it restrains.

use super::{Action, DesiredMotion};

/// Action that caps translational and rotational speed
pub struct SpeedLimiter {
    name: String,
    desired: DesiredMotion,
    active: bool,
    max_vel: f64,
    max_neg_vel: Option<f64>,
    max_rot_vel: Option<f64>,
}

impl SpeedLimiter {
    /// Limit forward speed to `max_vel` mm/s
    pub fn new(name: &str, max_vel: f64) -> Self {
        Self {
            name: name.to_string(),
            desired: DesiredMotion::new(),
            active: true,
            max_vel,
            max_neg_vel: None,
            max_rot_vel: None,
        }
    }

    /// Also limit backward speed; `mm_per_sec` is negative
    pub fn with_max_neg_vel(mut self, mm_per_sec: f64) -> Self {
        self.max_neg_vel = Some(mm_per_sec);
        self
    }

    /// Also limit rotational speed
    pub fn with_max_rot_vel(mut self, deg_per_sec: f64) -> Self {
        self.max_rot_vel = Some(deg_per_sec);
        self
    }

    /// Change the forward speed limit
    pub fn set_max_vel(&mut self, mm_per_sec: f64) {
        self.max_vel = mm_per_sec;
    }
}

impl Action for SpeedLimiter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
        self.desired.reset();
        self.desired.set_max_vel(self.max_vel);
        if let Some(v) = self.max_neg_vel {
            self.desired.set_max_neg_vel(v);
        }
        if let Some(v) = self.max_rot_vel {
            self.desired.set_max_rot_vel(v);
        }
        Some(self.desired)
    }
}
