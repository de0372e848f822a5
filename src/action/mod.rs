//! Action behavior units
//!
//! An action is a named, independently activatable behavior that proposes a
//! [`DesiredMotion`] each cycle. Actions are registered on the engine with an
//! integer priority and queried by the resolver from highest priority down;
//! see [`crate::resolver`] for how competing proposals are combined.
//!
//! Implementations must not block inside `fire` — it runs on the engine
//! thread inside the fixed cycle budget. Anything needing asynchronous work
//! polls a flag across cycles instead of waiting.

mod desired;
pub mod goto;
pub mod limiter;

pub use desired::{DesiredMotion, FULL_STRENGTH, RotTarget};
pub use goto::GotoStraight;
pub use limiter::SpeedLimiter;

use crate::robot::RobotHandle;

/// Behavior unit queried for desired motion every cycle
///
/// The common implementation pattern keeps one persistent [`DesiredMotion`]
/// in the struct, calls `reset()` on it at the top of `fire`, sets only the
/// wanted channels, and returns a copy. Returning `None` means "nothing to
/// contribute this cycle".
pub trait Action: Send {
    /// Name of this action; uniqueness is not enforced, lookups return the
    /// first match
    fn name(&self) -> &str;

    /// Propose motion for this cycle
    ///
    /// `current` is the result resolved so far from higher-priority actions,
    /// provided as a read-only hint; the returned record is this action's
    /// own independent contribution, not a mutation of the input.
    fn fire(&mut self, current: &DesiredMotion) -> Option<DesiredMotion>;

    /// Whether this action participates in resolution
    fn is_active(&self) -> bool {
        true
    }

    /// Set the activation flag
    fn set_active(&mut self, active: bool) {
        let _ = active;
    }

    /// Activate the action
    fn activate(&mut self) {
        self.set_active(true);
    }

    /// Deactivate the action; the resolver skips it entirely
    fn deactivate(&mut self) {
        self.set_active(false);
    }

    /// Receive a handle to the engine the action was registered on
    ///
    /// Called once at registration. The handle is non-owning: dropping the
    /// engine invalidates nothing the action must clean up, and the action
    /// never controls the engine's lifetime.
    fn attach(&mut self, robot: RobotHandle) {
        let _ = robot;
    }
}
