//! Priority-based action resolution
//!
//! The resolver walks the registered actions from highest priority to
//! lowest, fires each active one, and merges the returned proposals into a
//! single [`DesiredMotion`] using the channel rules documented on that type.
//! Among equal priorities the first-registered action fires first, which
//! makes the full-strength tie-break deterministic: first registered wins.
//!
//! An action that panics inside `fire` is isolated — the panic is caught and
//! logged, the action contributes nothing this cycle, and resolution
//! continues with the remaining actions.

use crate::action::{Action, DesiredMotion};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Priority-ordered action registry
///
/// A multi-map keyed by integer priority. Higher priorities fire first;
/// insertion order among equal priorities is preserved.
#[derive(Default)]
pub struct ActionRegistry {
    actions: BTreeMap<i32, Vec<Box<dyn Action>>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action at the given priority
    ///
    /// Returns false (and does not register) if an action with the same name
    /// is already present at that priority — re-adding the same behavior
    /// twice is almost always a caller bug.
    pub fn add(&mut self, action: Box<dyn Action>, priority: i32) -> bool {
        let slot = self.actions.entry(priority).or_default();
        if slot.iter().any(|a| a.name() == action.name()) {
            log::warn!(
                "Rejecting duplicate action '{}' at priority {}",
                action.name(),
                priority
            );
            return false;
        }
        slot.push(action);
        true
    }

    /// Remove the first action with the given name, scanning from the
    /// highest priority down, and return it
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Action>> {
        let mut found: Option<i32> = None;
        for (&priority, slot) in self.actions.iter().rev() {
            if slot.iter().any(|a| a.name() == name) {
                found = Some(priority);
                break;
            }
        }
        let priority = found?;
        let slot = self.actions.get_mut(&priority)?;
        let idx = slot.iter().position(|a| a.name() == name)?;
        let action = slot.remove(idx);
        if slot.is_empty() {
            self.actions.remove(&priority);
        }
        Some(action)
    }

    /// Find the first action with the given name, highest priority first
    pub fn find_mut(&mut self, name: &str) -> Option<&mut dyn Action> {
        for slot in self.actions.values_mut().rev() {
            for action in slot.iter_mut() {
                if action.name() == name {
                    return Some(action.as_mut());
                }
            }
        }
        None
    }

    /// Total number of registered actions
    pub fn len(&self) -> usize {
        self.actions.values().map(Vec::len).sum()
    }

    /// True if no actions are registered
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered (priority, name) pairs in firing order
    pub fn firing_order(&self) -> Vec<(i32, String)> {
        let mut out = Vec::with_capacity(self.len());
        for (&priority, slot) in self.actions.iter().rev() {
            for action in slot {
                out.push((priority, action.name().to_string()));
            }
        }
        out
    }

    /// Drop all registered actions
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    fn iter_firing_order(&mut self) -> impl Iterator<Item = &mut Box<dyn Action>> {
        self.actions.values_mut().rev().flatten()
    }
}

/// Default resolver: priority walk with strength blending
pub struct PriorityResolver {
    desired: DesiredMotion,
}

impl PriorityResolver {
    /// Create a resolver
    pub fn new() -> Self {
        Self {
            desired: DesiredMotion::new(),
        }
    }

    /// Combine all active actions' proposals into one desired motion
    ///
    /// With `log_actions` set, logs which actions fired and whether they
    /// contributed, for diagnostics.
    pub fn resolve(&mut self, registry: &mut ActionRegistry, log_actions: bool) -> DesiredMotion {
        self.desired.reset();

        for action in registry.iter_firing_order() {
            if !action.is_active() {
                continue;
            }
            let current = self.desired;
            let name = action.name().to_string();
            let fired = catch_unwind(AssertUnwindSafe(|| action.fire(&current)));
            match fired {
                Ok(Some(contribution)) => {
                    if log_actions {
                        log::debug!("Resolver: '{}' fired: {:?}", name, contribution);
                    }
                    self.desired.merge(&contribution);
                }
                Ok(None) => {
                    if log_actions {
                        log::debug!("Resolver: '{}' fired: no contribution", name);
                    }
                }
                Err(payload) => {
                    let msg = panic_message(&payload);
                    log::error!(
                        "Resolver: action '{}' panicked during fire ({}); \
                         treating as no contribution",
                        name,
                        msg
                    );
                }
            }
        }

        self.desired
    }
}

impl Default for PriorityResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FULL_STRENGTH;
    use crate::action::RotTarget;

    /// Test action proposing a fixed translational velocity
    struct VelAction {
        name: String,
        vel: f64,
        strength: f64,
        active: bool,
    }

    impl VelAction {
        fn boxed(name: &str, vel: f64, strength: f64) -> Box<dyn Action> {
            Box::new(Self {
                name: name.to_string(),
                vel,
                strength,
                active: true,
            })
        }
    }

    impl Action for VelAction {
        fn name(&self) -> &str {
            &self.name
        }
        fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
            let mut d = DesiredMotion::new();
            d.set_vel(self.vel, self.strength);
            Some(d)
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn set_active(&mut self, active: bool) {
            self.active = active;
        }
    }

    struct PanicAction;

    impl Action for PanicAction {
        fn name(&self) -> &str {
            "panics"
        }
        fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
            panic!("intentional test panic");
        }
    }

    struct MaxVelAction {
        max: f64,
    }

    impl Action for MaxVelAction {
        fn name(&self) -> &str {
            "limit"
        }
        fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
            let mut d = DesiredMotion::new();
            d.set_max_vel(self.max);
            Some(d)
        }
    }

    #[test]
    fn test_priority_lock_scenario() {
        // Priorities 10 and 5 propose 200 @ 1.0 and 400 @ 0.6; resolved
        // velocity must be exactly 200 with priority 5 discarded.
        let mut registry = ActionRegistry::new();
        assert!(registry.add(VelAction::boxed("high", 200.0, 1.0), 10));
        assert!(registry.add(VelAction::boxed("low", 400.0, 0.6), 5));

        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        assert_eq!(resolved.vel(), (200.0, FULL_STRENGTH));
    }

    #[test]
    fn test_single_partial_rot_scenario() {
        struct RotAction;
        impl Action for RotAction {
            fn name(&self) -> &str {
                "rot"
            }
            fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
                let mut d = DesiredMotion::new();
                d.set_rot_vel(30.0, 0.5);
                Some(d)
            }
        }

        let mut registry = ActionRegistry::new();
        registry.add(Box::new(RotAction), 1);
        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        assert_eq!(resolved.rot(), Some((RotTarget::RotVel(15.0), 0.5)));
    }

    #[test]
    fn test_clamp_independent_of_priority() {
        // The low-priority limiter must still win the bound.
        let mut registry = ActionRegistry::new();
        registry.add(Box::new(MaxVelAction { max: 600.0 }), 100);
        registry.add(Box::new(MaxVelAction { max: 250.0 }), 1);

        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        assert_eq!(resolved.max_vel(), Some(250.0));
    }

    #[test]
    fn test_inactive_action_skipped() {
        let mut registry = ActionRegistry::new();
        registry.add(VelAction::boxed("a", 200.0, 1.0), 10);
        registry.add(VelAction::boxed("b", 400.0, 1.0), 5);
        registry.find_mut("a").unwrap().deactivate();

        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        assert_eq!(resolved.vel(), (400.0, 1.0));
    }

    #[test]
    fn test_panicking_action_isolated() {
        let mut registry = ActionRegistry::new();
        registry.add(Box::new(PanicAction), 10);
        registry.add(VelAction::boxed("ok", 150.0, 1.0), 5);

        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        // The panicking action contributed nothing; the lower one resolved.
        assert_eq!(resolved.vel(), (150.0, 1.0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_equal_priority_first_registered_wins() {
        let mut registry = ActionRegistry::new();
        registry.add(VelAction::boxed("first", 100.0, 1.0), 5);
        registry.add(VelAction::boxed("second", 900.0, 1.0), 5);

        let resolved = PriorityResolver::new().resolve(&mut registry, false);
        assert_eq!(resolved.vel(), (100.0, 1.0));
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut registry = ActionRegistry::new();
        registry.add(VelAction::boxed("a", 1.0, 1.0), 10);
        registry.add(VelAction::boxed("b", 2.0, 1.0), 5);
        let before = registry.firing_order();

        assert!(registry.add(VelAction::boxed("temp", 3.0, 1.0), 7));
        assert!(registry.remove("temp").is_some());

        assert_eq!(registry.firing_order(), before);
        assert!(registry.remove("temp").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ActionRegistry::new();
        assert!(registry.add(VelAction::boxed("dup", 1.0, 1.0), 5));
        assert!(!registry.add(VelAction::boxed("dup", 2.0, 1.0), 5));
        // Same name at a different priority is allowed
        assert!(registry.add(VelAction::boxed("dup", 3.0, 1.0), 6));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_firing_order_high_to_low() {
        let mut registry = ActionRegistry::new();
        registry.add(VelAction::boxed("low", 0.0, 0.0), 1);
        registry.add(VelAction::boxed("high", 0.0, 0.0), 9);
        registry.add(VelAction::boxed("mid", 0.0, 0.0), 5);

        let order: Vec<String> = registry
            .firing_order()
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(order, ["high", "mid", "low"]);
    }
}
