//! Per-cycle desired motion record
//!
//! Each action proposes a [`DesiredMotion`] every cycle; the resolver merges
//! them in priority order into the single record the engine reflects to the
//! device. Every value channel carries a strength in [0, 1]: 0 means "not
//! requesting" and the channel is ignored outright, 1 means "full request"
//! and locks the channel against lower-priority contributions.
//!
//! # Merge rules
//!
//! Value channels blend: `value = value·(1−s) + new·s`, with the combined
//! strength `s_total = s_old + s_new·(1−s_old)` so repeated partial
//! contributions approach full strength asymptotically and never exceed it.
//!
//! Clamp channels do not blend. The tightest bound proposed by any active
//! action wins regardless of priority, so a low-priority limiter can always
//! tighten a bound set above it, never loosen it.

/// Full request strength
pub const FULL_STRENGTH: f64 = 1.0;

/// What an action asks of the rotational channel
///
/// Within one proposal the three request kinds are mutually exclusive:
/// setting one clears the others.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotTarget {
    /// Absolute heading in degrees
    Heading(f64),
    /// Rotational velocity in deg/s
    RotVel(f64),
    /// Heading change relative to the current heading, in degrees
    DeltaHeading(f64),
}

impl RotTarget {
    fn value(&self) -> f64 {
        match *self {
            RotTarget::Heading(v) | RotTarget::RotVel(v) | RotTarget::DeltaHeading(v) => v,
        }
    }

    fn with_value(&self, value: f64) -> RotTarget {
        match *self {
            RotTarget::Heading(_) => RotTarget::Heading(value),
            RotTarget::RotVel(_) => RotTarget::RotVel(value),
            RotTarget::DeltaHeading(_) => RotTarget::DeltaHeading(value),
        }
    }

    fn same_kind(&self, other: &RotTarget) -> bool {
        matches!(
            (self, other),
            (RotTarget::Heading(_), RotTarget::Heading(_))
                | (RotTarget::RotVel(_), RotTarget::RotVel(_))
                | (RotTarget::DeltaHeading(_), RotTarget::DeltaHeading(_))
        )
    }
}

/// Desired motion for one cycle: value channels with strengths plus
/// tightening-only bound channels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DesiredMotion {
    trans_vel: f64,
    trans_strength: f64,
    lat_vel: f64,
    lat_strength: f64,
    rot: Option<RotTarget>,
    rot_strength: f64,

    max_vel: Option<f64>,
    max_neg_vel: Option<f64>,
    max_rot_vel: Option<f64>,
    max_lat_vel: Option<f64>,
    trans_accel: Option<f64>,
    trans_decel: Option<f64>,
    rot_accel: Option<f64>,
    rot_decel: Option<f64>,
}

impl DesiredMotion {
    /// New record with nothing requested
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all channels; actions call this at the top of `fire`
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ------------------------------------------------------------------
    // Value channels
    // ------------------------------------------------------------------

    /// Request a translational velocity (mm/s) with the given strength
    pub fn set_vel(&mut self, mm_per_sec: f64, strength: f64) {
        self.trans_vel = mm_per_sec;
        self.trans_strength = strength.clamp(0.0, 1.0);
    }

    /// Request a lateral velocity (mm/s) with the given strength
    pub fn set_lat_vel(&mut self, mm_per_sec: f64, strength: f64) {
        self.lat_vel = mm_per_sec;
        self.lat_strength = strength.clamp(0.0, 1.0);
    }

    /// Request an absolute heading (degrees); clears any other rotational
    /// request in this record
    pub fn set_heading(&mut self, deg: f64, strength: f64) {
        self.set_rot(RotTarget::Heading(deg), strength);
    }

    /// Request a rotational velocity (deg/s); clears any other rotational
    /// request in this record
    pub fn set_rot_vel(&mut self, deg_per_sec: f64, strength: f64) {
        self.set_rot(RotTarget::RotVel(deg_per_sec), strength);
    }

    /// Request a relative heading change (degrees); clears any other
    /// rotational request in this record
    pub fn set_delta_heading(&mut self, deg: f64, strength: f64) {
        self.set_rot(RotTarget::DeltaHeading(deg), strength);
    }

    fn set_rot(&mut self, target: RotTarget, strength: f64) {
        self.rot = Some(target);
        self.rot_strength = strength.clamp(0.0, 1.0);
    }

    /// Translational request as (mm/s, strength); strength 0 means unset
    pub fn vel(&self) -> (f64, f64) {
        (self.trans_vel, self.trans_strength)
    }

    /// Lateral request as (mm/s, strength); strength 0 means unset
    pub fn lat_vel(&self) -> (f64, f64) {
        (self.lat_vel, self.lat_strength)
    }

    /// Rotational request, if any, with its strength
    pub fn rot(&self) -> Option<(RotTarget, f64)> {
        if self.rot_strength > 0.0 {
            self.rot.map(|r| (r, self.rot_strength))
        } else {
            None
        }
    }

    /// True if any value channel has nonzero strength or any bound is set
    pub fn has_any_request(&self) -> bool {
        self.trans_strength > 0.0
            || self.lat_strength > 0.0
            || self.rot_strength > 0.0
            || self.max_vel.is_some()
            || self.max_neg_vel.is_some()
            || self.max_rot_vel.is_some()
            || self.max_lat_vel.is_some()
            || self.trans_accel.is_some()
            || self.trans_decel.is_some()
            || self.rot_accel.is_some()
            || self.rot_decel.is_some()
    }

    // ------------------------------------------------------------------
    // Bound channels
    // ------------------------------------------------------------------

    /// Bound forward velocity to at most `mm_per_sec`
    pub fn set_max_vel(&mut self, mm_per_sec: f64) {
        self.max_vel = Some(mm_per_sec);
    }

    /// Bound backward velocity; `mm_per_sec` is negative, the value closest
    /// to zero is the tightest
    pub fn set_max_neg_vel(&mut self, mm_per_sec: f64) {
        self.max_neg_vel = Some(mm_per_sec);
    }

    /// Bound rotational speed to at most `deg_per_sec`
    pub fn set_max_rot_vel(&mut self, deg_per_sec: f64) {
        self.max_rot_vel = Some(deg_per_sec);
    }

    /// Bound lateral speed to at most `mm_per_sec`
    pub fn set_max_lat_vel(&mut self, mm_per_sec: f64) {
        self.max_lat_vel = Some(mm_per_sec);
    }

    /// Bound translational acceleration
    pub fn set_trans_accel(&mut self, mm_per_sec2: f64) {
        self.trans_accel = Some(mm_per_sec2);
    }

    /// Bound translational deceleration
    pub fn set_trans_decel(&mut self, mm_per_sec2: f64) {
        self.trans_decel = Some(mm_per_sec2);
    }

    /// Bound rotational acceleration
    pub fn set_rot_accel(&mut self, deg_per_sec2: f64) {
        self.rot_accel = Some(deg_per_sec2);
    }

    /// Bound rotational deceleration
    pub fn set_rot_decel(&mut self, deg_per_sec2: f64) {
        self.rot_decel = Some(deg_per_sec2);
    }

    /// Forward velocity bound, if any
    pub fn max_vel(&self) -> Option<f64> {
        self.max_vel
    }

    /// Backward velocity bound (negative), if any
    pub fn max_neg_vel(&self) -> Option<f64> {
        self.max_neg_vel
    }

    /// Rotational speed bound, if any
    pub fn max_rot_vel(&self) -> Option<f64> {
        self.max_rot_vel
    }

    /// Lateral speed bound, if any
    pub fn max_lat_vel(&self) -> Option<f64> {
        self.max_lat_vel
    }

    /// Translational acceleration bound, if any
    pub fn trans_accel(&self) -> Option<f64> {
        self.trans_accel
    }

    /// Translational deceleration bound, if any
    pub fn trans_decel(&self) -> Option<f64> {
        self.trans_decel
    }

    /// Rotational acceleration bound, if any
    pub fn rot_accel(&self) -> Option<f64> {
        self.rot_accel
    }

    /// Rotational deceleration bound, if any
    pub fn rot_decel(&self) -> Option<f64> {
        self.rot_decel
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Merge a lower-priority contribution into this accumulator
    ///
    /// Value channels blend weighted by the contribution's strength unless
    /// the accumulated strength already reached full, which locks the
    /// channel. The rotational channel only blends contributions of the same
    /// request kind; a contribution of a different kind than the accumulated
    /// one is ignored. Bound channels keep the tightest value seen.
    pub fn merge(&mut self, other: &DesiredMotion) {
        merge_channel(
            &mut self.trans_vel,
            &mut self.trans_strength,
            other.trans_vel,
            other.trans_strength,
        );
        merge_channel(
            &mut self.lat_vel,
            &mut self.lat_strength,
            other.lat_vel,
            other.lat_strength,
        );

        if other.rot_strength > 0.0
            && let Some(new_rot) = other.rot
        {
            match self.rot {
                None => {
                    // Empty accumulator still blends against an implicit
                    // zero, so a half-strength request yields half the value.
                    let mut value = 0.0;
                    let mut strength = self.rot_strength;
                    merge_channel(&mut value, &mut strength, new_rot.value(), other.rot_strength);
                    self.rot = Some(new_rot.with_value(value));
                    self.rot_strength = strength;
                }
                Some(acc) if acc.same_kind(&new_rot) => {
                    let mut value = acc.value();
                    merge_channel(
                        &mut value,
                        &mut self.rot_strength,
                        new_rot.value(),
                        other.rot_strength,
                    );
                    self.rot = Some(acc.with_value(value));
                }
                Some(_) => {
                    // Kind mismatch: the higher-priority request kind stands.
                }
            }
        }

        tighten_min(&mut self.max_vel, other.max_vel);
        tighten_max(&mut self.max_neg_vel, other.max_neg_vel);
        tighten_min(&mut self.max_rot_vel, other.max_rot_vel);
        tighten_min(&mut self.max_lat_vel, other.max_lat_vel);
        tighten_min(&mut self.trans_accel, other.trans_accel);
        tighten_min(&mut self.trans_decel, other.trans_decel);
        tighten_min(&mut self.rot_accel, other.rot_accel);
        tighten_min(&mut self.rot_decel, other.rot_decel);
    }
}

fn merge_channel(value: &mut f64, strength: &mut f64, new_value: f64, new_strength: f64) {
    if new_strength <= 0.0 || *strength >= FULL_STRENGTH {
        return;
    }
    *value = *value * (1.0 - new_strength) + new_value * new_strength;
    *strength = (*strength + new_strength * (1.0 - *strength)).min(FULL_STRENGTH);
}

fn tighten_min(bound: &mut Option<f64>, new: Option<f64>) {
    if let Some(n) = new {
        *bound = Some(match *bound {
            Some(b) => b.min(n),
            None => n,
        });
    }
}

fn tighten_max(bound: &mut Option<f64>, new: Option<f64>) {
    if let Some(n) = new {
        *bound = Some(match *bound {
            Some(b) => b.max(n),
            None => n,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_strength_scales_toward_zero_accumulator() {
        // Single rot-vel request at strength 0.5, value 30 deg/s, against an
        // empty accumulator: resolved value 15, strength 0.5.
        let mut acc = DesiredMotion::new();
        let mut d = DesiredMotion::new();
        d.set_rot_vel(30.0, 0.5);
        acc.merge(&d);

        let (rot, strength) = acc.rot().unwrap();
        assert_eq!(rot, RotTarget::RotVel(15.0));
        assert_eq!(strength, 0.5);
    }

    #[test]
    fn test_full_strength_locks_channel() {
        // Priority 10 proposes 200 mm/s at full strength; priority 5
        // proposes 400 mm/s at 0.6. Resolved: 200 mm/s, untouched.
        let mut acc = DesiredMotion::new();
        let mut high = DesiredMotion::new();
        high.set_vel(200.0, 1.0);
        let mut low = DesiredMotion::new();
        low.set_vel(400.0, 0.6);

        acc.merge(&high);
        acc.merge(&low);

        assert_eq!(acc.vel(), (200.0, 1.0));
    }

    #[test]
    fn test_strength_compounds_asymptotically() {
        // Resolved strength after merging s1..sn equals 1 - prod(1 - si),
        // monotonically non-decreasing, never above 1.
        let strengths = [0.3, 0.5, 0.2, 0.9];
        let mut acc = DesiredMotion::new();
        let mut expected = 0.0;
        for s in strengths {
            let mut d = DesiredMotion::new();
            d.set_vel(100.0, s);
            let before = acc.vel().1;
            acc.merge(&d);
            expected = expected + s * (1.0 - expected);
            let after = acc.vel().1;
            assert!(after >= before);
            assert!(after <= 1.0);
            assert!((after - expected).abs() < 1e-12);
        }
        let product: f64 = strengths.iter().map(|s| 1.0 - s).product();
        assert!((acc.vel().1 - (1.0 - product)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_strength_never_influences() {
        let mut acc = DesiredMotion::new();
        let mut high = DesiredMotion::new();
        high.set_vel(200.0, 0.5);
        acc.merge(&high);
        // Half strength against the empty accumulator: half the value
        assert_eq!(acc.vel(), (100.0, 0.5));

        let mut noop = DesiredMotion::new();
        noop.set_vel(9999.0, 0.0);
        acc.merge(&noop);

        assert_eq!(acc.vel(), (100.0, 0.5));
    }

    #[test]
    fn test_partial_blend() {
        let mut weak = DesiredMotion::new();
        weak.set_vel(0.0, 0.5);

        // Not locked yet: 0.8-strength then 0.5-strength blend
        let mut acc = DesiredMotion::new();
        let mut first = DesiredMotion::new();
        first.set_vel(200.0, 0.8);
        acc.merge(&first);
        acc.merge(&weak);
        // value: (200*0.8)*(1-0.5) + 0*0.5 = 80
        assert!((acc.vel().0 - 80.0).abs() < 1e-9);
        assert!((acc.vel().1 - 0.9).abs() < 1e-12);

        // Locked: full strength ignores the later contribution entirely
        let mut locked = DesiredMotion::new();
        let mut full = DesiredMotion::new();
        full.set_vel(200.0, 1.0);
        locked.merge(&full);
        locked.merge(&weak);
        assert_eq!(locked.vel(), (200.0, 1.0));
    }

    #[test]
    fn test_rot_exclusivity_within_record() {
        let mut d = DesiredMotion::new();
        d.set_heading(90.0, 1.0);
        d.set_rot_vel(30.0, 0.5);
        // Only the last request survives
        assert_eq!(d.rot(), Some((RotTarget::RotVel(30.0), 0.5)));
    }

    #[test]
    fn test_rot_kind_mismatch_ignored() {
        let mut acc = DesiredMotion::new();
        let mut high = DesiredMotion::new();
        high.set_heading(90.0, 0.5);
        acc.merge(&high);
        // Half-strength heading blended against the empty accumulator
        assert_eq!(acc.rot(), Some((RotTarget::Heading(45.0), 0.5)));

        let mut low = DesiredMotion::new();
        low.set_rot_vel(30.0, 1.0);
        acc.merge(&low);

        // Heading request from the higher priority stands, strength unchanged
        assert_eq!(acc.rot(), Some((RotTarget::Heading(45.0), 0.5)));
    }

    #[test]
    fn test_bounds_tighten_regardless_of_order() {
        let mut a = DesiredMotion::new();
        a.set_max_vel(600.0);
        a.set_max_neg_vel(-200.0);
        a.set_trans_decel(300.0);

        let mut b = DesiredMotion::new();
        b.set_max_vel(400.0);
        b.set_max_neg_vel(-350.0);
        b.set_trans_decel(150.0);

        let mut acc1 = DesiredMotion::new();
        acc1.merge(&a);
        acc1.merge(&b);

        let mut acc2 = DesiredMotion::new();
        acc2.merge(&b);
        acc2.merge(&a);

        for acc in [acc1, acc2] {
            assert_eq!(acc.max_vel(), Some(400.0));
            // Negative bound: closest to zero wins
            assert_eq!(acc.max_neg_vel(), Some(-200.0));
            assert_eq!(acc.trans_decel(), Some(150.0));
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut d = DesiredMotion::new();
        d.set_vel(100.0, 1.0);
        d.set_heading(45.0, 1.0);
        d.set_max_rot_vel(50.0);
        assert!(d.has_any_request());
        d.reset();
        assert!(!d.has_any_request());
        assert_eq!(d, DesiredMotion::new());
    }
}
