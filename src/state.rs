//! Shared robot state snapshot
//!
//! One [`RobotState`] per engine, updated exclusively by the task-cycle
//! thread as packets arrive and read by actions and external callers through
//! the engine's locking accessors. Packet application validates before
//! mutating: a malformed packet is rejected as a unit and the previous
//! snapshot stays intact.

use crate::packet::{EncoderPacket, IoPacket, StatusPacket};
use crate::types::{Pose, sub_degrees};
use std::collections::VecDeque;
use std::time::Instant;

/// Running average over a fixed-size sample window
///
/// Used for battery voltage, which on real hardware dips sharply under motor
/// load and needs smoothing before anything acts on it.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl RunningAverage {
    /// Create an averager over the last `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: VecDeque::with_capacity(window.max(1)),
            sum: 0.0,
        }
    }

    /// Add a sample, evicting the oldest once the window is full
    pub fn add(&mut self, value: f64) {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    /// Current average, or 0.0 before any sample arrived
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True before any sample arrived
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One sonar transducer slot
#[derive(Debug, Clone, Copy)]
pub struct SonarSlot {
    /// Last measured range in millimeters, or negative if never read
    pub range_mm: f64,
    /// True if this slot was updated during the current cycle
    pub fresh: bool,
    /// When the slot was last updated
    pub updated: Option<Instant>,
}

impl Default for SonarSlot {
    fn default() -> Self {
        Self {
            range_mm: -1.0,
            fresh: false,
            updated: None,
        }
    }
}

/// Trip odometer accumulated from pose deltas
#[derive(Debug, Clone, Copy)]
pub struct TripOdometer {
    /// Total distance traveled in millimeters
    pub distance_mm: f64,
    /// Total heading change in degrees (absolute, both directions add)
    pub degrees: f64,
    /// When the odometer was last reset
    pub since: Instant,
}

impl TripOdometer {
    fn new() -> Self {
        Self {
            distance_mm: 0.0,
            degrees: 0.0,
            since: Instant::now(),
        }
    }
}

/// Most recently received robot state
pub struct RobotState {
    /// Corrected global pose
    pub pose: Pose,
    /// Raw dead-reckoned pose in the encoder frame
    pub encoder_pose: Pose,
    /// Translational velocity (mm/s)
    pub vel: f64,
    /// Rotational velocity (deg/s)
    pub rot_vel: f64,
    /// Lateral velocity (mm/s)
    pub lat_vel: f64,
    /// Instantaneous battery voltage (volts)
    pub battery_volts: f64,
    /// Smoothed battery voltage
    pub battery_average: RunningAverage,
    /// Motor stall bits
    pub stall_flags: u16,
    /// Bumper contact bits
    pub bumper_flags: u16,
    /// Charger attached and charging
    pub charging: bool,
    /// Digital input bits from the last IO packet
    pub digital_in: u16,
    /// Digital output bits from the last IO packet
    pub digital_out: u16,
    /// Sonar slots, indexed by transducer
    pub sonar: Vec<SonarSlot>,
    /// When the last state packet was applied
    pub last_packet: Option<Instant>,
    /// Count of state packets applied since startup
    pub packets_received: u64,
    /// Trip odometer
    pub odometer: TripOdometer,
}

impl RobotState {
    /// Create an empty snapshot with the given sonar slot count and battery
    /// averaging window
    pub fn new(sonar_slots: usize, battery_window: usize) -> Self {
        Self {
            pose: Pose::default(),
            encoder_pose: Pose::default(),
            vel: 0.0,
            rot_vel: 0.0,
            lat_vel: 0.0,
            battery_volts: 0.0,
            battery_average: RunningAverage::new(battery_window),
            stall_flags: 0,
            bumper_flags: 0,
            charging: false,
            digital_in: 0,
            digital_out: 0,
            sonar: vec![SonarSlot::default(); sonar_slots],
            last_packet: None,
            packets_received: 0,
            odometer: TripOdometer::new(),
        }
    }

    /// Clear per-cycle flags; called by the engine at the top of each cycle
    /// before draining the packet queue
    pub fn begin_cycle(&mut self) {
        for slot in &mut self.sonar {
            slot.fresh = false;
        }
    }

    /// Apply a status packet, returning false if it is malformed
    ///
    /// Validation rejects non-finite numbers and out-of-range sonar indices;
    /// a rejected packet leaves the snapshot untouched.
    pub fn apply_status(&mut self, pkt: &StatusPacket) -> bool {
        let finite = [
            pkt.pose.x,
            pkt.pose.y,
            pkt.pose.heading,
            pkt.vel,
            pkt.rot_vel,
            pkt.lat_vel,
            pkt.battery_volts,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite || pkt.battery_volts < 0.0 {
            return false;
        }
        for reading in &pkt.sonar {
            if reading.index >= self.sonar.len()
                || !reading.range_mm.is_finite()
                || reading.range_mm < 0.0
            {
                return false;
            }
        }

        // Odometer accumulates from the previous applied pose; the first
        // packet only establishes the baseline.
        if self.last_packet.is_some() {
            self.odometer.distance_mm += self.pose.distance_to(&pkt.pose);
            self.odometer.degrees += sub_degrees(pkt.pose.heading, self.pose.heading).abs();
        }

        self.pose = pkt.pose;
        self.vel = pkt.vel;
        self.rot_vel = pkt.rot_vel;
        self.lat_vel = pkt.lat_vel;
        self.battery_volts = pkt.battery_volts;
        self.battery_average.add(pkt.battery_volts);
        self.stall_flags = pkt.stall_flags;
        self.bumper_flags = pkt.bumper_flags;
        self.charging = pkt.charging;

        let now = Instant::now();
        for reading in &pkt.sonar {
            let slot = &mut self.sonar[reading.index];
            slot.range_mm = reading.range_mm;
            slot.fresh = true;
            slot.updated = Some(now);
        }

        self.last_packet = Some(now);
        self.packets_received += 1;
        true
    }

    /// Apply an IO packet, returning false if it is malformed
    pub fn apply_io(&mut self, pkt: &IoPacket) -> bool {
        self.digital_in = pkt.digital_in;
        self.digital_out = pkt.digital_out;
        true
    }

    /// Apply an encoder pose packet, returning false if it is malformed
    pub fn apply_encoder(&mut self, pkt: &EncoderPacket) -> bool {
        if ![pkt.pose.x, pkt.pose.y, pkt.pose.heading]
            .iter()
            .all(|v| v.is_finite())
        {
            return false;
        }
        self.encoder_pose = pkt.pose;
        true
    }

    /// Smoothed battery voltage
    pub fn battery_voltage(&self) -> f64 {
        self.battery_average.average()
    }

    /// True if any stall bit is set
    pub fn is_stalled(&self) -> bool {
        self.stall_flags != 0
    }

    /// True if any bumper bit is set
    pub fn is_bumped(&self) -> bool {
        self.bumper_flags != 0
    }

    /// Range of a sonar slot, or None for an invalid or never-read slot
    pub fn sonar_range(&self, index: usize) -> Option<f64> {
        let slot = self.sonar.get(index)?;
        if slot.range_mm < 0.0 {
            None
        } else {
            Some(slot.range_mm)
        }
    }

    /// Reset the trip odometer
    pub fn reset_trip_odometer(&mut self) {
        self.odometer = TripOdometer::new();
    }
}
