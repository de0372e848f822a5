//! Typed packet abstraction for the motor controller link
//!
//! The wire-level framing and checksums live behind the transport boundary;
//! this module only defines the decoded packet payloads the engine consumes
//! and the command payloads it emits. Unknown telemetry types are carried as
//! raw bytes so applications can register their own handlers for them.

use crate::types::Pose;

/// Telemetry packet received from the device
#[derive(Debug, Clone)]
pub enum TelemetryPacket {
    /// Periodic state packet (pose, velocities, battery, flags, sonar)
    Status(StatusPacket),
    /// Digital IO snapshot
    Io(IoPacket),
    /// Raw encoder pose, uncorrected by any localization
    Encoder(EncoderPacket),
    /// Unrecognized packet type, dispatched to registered custom handlers
    Other {
        /// Device-assigned packet type id
        id: u8,
        /// Undecoded payload bytes
        payload: Vec<u8>,
    },
}

/// One sonar reading inside a status packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SonarReading {
    /// Transducer index
    pub index: usize,
    /// Measured range in millimeters
    pub range_mm: f64,
}

/// Periodic device state packet
///
/// The device emits one of these every motor-controller cycle; the engine
/// folds it into the shared [`RobotState`](crate::state::RobotState)
/// snapshot. Fields a given controller does not report are left at their
/// defaults by the transport decoder.
#[derive(Debug, Clone, Default)]
pub struct StatusPacket {
    /// Corrected global pose
    pub pose: Pose,
    /// Translational velocity (mm/s)
    pub vel: f64,
    /// Rotational velocity (deg/s)
    pub rot_vel: f64,
    /// Lateral velocity (mm/s), zero on non-holonomic bases
    pub lat_vel: f64,
    /// Instantaneous battery voltage (volts)
    pub battery_volts: f64,
    /// Motor stall bits (left = bit 0, right = bit 8, device specific above)
    pub stall_flags: u16,
    /// Bumper contact bits
    pub bumper_flags: u16,
    /// Charger attached and charging
    pub charging: bool,
    /// Sonar readings updated since the previous status packet
    pub sonar: Vec<SonarReading>,
}

/// Digital IO snapshot packet
#[derive(Debug, Clone, Copy, Default)]
pub struct IoPacket {
    /// Digital input bits
    pub digital_in: u16,
    /// Digital output bits as last latched by the device
    pub digital_out: u16,
}

/// Raw encoder pose packet
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderPacket {
    /// Dead-reckoned pose in the encoder frame
    pub pose: Pose,
}

/// Motion command packet sent down to the device
///
/// Exactly one channel per variant; the cycle engine decides each cycle
/// which variants to (re)send. Velocities are mm/s and deg/s, distances
/// millimeters, headings absolute degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandPacket {
    /// Translational velocity setpoint
    SetVelocity { mm_per_sec: f64 },
    /// Rotational velocity setpoint
    SetRotVel { deg_per_sec: f64 },
    /// Absolute heading setpoint (device-side turn controller)
    SetHeading { deg: f64 },
    /// Lateral velocity setpoint (holonomic bases only)
    SetLatVel { mm_per_sec: f64 },
    /// Device-profiled move of a fixed distance (negative = backward)
    MoveDistance { mm: f64 },
    /// Upper bound on forward velocity
    SetMaxVel { mm_per_sec: f64 },
    /// Lower bound on backward velocity (value is negative)
    SetMaxNegVel { mm_per_sec: f64 },
    /// Upper bound on rotational speed
    SetMaxRotVel { deg_per_sec: f64 },
    /// Translational acceleration limit
    SetTransAccel { mm_per_sec2: f64 },
    /// Translational deceleration limit
    SetTransDecel { mm_per_sec2: f64 },
    /// Rotational acceleration limit
    SetRotAccel { deg_per_sec2: f64 },
    /// Rotational deceleration limit
    SetRotDecel { deg_per_sec2: f64 },
    /// Immediate stop on all channels
    Stop,
}
