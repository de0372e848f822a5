//! Sarathi - task-cycle motion control runtime for mobile robots
//!
//! Maintains a live packet link to a robot's motor controller, keeps a
//! shared state snapshot current (odometry, battery, bumpers, sonar), and
//! resolves a priority-ordered set of pluggable behavior actions into one
//! coherent motion command per fixed-period cycle. Direct motion commands
//! override action output per channel for a bounded precedence window, and
//! loss of the link fails safe by suppressing all outgoing motion.
//!
//! ## Quick start
//!
//! ```no_run
//! use sarathi::{GotoStraight, Pose, Robot, RuntimeConfig};
//! use sarathi::transport::MockTransport;
//! use std::time::Duration;
//!
//! let mut robot = Robot::new(RuntimeConfig::default(), MockTransport::new())?;
//! robot.add_action(Box::new(GotoStraight::new("goto", 400.0)), 50);
//! robot.run_async()?;
//! robot.wait_for_connected(Duration::from_secs(10));
//! # Ok::<(), sarathi::Error>(())
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod packet;
pub mod resolver;
pub mod robot;
pub mod state;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use action::{Action, DesiredMotion, FULL_STRENGTH, GotoStraight, RotTarget, SpeedLimiter};
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use robot::{ConnectionState, ListPos, Robot, RobotHandle};
pub use types::Pose;
