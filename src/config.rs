//! Configuration for the control runtime
//!
//! Loads configuration from a TOML file with the timing and sizing
//! parameters the task-cycle engine needs. Everything has a sensible
//! default so embedded deployments can run config-free.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration for the task-cycle engine
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Task cycle period in milliseconds
    ///
    /// One full receive → interpret → resolve → send iteration per period.
    /// The stock motor controllers this runtime was written against expect
    /// roughly 10 Hz command traffic, hence the 100ms default.
    pub cycle_period_ms: u64,

    /// Threshold above which a cycle logs an overrun warning (milliseconds)
    pub cycle_overrun_warn_ms: u64,

    /// Connection considered lost after this many milliseconds without a
    /// state packet
    pub connection_timeout_ms: u64,

    /// How long a direct motion command keeps precedence over action-driven
    /// motion before actions regain control (milliseconds)
    pub direct_precedence_ms: u64,

    /// Grace period after first contact before the robot is declared fully
    /// connected, allowing initial packets to arrive (milliseconds)
    pub stabilizing_ms: u64,

    /// Number of samples in the battery voltage running average
    pub battery_average_window: usize,

    /// Unchanged motion commands are re-sent after this interval so the
    /// device watchdog stays fed without flooding the link (milliseconds)
    pub command_refresh_ms: u64,

    /// Number of sonar slots tracked in the state snapshot
    pub sonar_slots: usize,

    /// Log which actions fired and what they contributed, every cycle
    pub log_actions: bool,
}

impl RuntimeConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use sarathi::config::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::from_file("sarathi.toml")?;
    /// # Ok::<(), sarathi::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: RuntimeConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check configuration values for consistency
    ///
    /// Returns an error for values the engine cannot operate with
    /// (zero cycle period, empty battery window, no sonar slots).
    pub fn validate(&self) -> Result<()> {
        if self.cycle_period_ms == 0 {
            return Err(Error::InvalidConfig("cycle_period_ms must be > 0".into()));
        }
        if self.battery_average_window == 0 {
            return Err(Error::InvalidConfig(
                "battery_average_window must be > 0".into(),
            ));
        }
        if self.sonar_slots == 0 {
            return Err(Error::InvalidConfig("sonar_slots must be > 0".into()));
        }
        if self.connection_timeout_ms < self.cycle_period_ms {
            return Err(Error::InvalidConfig(
                "connection_timeout_ms must be >= cycle_period_ms".into(),
            ));
        }
        Ok(())
    }

    /// Cycle period as a Duration
    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    /// Connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Direct motion precedence window as a Duration
    pub fn direct_precedence(&self) -> Duration {
        Duration::from_millis(self.direct_precedence_ms)
    }

    /// Stabilizing grace period as a Duration
    pub fn stabilizing(&self) -> Duration {
        Duration::from_millis(self.stabilizing_ms)
    }

    /// Command refresh interval as a Duration
    pub fn command_refresh(&self) -> Duration {
        Duration::from_millis(self.command_refresh_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_period_ms: 100,
            cycle_overrun_warn_ms: 200,
            connection_timeout_ms: 8000,
            direct_precedence_ms: 2000,
            stabilizing_ms: 0,
            battery_average_window: 20,
            command_refresh_ms: 500,
            sonar_slots: 16,
            log_actions: false,
        }
    }
}
