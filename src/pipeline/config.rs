//! Pipeline controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from controller configuration validation.
#[derive(Debug, Error)]
pub enum ControllerConfigError {
    #[error("Invalid controller configuration: {0}")]
    Invalid(String),
}

/// Tunables for the pipeline controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Cadence of the background sweep that admits selected records.
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Maximum records enqueued per sweep cycle.
    pub sweep_batch: usize,

    /// Records stuck in the generating stage longer than this are
    /// reverted to selected by the sweep. Covers jobs lost to a crash
    /// between claim and terminal outcome.
    #[serde(with = "duration_secs")]
    pub stuck_after: Duration,

    /// Default priority for sweep-admitted jobs. Manual triggers pass
    /// their own.
    pub sweep_priority: i32,

    /// Consecutive terminally-failed jobs after which a record is
    /// parked in the failed stage instead of being returned to
    /// selected. Cancellations do not count.
    pub max_subject_failures: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            sweep_batch: 10,
            stuck_after: Duration::from_secs(30 * 60),
            sweep_priority: 0,
            max_subject_failures: 3,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControllerConfigError> {
        if self.check_interval.is_zero() {
            return Err(ControllerConfigError::Invalid(
                "check_interval must be positive".to_string(),
            ));
        }
        if self.sweep_batch == 0 {
            return Err(ControllerConfigError::Invalid(
                "sweep_batch must be at least 1".to_string(),
            ));
        }
        if self.stuck_after < self.check_interval {
            return Err(ControllerConfigError::Invalid(
                "stuck_after must not be shorter than check_interval".to_string(),
            ));
        }
        if self.max_subject_failures == 0 {
            return Err(ControllerConfigError::Invalid(
                "max_subject_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
