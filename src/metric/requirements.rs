//! Certification thresholds
//!
//! Supplied by the caller before a run starts and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Target thresholds a run is certified against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationRequirements {
    /// Workload name the thresholds belong to
    #[serde(default)]
    pub name: String,
    /// Target frame time in milliseconds
    pub frame_time_ms: f64,
    /// Maximum tolerated jank events per second of playback
    pub max_jank_rate: f64,
    /// Maximum load time in milliseconds; negative disables the check
    #[serde(default = "default_max_load_time_ms")]
    pub max_load_time_ms: i64,
}

fn default_max_load_time_ms() -> i64 {
    -1
}

impl CertificationRequirements {
    pub fn new(
        name: impl Into<String>,
        frame_time_ms: f64,
        max_jank_rate: f64,
        max_load_time_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            frame_time_ms,
            max_jank_rate,
            max_load_time_ms,
        }
    }

    /// Target frame time in nanoseconds.
    pub fn target_frame_time_ns(&self) -> f64 {
        self.frame_time_ms * 1e6
    }

    pub fn checks_load_time(&self) -> bool {
        self.max_load_time_ms >= 0
    }
}
