use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Anti-cheat and cache tuning knobs.
///
/// Every threshold the validator and the leaderboard use lives here so the
/// numbers can be retuned (or loaded from a file) without touching logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationConfig {
    /// Hard WPM ceiling. 300 leaves headroom above the ~216 WPM sustained
    /// world record; anything past it is automation.
    pub max_wpm: f64,
    /// Largest single-heartbeat character delta allowed before the input is
    /// treated as pasted.
    pub max_burst_chars: u32,
    /// Floor on heartbeat count for non-time modes.
    pub min_heartbeats: u32,
    /// One heartbeat expected per this many elapsed seconds, when that is
    /// stricter than `min_heartbeats`.
    pub heartbeat_interval_secs: f64,
    /// Tests at or under this target duration get the proportional
    /// tolerance; longer tests get the flat one.
    pub short_test_threshold_secs: f64,
    /// Proportional early-submit tolerance for short time-mode tests.
    pub short_test_tolerance: f64,
    /// Flat early-submit tolerance for long time-mode tests, seconds.
    pub long_test_tolerance_secs: f64,
    /// A `start` within this window resumes the existing session instead of
    /// replacing it (page-reload recovery).
    pub session_resume_grace_secs: f64,
    /// Minimum accuracy for a result to count toward any leaderboard.
    pub leaderboard_min_accuracy: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_wpm: 300.0,
            max_burst_chars: 50,
            min_heartbeats: 3,
            heartbeat_interval_secs: 10.0,
            short_test_threshold_secs: 30.0,
            short_test_tolerance: 0.15,
            long_test_tolerance_secs: 3.0,
            session_resume_grace_secs: 30.0,
            leaderboard_min_accuracy: 90.0,
        }
    }
}

impl ValidationConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        if let Ok(bytes) = fs::read(path) {
            if let Ok(cfg) = serde_json::from_slice::<ValidationConfig>(&bytes) {
                return cfg;
            }
        }
        Self::default()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self).unwrap_or_default();
        fs::write(path, data)
    }

    /// Early-submit tolerance for a time-mode test of the given target
    /// duration, in seconds. Short tests absorb proportionally more
    /// network/setup latency; long tests get a flat allowance.
    pub fn time_tolerance_secs(&self, target_secs: f64) -> f64 {
        if target_secs <= self.short_test_threshold_secs {
            target_secs * self.short_test_tolerance
        } else {
            self.long_test_tolerance_secs
        }
    }
}
