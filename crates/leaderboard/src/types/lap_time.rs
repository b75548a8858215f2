use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LeaderboardError;

/// Slowest time the leaderboard accepts, in seconds.
pub const MAX_LAP_TIME: f64 = 9999.0;

/// A stage completion time in seconds, finite and within `(0, 9999]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LapTime(f64);

impl LapTime {
    /// Create a new `LapTime` with validation.
    pub fn new(seconds: f64) -> Result<Self, LeaderboardError> {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_LAP_TIME {
            return Err(LeaderboardError::InvalidTime {
                reason: format!("{seconds} is outside (0, {MAX_LAP_TIME}]"),
            });
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }

    /// Total order used for ranking. Valid times are never NaN.
    pub(crate) fn rank_cmp(&self, other: &LapTime) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl TryFrom<f64> for LapTime {
    type Error = LeaderboardError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LapTime> for f64 {
    fn from(time: LapTime) -> Self {
        time.0
    }
}

impl fmt::Display for LapTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
