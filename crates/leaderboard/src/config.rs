use crate::error::LeaderboardError;
use std::time::Duration;

/// Configuration for the leaderboard core.
#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    /// Number of records shown on a stage leaderboard. Default: 10.
    pub leaderboard_size: usize,
    /// Upper bound for a single store operation, including a whole submission
    /// transaction. An elapsed bound is reported as a persistence error and the
    /// transaction is rolled back. Default: 5s.
    pub store_timeout: Duration,
}

impl LeaderboardConfig {
    /// Validate configuration values.
    ///
    /// Checks:
    /// - `leaderboard_size >= 1` (an empty leaderboard can never show a record)
    /// - `store_timeout > 0`
    pub fn validate(&self) -> Result<(), LeaderboardError> {
        if self.leaderboard_size == 0 {
            return Err(LeaderboardError::InvalidConfig {
                reason: "leaderboard_size must be >= 1".to_string(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(LeaderboardError::InvalidConfig {
                reason: "store_timeout must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            leaderboard_size: 10,
            store_timeout: Duration::from_secs(5),
        }
    }
}
