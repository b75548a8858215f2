use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LeaderboardError;

/// Lowest valid stage number.
pub const MIN_STAGE: i32 = 1;

/// Highest valid stage number.
pub const MAX_STAGE: i32 = 5;

/// A game stage, always within `MIN_STAGE..=MAX_STAGE`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i32")]
pub struct StageNumber(i32);

impl StageNumber {
    /// Every stage, in ascending order.
    pub const ALL: [StageNumber; 5] = [
        StageNumber(1),
        StageNumber(2),
        StageNumber(3),
        StageNumber(4),
        StageNumber(5),
    ];

    /// Create a new `StageNumber` with validation.
    ///
    /// Returns `InvalidStage` if the value is outside `1..=5`.
    pub fn new(stage: i64) -> Result<Self, LeaderboardError> {
        if !(i64::from(MIN_STAGE)..=i64::from(MAX_STAGE)).contains(&stage) {
            return Err(LeaderboardError::InvalidStage {
                reason: format!("{stage} is outside {MIN_STAGE}..={MAX_STAGE}"),
            });
        }
        Ok(Self(stage as i32))
    }

    /// Get the inner integer value.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl TryFrom<i64> for StageNumber {
    type Error = LeaderboardError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StageNumber> for i32 {
    fn from(stage: StageNumber) -> Self {
        stage.0
    }
}

impl fmt::Display for StageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
