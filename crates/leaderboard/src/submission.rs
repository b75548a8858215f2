//! Candidate submissions and their validation.

use serde::{Deserialize, Serialize};

use crate::error::LeaderboardError;
use crate::record::NewRecord;
use crate::types::{LapTime, PlayerName, StageNumber};

/// A numeric field as clients send it: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Number(f64),
    Text(String),
}

impl NumericInput {
    /// The numeric value, or NaN when the text does not parse.
    pub fn as_f64(&self) -> f64 {
        match self {
            NumericInput::Number(n) => *n,
            NumericInput::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }
}

impl From<i64> for NumericInput {
    fn from(value: i64) -> Self {
        NumericInput::Number(value as f64)
    }
}

impl From<f64> for NumericInput {
    fn from(value: f64) -> Self {
        NumericInput::Number(value)
    }
}

impl From<&str> for NumericInput {
    fn from(value: &str) -> Self {
        NumericInput::Text(value.to_string())
    }
}

/// A submission as received from a client, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub stage_number: Option<NumericInput>,
    pub time: Option<NumericInput>,
    pub player_name: Option<String>,
    /// Opaque replay payload, stored verbatim.
    pub replay: Option<Vec<u8>>,
}

/// A submission that passed validation and is ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSubmission {
    pub record: NewRecord,
    pub replay: Option<Vec<u8>>,
}

impl Submission {
    /// A complete submission without a replay.
    pub fn new(stage_number: i64, time: f64, player_name: impl Into<String>) -> Self {
        Self {
            stage_number: Some(stage_number.into()),
            time: Some(time.into()),
            player_name: Some(player_name.into()),
            replay: None,
        }
    }

    /// Attach a replay payload.
    pub fn with_replay(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.replay = Some(payload.into());
        self
    }

    /// Validate in a fixed order and report the first violation:
    ///
    /// 1. all of stage number, time and player name are present (`MissingField`)
    /// 2. the stage is an integer in `1..=5` (`InvalidStage`)
    /// 3. the time is finite, positive and at most 9999 (`InvalidTime`)
    /// 4. the name, truncated to 50 characters, is non-empty (`InvalidName`)
    pub fn validate(self) -> Result<ValidSubmission, LeaderboardError> {
        let (stage, time, name) = match (self.stage_number, self.time, self.player_name) {
            (Some(stage), Some(time), Some(name)) => (stage, time, name),
            (None, _, _) => return Err(LeaderboardError::MissingField { field: "stageNumber" }),
            (_, None, _) => return Err(LeaderboardError::MissingField { field: "time" }),
            (_, _, None) => return Err(LeaderboardError::MissingField { field: "playerName" }),
        };

        let stage_number = parse_stage(&stage)?;
        let time = LapTime::new(time.as_f64())?;
        let player_name = PlayerName::new(&name)?;

        Ok(ValidSubmission {
            record: NewRecord {
                stage_number,
                player_name,
                time,
            },
            replay: self.replay,
        })
    }
}

/// Parse a stage from client input. Fractional and unparseable values are
/// invalid stages, never missing ones.
pub fn parse_stage(input: &NumericInput) -> Result<StageNumber, LeaderboardError> {
    let value = input.as_f64();
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(LeaderboardError::InvalidStage {
            reason: format!("{input:?} is not an integer"),
        });
    }
    StageNumber::new(value as i64)
}
