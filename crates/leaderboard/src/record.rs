//! Persisted leaderboard rows.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeaderboardError;
use crate::types::{LapTime, PlayerName, RecordId, ReplayId, StageNumber};

/// A validated record that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub stage_number: StageNumber,
    pub player_name: PlayerName,
    pub time: LapTime,
}

impl NewRecord {
    /// Build a new record from raw values, enforcing the record invariants.
    pub fn new(stage_number: i64, player_name: &str, time: f64) -> Result<Self, LeaderboardError> {
        Ok(Self {
            stage_number: StageNumber::new(stage_number)?,
            player_name: PlayerName::new(player_name)?,
            time: LapTime::new(time)?,
        })
    }
}

/// One timing submission for a stage. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub stage_number: StageNumber,
    pub player_name: PlayerName,
    pub time: LapTime,
    /// Creation instant, assigned by the store.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Leaderboard order: fastest time first, earlier insertion on ties.
    pub fn leaderboard_cmp(&self, other: &Record) -> Ordering {
        self.time
            .rank_cmp(&other.time)
            .then(self.id.cmp(&other.id))
    }

    /// Best-per-stage order: fastest time first, then earliest timestamp,
    /// then lowest id.
    pub fn best_cmp(&self, other: &Record) -> Ordering {
        self.time
            .rank_cmp(&other.time)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

/// A record as shown on a stage leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRecord {
    #[serde(flatten)]
    pub record: Record,
    /// True iff a replay is stored for this record.
    pub has_replay: bool,
}

/// An opaque replay payload owned by exactly one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replay {
    pub id: ReplayId,
    pub record_id: RecordId,
    /// Copy of the owning record's stage.
    pub stage_number: StageNumber,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, time: f64, secs: i64) -> Record {
        Record {
            id: RecordId(id),
            stage_number: StageNumber::new(1).unwrap(),
            player_name: PlayerName::new("p").unwrap(),
            time: LapTime::new(time).unwrap(),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn leaderboard_ties_fall_back_to_insertion_order() {
        let a = record(2, 10.0, 0);
        let b = record(1, 10.0, 5);
        assert_eq!(a.leaderboard_cmp(&b), Ordering::Greater);
        assert_eq!(record(3, 9.0, 0).leaderboard_cmp(&b), Ordering::Less);
    }

    #[test]
    fn best_ties_fall_back_to_timestamp_then_id() {
        let early = record(9, 10.0, 0);
        let late = record(1, 10.0, 5);
        assert_eq!(early.best_cmp(&late), Ordering::Less);

        let same_instant = record(10, 10.0, 0);
        assert_eq!(early.best_cmp(&same_instant), Ordering::Less);
    }

    #[test]
    fn wire_shape_uses_timestamp_and_camel_case() {
        let ranked = RankedRecord {
            record: record(7, 45.2, 0),
            has_replay: true,
        };
        let json = serde_json::to_value(&ranked).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["stageNumber"], 1);
        assert_eq!(json["playerName"], "p");
        assert_eq!(json["time"], 45.2);
        assert_eq!(json["hasReplay"], true);
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn new_record_checks_every_field() {
        assert!(matches!(
            NewRecord::new(0, "a", 1.0),
            Err(LeaderboardError::InvalidStage { .. })
        ));
        assert!(matches!(
            NewRecord::new(1, "a", 0.0),
            Err(LeaderboardError::InvalidTime { .. })
        ));
        assert!(matches!(
            NewRecord::new(1, "", 1.0),
            Err(LeaderboardError::InvalidName { .. })
        ));
        assert!(NewRecord::new(5, "a", 9999.0).is_ok());
    }
}
