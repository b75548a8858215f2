//! Per-stage time-trial leaderboard.
//!
//! Submissions are validated and persisted by the [`coordinator`], which
//! writes a record and its optional replay in one transaction. The
//! [`ranking`] engine answers stage leaderboards and per-stage bests from the
//! [`store`] traits, implemented in memory, on SQLite (`sqlite` feature) and
//! on PostgreSQL (`sql` feature).

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod ranking;
pub mod record;
pub mod storage;
pub mod store;
pub mod submission;
pub mod testing;
pub mod types;

/// Prelude module for convenient glob imports.
///
/// ```text
/// use leaderboard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::LeaderboardConfig;
    pub use crate::coordinator::SubmissionCoordinator;
    pub use crate::error::LeaderboardError;
    pub use crate::metrics::LeaderboardMetrics;
    pub use crate::ranking::{RankingEngine, StageLeaderboard};
    pub use crate::record::{NewRecord, RankedRecord, Record, Replay};
    pub use crate::storage::memory::MemoryStore;
    pub use crate::store::{LeaderboardStore, RecordStore, ReplayStore, StoreTransaction};
    pub use crate::submission::{NumericInput, Submission, ValidSubmission};
    pub use crate::types::{LapTime, PlayerName, RecordId, ReplayId, StageNumber};
}
