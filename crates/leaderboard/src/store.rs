use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LeaderboardError;
use crate::record::{NewRecord, Record, Replay};
use crate::types::{RecordId, ReplayId, StageNumber};

/// Durable table of leaderboard records. Source of truth for rankings.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record outside of any caller-managed transaction.
    async fn insert_record(&self, record: &NewRecord) -> Result<Record, LeaderboardError>;

    /// Up to `n` records for `stage`, fastest first, earlier insertion on ties.
    async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError>;

    /// The fastest record of every stage that has at least one record.
    ///
    /// Ties are broken by earliest timestamp, then lowest id.
    async fn best_per_stage(&self) -> Result<BTreeMap<StageNumber, Record>, LeaderboardError>;

    /// Number of records stored for `stage`.
    async fn count(&self, stage: StageNumber) -> Result<u64, LeaderboardError>;

    /// Delete a record together with its replay. Returns false if the record
    /// did not exist.
    async fn delete_record(&self, id: RecordId) -> Result<bool, LeaderboardError>;
}

/// Durable table of replay payloads, each owned by one record.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Store a replay for an existing record.
    ///
    /// Fails with `ForeignKeyError` when `record_id` does not exist.
    async fn insert_replay(
        &self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError>;

    /// Fetch the replay of a record, or `NotFound`.
    async fn replay_for(&self, record_id: RecordId) -> Result<Replay, LeaderboardError>;

    /// The subset of `record_ids` that have a stored replay.
    async fn replay_presence(
        &self,
        record_ids: &[RecordId],
    ) -> Result<HashSet<RecordId>, LeaderboardError>;
}

/// A unit of work spanning both tables.
///
/// Writes are not visible to other callers until `commit()`. Dropping the
/// transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_record(&mut self, record: &NewRecord) -> Result<Record, LeaderboardError>;

    async fn insert_replay(
        &mut self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError>;

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError>;

    async fn rollback(self: Box<Self>) -> Result<(), LeaderboardError>;
}

/// A complete leaderboard backend.
#[async_trait]
pub trait LeaderboardStore: RecordStore + ReplayStore {
    /// Open a transaction covering records and replays.
    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, LeaderboardError>;

    /// Check connectivity to the backing store.
    async fn health_check(&self) -> Result<(), LeaderboardError> {
        Ok(())
    }

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Run a store operation under `limit`, turning an elapsed deadline into a
/// persistence error. The operation's future is dropped on timeout.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, LeaderboardError>
where
    F: Future<Output = Result<T, LeaderboardError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "store operation timed out");
            Err(LeaderboardError::PersistenceError {
                reason: format!("{operation} timed out after {}ms", limit.as_millis()),
                source: None,
            })
        }
    }
}
