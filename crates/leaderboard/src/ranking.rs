//! Read-side queries: stage leaderboards, per-stage bests and replays.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::LeaderboardConfig;
use crate::error::LeaderboardError;
use crate::record::{RankedRecord, Record, Replay};
use crate::store::{bounded, LeaderboardStore};
use crate::types::{RecordId, StageNumber};

/// The top records of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageLeaderboard {
    pub stage_number: StageNumber,
    pub records: Vec<RankedRecord>,
}

/// Stateless query engine. Every call recomputes from the store.
#[derive(Clone)]
pub struct RankingEngine {
    store: Arc<dyn LeaderboardStore>,
    config: Arc<LeaderboardConfig>,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn LeaderboardStore>, config: Arc<LeaderboardConfig>) -> Self {
        Self { store, config }
    }

    /// Leaderboard for a raw stage number. Out-of-range stages fail with
    /// `InvalidStage` before the store is queried.
    pub async fn stage_leaderboard(&self, stage: i64) -> Result<StageLeaderboard, LeaderboardError> {
        let stage = StageNumber::new(stage)?;
        self.leaderboard(stage).await
    }

    /// The fastest `leaderboard_size` records of `stage`, each annotated with
    /// whether a replay is stored for it.
    #[instrument(skip(self, stage), fields(stage = %stage))]
    pub async fn leaderboard(&self, stage: StageNumber) -> Result<StageLeaderboard, LeaderboardError> {
        let records = bounded(self.config.store_timeout, "fetch stage leaderboard", async {
            let records = self.store.top_n(stage, self.config.leaderboard_size).await?;
            let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
            let with_replay = self.store.replay_presence(&ids).await?;
            Ok::<_, LeaderboardError>(records
                .into_iter()
                .map(|record| RankedRecord {
                    has_replay: with_replay.contains(&record.id),
                    record,
                })
                .collect::<Vec<_>>())
        })
        .await?;

        tracing::debug!(count = records.len(), "stage leaderboard computed");
        Ok(StageLeaderboard {
            stage_number: stage,
            records,
        })
    }

    /// Up to `n` records of `stage` in leaderboard order, without replay flags.
    pub async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError> {
        bounded(
            self.config.store_timeout,
            "fetch top records",
            self.store.top_n(stage, n),
        )
        .await
    }

    /// The best record of every stage that has one.
    #[instrument(skip(self))]
    pub async fn global_best(&self) -> Result<BTreeMap<StageNumber, Record>, LeaderboardError> {
        let best = bounded(
            self.config.store_timeout,
            "fetch global best",
            self.store.best_per_stage(),
        )
        .await?;
        tracing::debug!(stages = best.len(), "global best computed");
        Ok(best)
    }

    /// The replay stored for `record_id`.
    pub async fn replay(&self, record_id: RecordId) -> Result<Replay, LeaderboardError> {
        if record_id.0 <= 0 {
            return Err(LeaderboardError::NotFound { record_id });
        }
        bounded(
            self.config.store_timeout,
            "fetch replay",
            self.store.replay_for(record_id),
        )
        .await
    }

    /// Number of records stored for `stage`.
    pub async fn count(&self, stage: StageNumber) -> Result<u64, LeaderboardError> {
        bounded(
            self.config.store_timeout,
            "count records",
            self.store.count(stage),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;
    use crate::store::{RecordStore, ReplayStore};
    use crate::storage::memory::MemoryStore;

    fn engine(store: &MemoryStore) -> RankingEngine {
        RankingEngine::new(
            Arc::new(store.clone()),
            Arc::new(LeaderboardConfig::default()),
        )
    }

    async fn seed(store: &MemoryStore, stage: i64, name: &str, time: f64) -> Record {
        store
            .insert_record(&NewRecord::new(stage, name, time).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn leaderboard_is_sorted_and_capped() {
        let store = MemoryStore::new();
        for i in 0..15 {
            seed(&store, 1, &format!("p{i}"), 100.0 - i as f64).await;
        }
        seed(&store, 2, "other", 1.0).await;

        let board = engine(&store).stage_leaderboard(1).await.unwrap();
        assert_eq!(board.records.len(), 10);
        assert_eq!(board.records[0].record.time.seconds(), 86.0);
        assert!(board
            .records
            .windows(2)
            .all(|w| w[0].record.time.seconds() <= w[1].record.time.seconds()));
        assert!(board
            .records
            .iter()
            .all(|r| r.record.stage_number.value() == 1));
    }

    #[tokio::test]
    async fn leaderboard_marks_replays() {
        let store = MemoryStore::new();
        let with = seed(&store, 3, "with", 10.0).await;
        seed(&store, 3, "without", 20.0).await;
        store
            .insert_replay(with.id, with.stage_number, b"[]")
            .await
            .unwrap();

        let board = engine(&store).stage_leaderboard(3).await.unwrap();
        assert!(board.records[0].has_replay);
        assert!(!board.records[1].has_replay);
    }

    #[tokio::test]
    async fn out_of_range_stage_is_rejected() {
        let store = MemoryStore::new();
        for stage in [0, 6, -1] {
            let err = engine(&store).stage_leaderboard(stage).await.unwrap_err();
            assert!(matches!(err, LeaderboardError::InvalidStage { .. }));
        }
    }

    #[tokio::test]
    async fn empty_stage_has_empty_leaderboard() {
        let store = MemoryStore::new();
        let board = engine(&store).stage_leaderboard(5).await.unwrap();
        assert!(board.records.is_empty());
        assert!(engine(&store).global_best().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_reads_are_identical() {
        let store = MemoryStore::new();
        seed(&store, 4, "a", 3.0).await;
        seed(&store, 4, "b", 2.0).await;

        let engine = engine(&store);
        let first = engine.stage_leaderboard(4).await.unwrap();
        let second = engine.stage_leaderboard(4).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn global_best_matches_leaderboard_head() {
        let store = MemoryStore::new();
        seed(&store, 1, "a", 9.0).await;
        seed(&store, 1, "b", 4.5).await;
        seed(&store, 3, "c", 7.0).await;

        let engine = engine(&store);
        let best = engine.global_best().await.unwrap();
        assert_eq!(best.len(), 2);

        for stage in StageNumber::ALL {
            let board = engine.leaderboard(stage).await.unwrap();
            match board.records.first() {
                Some(head) => assert_eq!(best.get(&stage), Some(&head.record)),
                None => assert!(!best.contains_key(&stage)),
            }
        }
    }

    #[tokio::test]
    async fn replay_lookup() {
        let store = MemoryStore::new();
        let record = seed(&store, 2, "a", 5.0).await;
        store
            .insert_replay(record.id, record.stage_number, b"{\"k\":1}")
            .await
            .unwrap();

        let engine = engine(&store);
        let replay = engine.replay(record.id).await.unwrap();
        assert_eq!(replay.payload, b"{\"k\":1}");
        assert_eq!(replay.stage_number, record.stage_number);

        assert!(matches!(
            engine.replay(RecordId(999)).await,
            Err(LeaderboardError::NotFound { .. })
        ));
        assert!(matches!(
            engine.replay(RecordId(0)).await,
            Err(LeaderboardError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn count_per_stage() {
        let store = MemoryStore::new();
        seed(&store, 2, "a", 5.0).await;
        seed(&store, 2, "b", 6.0).await;
        seed(&store, 1, "c", 6.0).await;

        let engine = engine(&store);
        assert_eq!(engine.count(StageNumber::new(2).unwrap()).await.unwrap(), 2);
        assert_eq!(engine.count(StageNumber::new(5).unwrap()).await.unwrap(), 0);
    }
}
