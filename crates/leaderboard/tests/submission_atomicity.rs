use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leaderboard::config::LeaderboardConfig;
use leaderboard::error::LeaderboardError;
use leaderboard::record::{NewRecord, Record, Replay};
use leaderboard::storage::memory::MemoryStore;
use leaderboard::store::{LeaderboardStore, RecordStore, ReplayStore, StoreTransaction};
use leaderboard::submission::Submission;
use leaderboard::testing::TestLeaderboard;
use leaderboard::types::{RecordId, ReplayId, StageNumber};

/// How a wrapped transaction misbehaves.
#[derive(Clone, Copy)]
enum Fault {
    /// `insert_replay` fails after the record was written.
    FailReplay,
    /// `insert_record` never completes.
    Stall,
    /// `commit` takes longer than the store timeout, then succeeds.
    SlowCommit(Duration),
}

/// A memory store whose transactions inject a fault.
struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn insert_record(&self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        self.inner.insert_record(record).await
    }

    async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError> {
        self.inner.top_n(stage, n).await
    }

    async fn best_per_stage(&self) -> Result<BTreeMap<StageNumber, Record>, LeaderboardError> {
        self.inner.best_per_stage().await
    }

    async fn count(&self, stage: StageNumber) -> Result<u64, LeaderboardError> {
        self.inner.count(stage).await
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool, LeaderboardError> {
        self.inner.delete_record(id).await
    }
}

#[async_trait]
impl ReplayStore for FaultyStore {
    async fn insert_replay(
        &self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        self.inner.insert_replay(record_id, stage, payload).await
    }

    async fn replay_for(&self, record_id: RecordId) -> Result<Replay, LeaderboardError> {
        self.inner.replay_for(record_id).await
    }

    async fn replay_presence(
        &self,
        record_ids: &[RecordId],
    ) -> Result<HashSet<RecordId>, LeaderboardError> {
        self.inner.replay_presence(record_ids).await
    }
}

#[async_trait]
impl LeaderboardStore for FaultyStore {
    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, LeaderboardError> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin_transaction().await?,
            fault: self.fault,
        }))
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

struct FaultyTransaction {
    inner: Box<dyn StoreTransaction>,
    fault: Fault,
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    async fn insert_record(&mut self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        if let Fault::Stall = self.fault {
            std::future::pending::<()>().await;
        }
        self.inner.insert_record(record).await
    }

    async fn insert_replay(
        &mut self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        match self.fault {
            Fault::SlowCommit(_) => self.inner.insert_replay(record_id, stage, payload).await,
            _ => Err(LeaderboardError::ForeignKeyError { record_id }),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError> {
        if let Fault::SlowCommit(delay) = self.fault {
            tokio::time::sleep(delay).await;
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), LeaderboardError> {
        self.inner.rollback().await
    }
}

fn faulty(fault: Fault, config: LeaderboardConfig) -> (TestLeaderboard, MemoryStore) {
    let inner = MemoryStore::new();
    let store = Arc::new(FaultyStore {
        inner: inner.clone(),
        fault,
    });
    (TestLeaderboard::with_store(store, config), inner)
}

#[tokio::test]
async fn failed_replay_insert_leaves_no_record() {
    let (lb, inner) = faulty(Fault::FailReplay, LeaderboardConfig::default());

    let err = lb
        .coordinator()
        .submit(Submission::new(3, 45.2, "Ada").with_replay(b"{\"frames\":[]}".to_vec()))
        .await
        .unwrap_err();

    match err {
        LeaderboardError::PersistenceError { reason, .. } => {
            assert_eq!(reason, "failed to save record")
        }
        other => panic!("expected persistence error, got {other:?}"),
    }
    assert_eq!(inner.record_count(), 0);
    assert_eq!(inner.replay_count(), 0);
    assert!(lb
        .engine()
        .stage_leaderboard(3)
        .await
        .unwrap()
        .records
        .is_empty());
    assert_eq!(lb.metrics().persistence_failures.get(), 1);
    assert_eq!(lb.metrics().submissions_accepted.get(), 0);
}

#[tokio::test]
async fn submission_without_replay_is_unaffected_by_replay_fault() {
    let (lb, inner) = faulty(Fault::FailReplay, LeaderboardConfig::default());

    lb.coordinator()
        .submit(Submission::new(1, 10.0, "Lin"))
        .await
        .unwrap();
    assert_eq!(inner.record_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_store_times_out_without_a_record() {
    let (lb, inner) = faulty(
        Fault::Stall,
        LeaderboardConfig {
            store_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    );

    let err = lb
        .coordinator()
        .submit(Submission::new(2, 12.0, "Ada").with_replay(b"1".to_vec()))
        .await
        .unwrap_err();

    assert!(matches!(err, LeaderboardError::PersistenceError { .. }));
    let source = std::error::Error::source(&err)
        .map(|s| s.to_string())
        .unwrap_or_default();
    assert!(source.contains("timed out after 200ms"), "source: {source}");
    assert_eq!(inner.record_count(), 0);
    assert_eq!(inner.replay_count(), 0);
    assert_eq!(lb.metrics().persistence_failures.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_commit_still_reports_the_stored_record() {
    let (lb, inner) = faulty(
        Fault::SlowCommit(Duration::from_millis(500)),
        LeaderboardConfig {
            store_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    );

    let record = lb
        .coordinator()
        .submit(Submission::new(4, 33.3, "Ada").with_replay(b"2".to_vec()))
        .await
        .unwrap();

    assert_eq!(inner.record_count(), 1);
    assert_eq!(inner.replay_count(), 1);
    assert_eq!(lb.engine().replay(record.id).await.unwrap().payload, b"2");
    assert_eq!(lb.metrics().submissions_accepted.get(), 1);
    assert_eq!(lb.metrics().persistence_failures.get(), 0);
}
