use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::LeaderboardError;
use crate::record::{NewRecord, Record, Replay};
use crate::store::{LeaderboardStore, RecordStore, ReplayStore, StoreTransaction};
use crate::types::{RecordId, ReplayId, StageNumber};

/// In-memory leaderboard store for testing.
///
/// Clones share the same underlying tables. Transactions buffer their writes
/// and apply them under a single lock acquisition on commit, so readers never
/// observe a record without its replay.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    ids: Arc<IdSequences>,
}

#[derive(Default)]
struct Inner {
    /// Records keyed by id, so iteration follows insertion order.
    records: BTreeMap<RecordId, Record>,
    /// Replays keyed by their owning record.
    replays: HashMap<RecordId, Replay>,
}

/// Id generators. Ids consumed by rolled-back transactions are not reused.
#[derive(Default)]
struct IdSequences {
    record: AtomicI64,
    replay: AtomicI64,
}

impl IdSequences {
    fn next_record(&self) -> RecordId {
        RecordId(self.record.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_replay(&self) -> ReplayId {
        ReplayId(self.replay.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records across all stages.
    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Total number of stored replays.
    pub fn replay_count(&self) -> usize {
        self.inner.lock().replays.len()
    }

    fn stamp(&self, record: &NewRecord) -> Record {
        Record {
            id: self.ids.next_record(),
            stage_number: record.stage_number,
            player_name: record.player_name.clone(),
            time: record.time,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_record(&self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        let stored = self.stamp(record);
        self.inner.lock().records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError> {
        let inner = self.inner.lock();
        let mut records: Vec<Record> = inner
            .records
            .values()
            .filter(|r| r.stage_number == stage)
            .cloned()
            .collect();
        drop(inner);
        records.sort_by(Record::leaderboard_cmp);
        records.truncate(n);
        Ok(records)
    }

    async fn best_per_stage(&self) -> Result<BTreeMap<StageNumber, Record>, LeaderboardError> {
        let inner = self.inner.lock();
        let mut best: BTreeMap<StageNumber, Record> = BTreeMap::new();
        for record in inner.records.values() {
            match best.get(&record.stage_number) {
                Some(current) if current.best_cmp(record).is_le() => {}
                _ => {
                    best.insert(record.stage_number, record.clone());
                }
            }
        }
        Ok(best)
    }

    async fn count(&self, stage: StageNumber) -> Result<u64, LeaderboardError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .values()
            .filter(|r| r.stage_number == stage)
            .count() as u64)
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool, LeaderboardError> {
        let mut inner = self.inner.lock();
        let existed = inner.records.remove(&id).is_some();
        if existed {
            inner.replays.remove(&id);
        }
        Ok(existed)
    }
}

#[async_trait]
impl ReplayStore for MemoryStore {
    async fn insert_replay(
        &self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(&record_id) {
            return Err(LeaderboardError::ForeignKeyError { record_id });
        }
        if inner.replays.contains_key(&record_id) {
            return Err(duplicate_replay(record_id));
        }
        let id = self.ids.next_replay();
        inner.replays.insert(
            record_id,
            Replay {
                id,
                record_id,
                stage_number: stage,
                payload: payload.to_vec(),
            },
        );
        Ok(id)
    }

    async fn replay_for(&self, record_id: RecordId) -> Result<Replay, LeaderboardError> {
        self.inner
            .lock()
            .replays
            .get(&record_id)
            .cloned()
            .ok_or(LeaderboardError::NotFound { record_id })
    }

    async fn replay_presence(
        &self,
        record_ids: &[RecordId],
    ) -> Result<HashSet<RecordId>, LeaderboardError> {
        let inner = self.inner.lock();
        Ok(record_ids
            .iter()
            .copied()
            .filter(|id| inner.replays.contains_key(id))
            .collect())
    }
}

#[async_trait]
impl LeaderboardStore for MemoryStore {
    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, LeaderboardError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            pending_records: Vec::new(),
            pending_replays: Vec::new(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// A transaction for `MemoryStore`.
///
/// Buffers all writes and applies them atomically on commit.
struct MemoryTransaction {
    store: MemoryStore,
    pending_records: Vec<Record>,
    pending_replays: Vec<Replay>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_record(&mut self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        let stored = self.store.stamp(record);
        self.pending_records.push(stored.clone());
        Ok(stored)
    }

    async fn insert_replay(
        &mut self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        let pending_parent = self.pending_records.iter().any(|r| r.id == record_id);
        {
            let inner = self.store.inner.lock();
            if !pending_parent && !inner.records.contains_key(&record_id) {
                return Err(LeaderboardError::ForeignKeyError { record_id });
            }
            if inner.replays.contains_key(&record_id) {
                return Err(duplicate_replay(record_id));
            }
        }
        if self.pending_replays.iter().any(|r| r.record_id == record_id) {
            return Err(duplicate_replay(record_id));
        }

        let id = self.store.ids.next_replay();
        self.pending_replays.push(Replay {
            id,
            record_id,
            stage_number: stage,
            payload: payload.to_vec(),
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError> {
        let MemoryTransaction {
            store,
            pending_records,
            pending_replays,
        } = *self;
        let mut inner = store.inner.lock();

        // A committed parent may have been deleted since the replay was staged.
        for replay in &pending_replays {
            let parent_pending = pending_records.iter().any(|r| r.id == replay.record_id);
            if !parent_pending && !inner.records.contains_key(&replay.record_id) {
                return Err(LeaderboardError::ForeignKeyError {
                    record_id: replay.record_id,
                });
            }
            if inner.replays.contains_key(&replay.record_id) {
                return Err(duplicate_replay(replay.record_id));
            }
        }

        for record in pending_records {
            inner.records.insert(record.id, record);
        }
        for replay in pending_replays {
            inner.replays.insert(replay.record_id, replay);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LeaderboardError> {
        // Nothing was applied.
        Ok(())
    }
}

fn duplicate_replay(record_id: RecordId) -> LeaderboardError {
    LeaderboardError::persistence(format!("record {record_id} already has a replay"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(n: i64) -> StageNumber {
        StageNumber::new(n).unwrap()
    }

    fn new_record(stage_number: i64, name: &str, time: f64) -> NewRecord {
        NewRecord::new(stage_number, name, time).unwrap()
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let store = MemoryStore::new();
        let a = store.insert_record(&new_record(1, "a", 10.0)).await.unwrap();
        let b = store.insert_record(&new_record(2, "b", 10.0)).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn top_n_orders_by_time_then_id() {
        let store = MemoryStore::new();
        let slow = store.insert_record(&new_record(1, "slow", 50.0)).await.unwrap();
        let tie_first = store.insert_record(&new_record(1, "t1", 20.0)).await.unwrap();
        let tie_second = store.insert_record(&new_record(1, "t2", 20.0)).await.unwrap();
        store.insert_record(&new_record(2, "other", 1.0)).await.unwrap();

        let top = store.top_n(stage(1), 10).await.unwrap();
        let ids: Vec<RecordId> = top.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![tie_first.id, tie_second.id, slow.id]);

        let top = store.top_n(stage(1), 2).await.unwrap();
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn replay_requires_existing_record() {
        let store = MemoryStore::new();
        let err = store
            .insert_replay(RecordId(99), stage(1), b"trace")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LeaderboardError::ForeignKeyError {
                record_id: RecordId(99)
            }
        ));
    }

    #[tokio::test]
    async fn at_most_one_replay_per_record() {
        let store = MemoryStore::new();
        let record = store.insert_record(&new_record(1, "a", 10.0)).await.unwrap();
        store
            .insert_replay(record.id, record.stage_number, b"one")
            .await
            .unwrap();
        let err = store
            .insert_replay(record.id, record.stage_number, b"two")
            .await
            .unwrap_err();
        assert!(matches!(err, LeaderboardError::PersistenceError { .. }));
        assert_eq!(store.replay_for(record.id).await.unwrap().payload, b"one");
    }

    #[tokio::test]
    async fn delete_cascades_to_replay() {
        let store = MemoryStore::new();
        let record = store.insert_record(&new_record(1, "a", 10.0)).await.unwrap();
        store
            .insert_replay(record.id, record.stage_number, b"trace")
            .await
            .unwrap();

        assert!(store.delete_record(record.id).await.unwrap());
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.replay_count(), 0);
        assert!(matches!(
            store.replay_for(record.id).await,
            Err(LeaderboardError::NotFound { .. })
        ));
        assert!(!store.delete_record(record.id).await.unwrap());
    }

    #[tokio::test]
    async fn transaction_writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut tx = store.begin_transaction().await.unwrap();
        let record = tx.insert_record(&new_record(3, "ada", 45.2)).await.unwrap();
        tx.insert_replay(record.id, record.stage_number, b"trace")
            .await
            .unwrap();

        assert_eq!(store.record_count(), 0);
        assert!(store.replay_presence(&[record.id]).await.unwrap().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(store.record_count(), 1);
        assert!(store
            .replay_presence(&[record.id])
            .await
            .unwrap()
            .contains(&record.id));
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let store = MemoryStore::new();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_record(&new_record(1, "a", 1.0)).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_record(&new_record(1, "b", 1.0)).await.unwrap();
        drop(tx);

        assert_eq!(store.record_count(), 0);
        assert!(store.top_n(stage(1), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_rejects_replay_whose_parent_was_deleted() {
        let store = MemoryStore::new();
        let record = store.insert_record(&new_record(1, "a", 1.0)).await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.insert_replay(record.id, record.stage_number, b"trace")
            .await
            .unwrap();
        store.delete_record(record.id).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, LeaderboardError::ForeignKeyError { .. }));
        assert_eq!(store.replay_count(), 0);
    }

    #[tokio::test]
    async fn best_per_stage_skips_empty_stages() {
        let store = MemoryStore::new();
        store.insert_record(&new_record(2, "a", 30.0)).await.unwrap();
        let best = store.insert_record(&new_record(2, "b", 20.0)).await.unwrap();
        store.insert_record(&new_record(2, "c", 20.0)).await.unwrap();
        let only = store.insert_record(&new_record(5, "d", 99.0)).await.unwrap();

        let result = store.best_per_stage().await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[&stage(2)].id, best.id);
        assert_eq!(result[&stage(5)].id, only.id);
        assert!(!result.contains_key(&stage(1)));
    }
}
