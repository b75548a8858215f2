//! SQL-backed leaderboard store using PostgreSQL via sqlx.
//!
//! Tables:
//! - `leaderboard_records`: one row per submitted time, indexed on `(stage_number, time)`
//! - `leaderboard_replays`: replay payloads, `ON DELETE CASCADE` from their record
//!
//! This module is only available when the `sql` feature is enabled.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{PgExecutor, Row, Transaction};

use crate::error::LeaderboardError;
use crate::record::{NewRecord, Record, Replay};
use crate::storage::{corrupt_column, is_foreign_key_violation, persistence_error};
use crate::store::{LeaderboardStore, RecordStore, ReplayStore, StoreTransaction};
use crate::types::{LapTime, PlayerName, RecordId, ReplayId, StageNumber};

const RECORD_COLUMNS: &str = "id, stage_number, player_name, time, created_at";

/// PostgreSQL-backed leaderboard store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store with the given connection pool.
    ///
    /// Call [`migrate()`](Self::migrate) before first use.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `url`. `acquire_timeout` bounds how long a caller
    /// waits for a free connection.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, LeaderboardError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| persistence_error("connect to postgres", e))?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), LeaderboardError> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| LeaderboardError::PersistenceError {
                reason: format!("migration failed: {e}"),
                source: Some(Box::new(e)),
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_record<'e, E: PgExecutor<'e>>(
    executor: E,
    record: &NewRecord,
) -> Result<Record, LeaderboardError> {
    let row = sqlx::query(&format!(
        "INSERT INTO leaderboard_records (stage_number, player_name, time)
         VALUES ($1, $2, $3)
         RETURNING {RECORD_COLUMNS}"
    ))
    .bind(record.stage_number.value())
    .bind(record.player_name.as_str())
    .bind(record.time.seconds())
    .fetch_one(executor)
    .await
    .map_err(|e| persistence_error("insert record", e))?;

    row_to_record(&row)
}

async fn insert_replay<'e, E: PgExecutor<'e>>(
    executor: E,
    record_id: RecordId,
    stage: StageNumber,
    payload: &[u8],
) -> Result<ReplayId, LeaderboardError> {
    let row = sqlx::query(
        "INSERT INTO leaderboard_replays (record_id, stage_number, payload)
         VALUES ($1, $2, $3)
         RETURNING id",
    )
    .bind(record_id.0)
    .bind(stage.value())
    .bind(payload)
    .fetch_one(executor)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            LeaderboardError::ForeignKeyError { record_id }
        } else {
            persistence_error("insert replay", e)
        }
    })?;

    Ok(ReplayId(try_get_column(&row, "id")?))
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_record(&self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        insert_record(&self.pool, record).await
    }

    async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM leaderboard_records
             WHERE stage_number = $1
             ORDER BY time ASC, id ASC
             LIMIT $2"
        ))
        .bind(stage.value())
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| persistence_error("fetch stage leaderboard", e))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn best_per_stage(&self) -> Result<BTreeMap<StageNumber, Record>, LeaderboardError> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT ON (stage_number) {RECORD_COLUMNS}
             FROM leaderboard_records
             ORDER BY stage_number ASC, time ASC, created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| persistence_error("fetch best per stage", e))?;

        let mut best = BTreeMap::new();
        for row in &rows {
            let record = row_to_record(row)?;
            best.insert(record.stage_number, record);
        }
        Ok(best)
    }

    async fn count(&self, stage: StageNumber) -> Result<u64, LeaderboardError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM leaderboard_records WHERE stage_number = $1")
            .bind(stage.value())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| persistence_error("count records", e))?;
        let total: i64 = try_get_column(&row, "total")?;
        Ok(total.max(0) as u64)
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool, LeaderboardError> {
        // The replay row goes with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM leaderboard_records WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("delete record", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReplayStore for PgStore {
    async fn insert_replay(
        &self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        insert_replay(&self.pool, record_id, stage, payload).await
    }

    async fn replay_for(&self, record_id: RecordId) -> Result<Replay, LeaderboardError> {
        let row = sqlx::query(
            "SELECT id, record_id, stage_number, payload
             FROM leaderboard_replays
             WHERE record_id = $1",
        )
        .bind(record_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| persistence_error("fetch replay", e))?;

        match row {
            Some(row) => row_to_replay(&row),
            None => Err(LeaderboardError::NotFound { record_id }),
        }
    }

    async fn replay_presence(
        &self,
        record_ids: &[RecordId],
    ) -> Result<HashSet<RecordId>, LeaderboardError> {
        if record_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<i64> = record_ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(
            "SELECT record_id FROM leaderboard_replays WHERE record_id = ANY($1::bigint[])",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| persistence_error("fetch replay presence", e))?;

        rows.iter()
            .map(|row| try_get_column(row, "record_id").map(RecordId))
            .collect()
    }
}

#[async_trait]
impl LeaderboardStore for PgStore {
    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, LeaderboardError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| persistence_error("begin transaction", e))?;
        Ok(Box::new(PgTransaction { tx: Some(tx) }))
    }

    async fn health_check(&self) -> Result<(), LeaderboardError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("health check", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// A PostgreSQL transaction. sqlx rolls it back when dropped uncommitted.
pub struct PgTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn active(&mut self) -> Result<&mut Transaction<'static, Postgres>, LeaderboardError> {
        self.tx
            .as_mut()
            .ok_or_else(|| LeaderboardError::persistence("transaction already committed or rolled back"))
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_record(&mut self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        let tx = self.active()?;
        insert_record(&mut **tx, record).await
    }

    async fn insert_replay(
        &mut self,
        record_id: RecordId,
        stage: StageNumber,
        payload: &[u8],
    ) -> Result<ReplayId, LeaderboardError> {
        let tx = self.active()?;
        insert_replay(&mut **tx, record_id, stage, payload).await
    }

    async fn commit(self: Box<Self>) -> Result<(), LeaderboardError> {
        let mut this = self;
        let tx = this
            .tx
            .take()
            .ok_or_else(|| LeaderboardError::persistence("transaction already committed or rolled back"))?;
        tx.commit()
            .await
            .map_err(|e| persistence_error("commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LeaderboardError> {
        let mut this = self;
        let tx = this
            .tx
            .take()
            .ok_or_else(|| LeaderboardError::persistence("transaction already committed or rolled back"))?;
        tx.rollback()
            .await
            .map_err(|e| persistence_error("rollback transaction", e))
    }
}

fn try_get_column<'r, T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>>(
    row: &'r PgRow,
    column: &str,
) -> Result<T, LeaderboardError> {
    row.try_get(column)
        .map_err(|e| persistence_error(&format!("read '{column}' column"), e))
}

fn row_to_record(row: &PgRow) -> Result<Record, LeaderboardError> {
    let id: i64 = try_get_column(row, "id")?;
    let stage: i32 = try_get_column(row, "stage_number")?;
    let player_name: String = try_get_column(row, "player_name")?;
    let time: f64 = try_get_column(row, "time")?;
    let created_at: DateTime<Utc> = try_get_column(row, "created_at")?;

    Ok(Record {
        id: RecordId(id),
        stage_number: StageNumber::new(i64::from(stage))
            .map_err(|e| corrupt_column("stage_number", e))?,
        player_name: PlayerName::new(&player_name).map_err(|e| corrupt_column("player_name", e))?,
        time: LapTime::new(time).map_err(|e| corrupt_column("time", e))?,
        created_at,
    })
}

fn row_to_replay(row: &PgRow) -> Result<Replay, LeaderboardError> {
    let id: i64 = try_get_column(row, "id")?;
    let record_id: i64 = try_get_column(row, "record_id")?;
    let stage: i32 = try_get_column(row, "stage_number")?;
    let payload: Vec<u8> = try_get_column(row, "payload")?;

    Ok(Replay {
        id: ReplayId(id),
        record_id: RecordId(record_id),
        stage_number: StageNumber::new(i64::from(stage))
            .map_err(|e| corrupt_column("stage_number", e))?,
        payload,
    })
}
