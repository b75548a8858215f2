//! Embedded single-file leaderboard store using SQLite via sqlx.
//!
//! Same tables and ordering rules as the PostgreSQL store. Foreign keys are
//! switched on per connection so replays cascade with their record.
//!
//! This module is only available when the `sqlite` feature is enabled.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, SqliteExecutor, Transaction};

use crate::error::LeaderboardError;
use crate::record::{NewRecord, Record, Replay};
use crate::storage::{corrupt_column, is_foreign_key_violation, persistence_error};
use crate::store::{LeaderboardStore, RecordStore, ReplayStore, StoreTransaction};
use crate::types::{LapTime, PlayerName, RecordId, ReplayId, StageNumber};

const RECORD_COLUMNS: &str = "id, stage_number, player_name, time, created_at";

/// SQLite-backed leaderboard store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given connection pool.
    ///
    /// The pool's connections must have foreign keys enabled. Call
    /// [`migrate()`](Self::migrate) before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url`, e.g.
    /// `sqlite://leaderboard.db`.
    ///
    /// `busy_timeout` bounds how long a statement waits on a locked database.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, LeaderboardError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| persistence_error("parse sqlite url", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(busy_timeout)
            .connect_with(opts)
            .await
            .map_err(|e| persistence_error("open sqlite database", e))?;
        Ok(Self::new(pool))
    }

    /// Open a private in-memory database and run migrations.
    ///
    /// Uses a single long-lived connection, since every `:memory:` connection
    /// is a separate database.
    pub async fn in_memory() -> Result<Self, LeaderboardError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| persistence_error("parse sqlite url", e))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| persistence_error("open in-memory sqlite database", e))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), LeaderboardError> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| LeaderboardError::PersistenceError {
                reason: format!("migration failed: {e}"),
                source: Some(Box::new(e)),
            })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn insert_record<'e, E: SqliteExecutor<'e>>(
    executor: E,
    record: &NewRecord,
) -> Result<Record, LeaderboardError> {
    let row = sqlx::query(&format!(
        "INSERT INTO leaderboard_records (stage_number, player_name, time)
         VALUES (?, ?, ?)
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

async fn insert_replay<'e, E: SqliteExecutor<'e>>(
    executor: E,
    record_id: RecordId,
    stage: StageNumber,
    payload: &[u8],
) -> Result<ReplayId, LeaderboardError> {
    let row = sqlx::query(
        "INSERT INTO leaderboard_replays (record_id, stage_number, payload)
         VALUES (?, ?, ?)
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
impl RecordStore for SqliteStore {
    async fn insert_record(&self, record: &NewRecord) -> Result<Record, LeaderboardError> {
        insert_record(&self.pool, record).await
    }

    async fn top_n(&self, stage: StageNumber, n: usize) -> Result<Vec<Record>, LeaderboardError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM leaderboard_records
             WHERE stage_number = ?
             ORDER BY time ASC, id ASC
             LIMIT ?"
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
            "SELECT {RECORD_COLUMNS}
             FROM (
                 SELECT {RECORD_COLUMNS},
                        ROW_NUMBER() OVER (
                            PARTITION BY stage_number
                            ORDER BY time ASC, created_at ASC, id ASC
                        ) AS stage_rank
                 FROM leaderboard_records
             )
             WHERE stage_rank = 1
             ORDER BY stage_number ASC"
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
        let row = sqlx::query("SELECT COUNT(*) AS total FROM leaderboard_records WHERE stage_number = ?")
            .bind(stage.value())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| persistence_error("count records", e))?;
        let total: i64 = try_get_column(&row, "total")?;
        Ok(total.max(0) as u64)
    }

    async fn delete_record(&self, id: RecordId) -> Result<bool, LeaderboardError> {
        // The replay row goes with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM leaderboard_records WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("delete record", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReplayStore for SqliteStore {
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
             WHERE record_id = ?",
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

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT record_id FROM leaderboard_replays WHERE record_id IN (");
        let mut ids = builder.separated(", ");
        for id in record_ids {
            ids.push_bind(id.0);
        }
        ids.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_error("fetch replay presence", e))?;

        rows.iter()
            .map(|row| try_get_column(row, "record_id").map(RecordId))
            .collect()
    }
}

#[async_trait]
impl LeaderboardStore for SqliteStore {
    async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, LeaderboardError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| persistence_error("begin transaction", e))?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn health_check(&self) -> Result<(), LeaderboardError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("health check", e))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// A SQLite transaction. sqlx rolls it back when dropped uncommitted.
pub struct SqliteTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn active(&mut self) -> Result<&mut Transaction<'static, Sqlite>, LeaderboardError> {
        self.tx
            .as_mut()
            .ok_or_else(|| LeaderboardError::persistence("transaction already committed or rolled back"))
    }
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
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

fn try_get_column<'r, T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>>(
    row: &'r SqliteRow,
    column: &str,
) -> Result<T, LeaderboardError> {
    row.try_get(column)
        .map_err(|e| persistence_error(&format!("read '{column}' column"), e))
}

fn row_to_record(row: &SqliteRow) -> Result<Record, LeaderboardError> {
    let id: i64 = try_get_column(row, "id")?;
    let stage: i64 = try_get_column(row, "stage_number")?;
    let player_name: String = try_get_column(row, "player_name")?;
    let time: f64 = try_get_column(row, "time")?;
    let created_at: DateTime<Utc> = try_get_column(row, "created_at")?;

    Ok(Record {
        id: RecordId(id),
        stage_number: StageNumber::new(stage).map_err(|e| corrupt_column("stage_number", e))?,
        player_name: PlayerName::new(&player_name).map_err(|e| corrupt_column("player_name", e))?,
        time: LapTime::new(time).map_err(|e| corrupt_column("time", e))?,
        created_at,
    })
}

fn row_to_replay(row: &SqliteRow) -> Result<Replay, LeaderboardError> {
    let id: i64 = try_get_column(row, "id")?;
    let record_id: i64 = try_get_column(row, "record_id")?;
    let stage: i64 = try_get_column(row, "stage_number")?;
    let payload: Vec<u8> = try_get_column(row, "payload")?;

    Ok(Replay {
        id: ReplayId(id),
        record_id: RecordId(record_id),
        stage_number: StageNumber::new(stage).map_err(|e| corrupt_column("stage_number", e))?,
        payload,
    })
}
