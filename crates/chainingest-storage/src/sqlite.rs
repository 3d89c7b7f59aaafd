//! SQLite storage backend for ChainIngest.
//!
//! Persists checkpoints and handler records to a single SQLite file. Every
//! batch is written through one [`SqliteTx`], so records and the cursor
//! become visible together.
//!
//! # Usage
//! ```rust,no_run
//! use chainingest_storage::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ingest.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Transaction};
use tracing::debug;

use chainingest_core::checkpoint::{Checkpoint, CheckpointStore, RecordSink, StoreTx};
use chainingest_core::error::IngestError;

fn db_err(e: sqlx::Error) -> IngestError {
    IngestError::Storage(e.to_string())
}

/// SQLite-backed storage for checkpoints and records.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ingest.db"`) or a full
    /// SQLite URL (`"sqlite:./ingest.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection would see its own empty database, so the pool
    /// is pinned to one connection that never expires. All data is lost
    /// when the storage is dropped.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IngestError> {
        // WAL lets status queries read while a batch transaction is open
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                stream_id    TEXT    NOT NULL,
                cursor       INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, stream_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                collection   TEXT    NOT NULL,
                key          TEXT    NOT NULL,
                value_json   TEXT    NOT NULL,
                PRIMARY KEY (collection, key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    // ─── Record queries ─────────────────────────────────────────────────────────

    /// A committed record, if present.
    pub async fn record(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, IngestError> {
        let row = sqlx::query("SELECT value_json FROM records WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|r| parse_json(r.get("value_json"))).transpose()
    }

    /// All committed records of `collection`, ordered by key.
    pub async fn records(
        &self,
        collection: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, IngestError> {
        let rows = sqlx::query(
            "SELECT key, value_json FROM records WHERE collection = ? ORDER BY key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|r| -> Result<(String, serde_json::Value), IngestError> {
                Ok((r.get("key"), parse_json(r.get("value_json"))?))
            })
            .collect()
    }

    /// Record counts per collection, ordered by collection name.
    pub async fn record_counts(&self) -> Result<Vec<(String, u64)>, IngestError> {
        let rows = sqlx::query(
            "SELECT collection, COUNT(*) AS cnt FROM records GROUP BY collection ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("collection"), r.get::<i64, _>("cnt") as u64))
            .collect())
    }

    /// Every stored checkpoint, for status reporting.
    pub async fn checkpoints(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let rows = sqlx::query(
            "SELECT chain_id, stream_id, cursor, block_hash, updated_at
             FROM checkpoints ORDER BY chain_id, stream_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|r| checkpoint_from_row(&r)).collect())
    }
}

fn parse_json(raw: String) -> Result<serde_json::Value, IngestError> {
    serde_json::from_str(&raw).map_err(|e| IngestError::Storage(format!("corrupt record: {e}")))
}

fn checkpoint_from_row(r: &sqlx::sqlite::SqliteRow) -> Checkpoint {
    Checkpoint {
        chain_id: r.get("chain_id"),
        stream_id: r.get("stream_id"),
        cursor: r.get::<i64, _>("cursor") as u64,
        block_hash: r.get("block_hash"),
        updated_at: r.get("updated_at"),
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    type Tx = SqliteTx;

    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError> {
        let row = sqlx::query(
            "SELECT chain_id, stream_id, cursor, block_hash, updated_at
             FROM checkpoints WHERE chain_id = ? AND stream_id = ?",
        )
        .bind(chain_id)
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| checkpoint_from_row(&r)))
    }

    async fn begin(&self) -> Result<SqliteTx, IngestError> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(SqliteTx { tx, records: 0 })
    }

    async fn reset(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ? AND stream_id = ?")
            .bind(chain_id)
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        debug!(chain_id, stream_id, "checkpoint reset");
        Ok(())
    }
}

/// An open SQLite transaction. Dropping it without [`StoreTx::commit`]
/// rolls it back.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
    records: usize,
}

#[async_trait]
impl RecordSink for SqliteTx {
    async fn put_record(
        &mut self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), IngestError> {
        let json = serde_json::to_string(&value).map_err(|e| IngestError::Storage(e.to_string()))?;
        sqlx::query("INSERT OR REPLACE INTO records (collection, key, value_json) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(key)
            .bind(json)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

        self.records += 1;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, stream_id, cursor, block_hash, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.stream_id)
        .bind(checkpoint.cursor as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            stream_id = %checkpoint.stream_id,
            cursor = checkpoint.cursor,
            "checkpoint staged"
        );
        Ok(())
    }

    async fn commit(self) -> Result<(), IngestError> {
        let records = self.records;
        self.tx.commit().await.map_err(db_err)?;
        debug!(records, "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), IngestError> {
        self.tx.rollback().await.map_err(db_err)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
