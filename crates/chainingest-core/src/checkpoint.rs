//! Checkpoint persistence: the committed cursor plus the records the
//! handler writes, under one transaction.
//!
//! A checkpoint stores the cursor (the next height to fetch) and the hash
//! of the block just below it. The committer writes both the handler's
//! records and the new checkpoint through a single [`StoreTx`]; either all
//! of it becomes visible or none of it does.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::types::BlockRef;

/// A persisted pipeline position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique stream identifier.
    pub stream_id: String,
    /// Every height strictly below `cursor` has been delivered.
    pub cursor: u64,
    /// Hash of block `cursor - 1`; empty when nothing was committed.
    pub block_hash: String,
    /// Unix timestamp of when this checkpoint was written.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(
        chain_id: impl Into<String>,
        stream_id: impl Into<String>,
        cursor: u64,
        block_hash: impl Into<String>,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            stream_id: stream_id.into(),
            cursor,
            block_hash: block_hash.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The last committed block, if any.
    pub fn last_block(&self) -> Option<BlockRef> {
        if self.cursor == 0 || self.block_hash.is_empty() {
            return None;
        }
        Some(BlockRef {
            number: self.cursor - 1,
            hash: self.block_hash.clone(),
        })
    }
}

/// Keyed record writes available to batch handlers.
///
/// Writes are upserts: re-delivering a batch after a failed commit
/// overwrites rather than duplicates.
#[async_trait]
pub trait RecordSink: Send {
    async fn put_record(
        &mut self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), IngestError>;
}

/// An open store transaction.
#[async_trait]
pub trait StoreTx: RecordSink {
    /// Stage the checkpoint (upsert by chain + stream).
    async fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), IngestError>;

    /// Make every staged write visible atomically.
    async fn commit(self) -> Result<(), IngestError>;

    /// Discard every staged write.
    async fn rollback(self) -> Result<(), IngestError>;
}

/// Storage backend for checkpoints and handler records.
///
/// Implementations: [`MemoryCheckpointStore`] here and `SqliteStorage` in
/// `chainingest-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    type Tx: StoreTx;

    /// Load the checkpoint for a chain + stream pair.
    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, IngestError>;

    /// Delete the checkpoint so the stream restarts from its start height.
    async fn reset(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    checkpoints: HashMap<String, Checkpoint>,
    records: BTreeMap<(String, String), serde_json::Value>,
}

/// In-memory store for tests and ephemeral pipelines.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<MemoryState>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail (fault injection for tests).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// A committed record, if present.
    pub fn record(&self, collection: &str, key: &str) -> Option<serde_json::Value> {
        self.lock()
            .ok()?
            .records
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }

    /// All committed records of `collection`, ordered by key.
    pub fn records(&self, collection: &str) -> Vec<(String, serde_json::Value)> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        state
            .records
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect()
    }

    fn key(chain_id: &str, stream_id: &str) -> String {
        format!("{chain_id}:{stream_id}")
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, IngestError> {
        self.state
            .lock()
            .map_err(|_| IngestError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    type Tx = MemoryTx;

    async fn load(
        &self,
        chain_id: &str,
        stream_id: &str,
    ) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self
            .lock()?
            .checkpoints
            .get(&Self::key(chain_id, stream_id))
            .cloned())
    }

    async fn begin(&self) -> Result<MemoryTx, IngestError> {
        Ok(MemoryTx {
            store: self.clone(),
            checkpoint: None,
            records: Vec::new(),
        })
    }

    async fn reset(&self, chain_id: &str, stream_id: &str) -> Result<(), IngestError> {
        self.lock()?
            .checkpoints
            .remove(&Self::key(chain_id, stream_id));
        Ok(())
    }
}

/// Staged writes against a [`MemoryCheckpointStore`].
pub struct MemoryTx {
    store: MemoryCheckpointStore,
    checkpoint: Option<Checkpoint>,
    records: Vec<((String, String), serde_json::Value)>,
}

#[async_trait]
impl RecordSink for MemoryTx {
    async fn put_record(
        &mut self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), IngestError> {
        self.records
            .push(((collection.to_string(), key.to_string()), value));
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        self.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    async fn commit(self) -> Result<(), IngestError> {
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(IngestError::Storage("injected commit failure".into()));
        }
        let mut state = self.store.lock()?;
        for (key, value) in self.records {
            state.records.insert(key, value);
        }
        if let Some(cp) = self.checkpoint {
            let key = MemoryCheckpointStore::key(&cp.chain_id, &cp.stream_id);
            state.checkpoints.insert(key, cp);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), IngestError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_block_of_fresh_checkpoint_is_none() {
        assert!(Checkpoint::new("eth", "s", 0, "").last_block().is_none());
        let cp = Checkpoint::new("eth", "s", 10, "0xabc");
        assert_eq!(cp.last_block().unwrap().number, 9);
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let store = MemoryCheckpointStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.put_record("transfers", "0xt:0", json!({"v": 1})).await.unwrap();
        tx.write_checkpoint(&Checkpoint::new("eth", "s", 5, "0x4"))
            .await
            .unwrap();

        assert!(store.load("eth", "s").await.unwrap().is_none());
        assert!(store.record("transfers", "0xt:0").is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.load("eth", "s").await.unwrap().unwrap().cursor, 5);
        assert_eq!(store.record("transfers", "0xt:0"), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn rollback_discards_everything() {
        let store = MemoryCheckpointStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.put_record("transfers", "k", json!(1)).await.unwrap();
        tx.write_checkpoint(&Checkpoint::new("eth", "s", 5, "0x4"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.load("eth", "s").await.unwrap().is_none());
        assert!(store.records("transfers").is_empty());
    }

    #[tokio::test]
    async fn records_are_upserted() {
        let store = MemoryCheckpointStore::new();
        for v in [1, 2] {
            let mut tx = store.begin().await.unwrap();
            tx.put_record("c", "k", json!(v)).await.unwrap();
            tx.commit().await.unwrap();
        }
        assert_eq!(store.records("c"), vec![("k".to_string(), json!(2))]);
    }

    #[tokio::test]
    async fn reset_removes_checkpoint() {
        let store = MemoryCheckpointStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_checkpoint(&Checkpoint::new("eth", "s", 5, "0x4"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store.reset("eth", "s").await.unwrap();
        assert!(store.load("eth", "s").await.unwrap().is_none());
    }
}
