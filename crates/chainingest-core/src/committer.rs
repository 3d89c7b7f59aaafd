//! Batch committer: delivers a final batch to the handler and advances the
//! cursor in the same store transaction.

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{Checkpoint, CheckpointStore, RecordSink, StoreTx};
use crate::error::IngestError;
use crate::handler::{BatchContext, BatchHandler};
use crate::types::{BlockData, BlockHeader, BlockRange, DecodedEvent};

/// A contiguous run of Final blocks and the events decoded from them.
#[derive(Debug, Clone)]
pub struct FinalBatch<E> {
    pub range: BlockRange,
    /// Chain head the blocks were judged final against.
    pub head: u64,
    /// Provenance: one header per height in `range`, ascending.
    pub headers: Vec<BlockHeader>,
    pub events: Vec<DecodedEvent<E>>,
}

impl<E> FinalBatch<E> {
    /// Build a batch from gate output. `blocks` must be non-empty and
    /// contiguous.
    pub fn new(
        blocks: &[BlockData],
        events: Vec<DecodedEvent<E>>,
        head: u64,
    ) -> Result<Self, IngestError> {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Err(IngestError::Other("cannot build an empty batch".into()));
        };
        let range = BlockRange::new(first.header.number, last.header.number + 1);
        if range.len() != blocks.len() as u64 {
            return Err(IngestError::Other(format!(
                "batch {range} is not contiguous ({} blocks)",
                blocks.len()
            )));
        }
        Ok(Self {
            range,
            head,
            headers: blocks.iter().map(|b| b.header.clone()).collect(),
            events,
        })
    }

    /// Hash of the last block in the batch.
    pub fn last_hash(&self) -> &str {
        self.headers.last().map(|h| h.hash.as_str()).unwrap_or_default()
    }
}

/// Summary of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub range: BlockRange,
    /// The new cursor (`range.to`).
    pub cursor: u64,
    /// Hash of block `cursor - 1`.
    pub block_hash: String,
    pub events: usize,
}

/// Sole writer of the cursor.
pub struct BatchCommitter<S> {
    store: Arc<S>,
    chain_id: String,
    stream_id: String,
    cursor: u64,
    handler_timeout: Option<Duration>,
}

impl<S: CheckpointStore> BatchCommitter<S> {
    pub fn new(
        store: Arc<S>,
        chain_id: impl Into<String>,
        stream_id: impl Into<String>,
        cursor: u64,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            stream_id: stream_id.into(),
            cursor,
            handler_timeout: None,
        }
    }

    /// Fail (and roll back) a batch whose handler runs longer than `timeout`.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// The committed cursor.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Reload the cursor from the store, falling back to `start_height`.
    pub async fn resume(&mut self, start_height: u64) -> Result<Option<Checkpoint>, IngestError> {
        let checkpoint = self.store.load(&self.chain_id, &self.stream_id).await?;
        self.cursor = checkpoint.as_ref().map_or(start_height, |cp| cp.cursor);
        Ok(checkpoint)
    }

    /// Deliver `batch` to `handler` and advance the cursor atomically.
    ///
    /// On any failure the transaction is rolled back and the cursor is left
    /// unchanged.
    pub async fn commit<E, H>(
        &mut self,
        batch: FinalBatch<E>,
        handler: &H,
    ) -> Result<CommitResult, IngestError>
    where
        E: Send + Sync,
        H: BatchHandler<E> + ?Sized,
    {
        let range = batch.range;
        let fail = |reason: String| IngestError::Commit { range, reason };

        if range.from != self.cursor || range.to <= self.cursor {
            return Err(fail(format!(
                "batch does not start at the cursor ({}) or does not advance it",
                self.cursor
            )));
        }
        if batch.headers.len() as u64 != range.len() {
            return Err(fail("batch headers do not cover its range".into()));
        }
        if let Some(stray) = batch.events.iter().find(|e| !range.contains(e.block.number)) {
            return Err(fail(format!(
                "event at block {} lies outside the batch",
                stray.block.number
            )));
        }

        let ctx = BatchContext {
            chain: self.chain_id.clone(),
            stream_id: self.stream_id.clone(),
            range,
            head: batch.head,
            blocks: batch.headers.clone(),
        };
        let checkpoint = Checkpoint::new(
            self.chain_id.as_str(),
            self.stream_id.as_str(),
            range.to,
            batch.last_hash(),
        );

        let mut tx = self.store.begin().await.map_err(|e| fail(e.to_string()))?;

        if let Err(e) = self.run_handler(&ctx, &batch.events, handler, &mut tx).await {
            rollback(tx, range).await;
            return Err(fail(e.to_string()));
        }
        if let Err(e) = tx.write_checkpoint(&checkpoint).await {
            rollback(tx, range).await;
            return Err(fail(e.to_string()));
        }
        tx.commit().await.map_err(|e| fail(e.to_string()))?;

        self.cursor = range.to;
        tracing::info!(
            chain = %self.chain_id,
            stream = %self.stream_id,
            range = %range,
            events = batch.events.len(),
            cursor = self.cursor,
            "batch committed"
        );
        Ok(CommitResult {
            range,
            cursor: range.to,
            block_hash: checkpoint.block_hash,
            events: batch.events.len(),
        })
    }

    async fn run_handler<E, H>(
        &self,
        ctx: &BatchContext,
        events: &[DecodedEvent<E>],
        handler: &H,
        tx: &mut S::Tx,
    ) -> Result<(), IngestError>
    where
        E: Send + Sync,
        H: BatchHandler<E> + ?Sized,
    {
        let sink: &mut dyn RecordSink = tx;
        let fut = handler.handle(ctx, events, sink);
        match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                IngestError::Handler {
                    handler: handler.name().to_string(),
                    reason: format!("timed out after {}ms", limit.as_millis()),
                }
            })?,
            None => fut.await,
        }
    }
}

async fn rollback<T: StoreTx>(tx: T, range: BlockRange) {
    if let Err(e) = tx.rollback().await {
        tracing::error!(range = %range, error = %e, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::testing::chain;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Recording {
        calls: AtomicU32,
        fail: bool,
        stall: Option<Duration>,
    }

    impl Recording {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail: false,
                stall: None,
            }
        }
    }

    #[async_trait]
    impl BatchHandler<u64> for Recording {
        async fn handle(
            &self,
            ctx: &BatchContext,
            events: &[DecodedEvent<u64>],
            sink: &mut dyn RecordSink,
        ) -> Result<(), IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for e in events {
                sink.put_record("values", &e.log_key(), json!(e.payload)).await?;
            }
            sink.put_record("ranges", &ctx.range.to_string(), json!(ctx.blocks.len()))
                .await?;
            if let Some(d) = self.stall {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(IngestError::Handler {
                    handler: "recording".into(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn batch(from: u64, to: u64) -> FinalBatch<u64> {
        let blocks: Vec<BlockData> = chain(to, "a")[from as usize..]
            .iter()
            .map(|h| BlockData {
                header: h.clone(),
                logs: vec![],
            })
            .collect();
        let events = blocks
            .iter()
            .map(|b| DecodedEvent {
                block: b.header.block_ref(),
                tx_hash: format!("0xtx{}", b.header.number),
                address: "0xc".into(),
                log_index: 0,
                rule: "r".into(),
                payload: b.header.number,
            })
            .collect();
        FinalBatch::new(&blocks, events, 1_000).unwrap()
    }

    fn committer(store: &MemoryCheckpointStore, cursor: u64) -> BatchCommitter<MemoryCheckpointStore> {
        BatchCommitter::new(Arc::new(store.clone()), "ethereum", "s", cursor)
    }

    #[tokio::test]
    async fn commit_writes_records_and_checkpoint_together() {
        let store = MemoryCheckpointStore::new();
        let mut c = committer(&store, 0);
        let handler = Recording::ok();

        let res = c.commit(batch(0, 10), &handler).await.unwrap();
        assert_eq!(res.cursor, 10);
        assert_eq!(res.events, 10);
        assert_eq!(c.cursor(), 10);

        let cp = store.load("ethereum", "s").await.unwrap().unwrap();
        assert_eq!(cp.cursor, 10);
        assert_eq!(cp.block_hash, chain(10, "a")[9].hash);
        assert_eq!(store.records("values").len(), 10);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_leaves_cursor_unchanged() {
        let store = MemoryCheckpointStore::new();
        let mut c = committer(&store, 0);
        let handler = Recording {
            fail: true,
            ..Recording::ok()
        };

        let err = c.commit(batch(0, 10), &handler).await.unwrap_err();
        assert!(matches!(err, IngestError::Commit { range, .. } if range == BlockRange::new(0, 10)));
        assert_eq!(c.cursor(), 0);
        assert!(store.load("ethereum", "s").await.unwrap().is_none());
        assert!(store.records("values").is_empty(), "handler writes rolled back");
    }

    #[tokio::test]
    async fn store_failure_leaves_cursor_unchanged() {
        let store = MemoryCheckpointStore::new();
        store.fail_commits(true);
        let mut c = committer(&store, 0);

        assert!(c.commit(batch(0, 5), &Recording::ok()).await.is_err());
        assert_eq!(c.cursor(), 0);

        store.fail_commits(false);
        let res = c.commit(batch(0, 5), &Recording::ok()).await.unwrap();
        assert_eq!(res.cursor, 5);
    }

    #[tokio::test]
    async fn rejects_batches_not_at_the_cursor() {
        let store = MemoryCheckpointStore::new();
        let mut c = committer(&store, 5);
        let handler = Recording::ok();

        assert!(c.commit(batch(0, 5), &handler).await.is_err());
        assert!(c.commit(batch(6, 9), &handler).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        c.commit(batch(5, 9), &handler).await.unwrap();
        assert_eq!(c.cursor(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out_and_rolls_back() {
        let store = MemoryCheckpointStore::new();
        let mut c = committer(&store, 0).with_handler_timeout(Some(Duration::from_secs(1)));
        let handler = Recording {
            stall: Some(Duration::from_secs(5)),
            ..Recording::ok()
        };

        let err = c.commit(batch(0, 3), &handler).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert_eq!(c.cursor(), 0);
        assert!(store.records("ranges").is_empty());
    }

    #[test]
    fn batch_requires_contiguous_blocks() {
        let headers = chain(5, "a");
        let blocks: Vec<BlockData> = [&headers[0], &headers[2]]
            .iter()
            .map(|h| BlockData {
                header: (*h).clone(),
                logs: vec![],
            })
            .collect();
        assert!(FinalBatch::<u64>::new(&blocks, vec![], 10).is_err());
        assert!(FinalBatch::<u64>::new(&[], vec![], 10).is_err());
    }
}
