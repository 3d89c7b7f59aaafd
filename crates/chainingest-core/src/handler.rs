//! Batch handler trait: the user's hook into each committed batch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::RecordSink;
use crate::error::IngestError;
use crate::types::{BlockHeader, BlockRange, DecodedEvent};

/// Context passed to a [`BatchHandler`] with every batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// Chain slug.
    pub chain: String,
    pub stream_id: String,
    /// The heights this batch covers.
    pub range: BlockRange,
    /// Chain head observed when the range was planned.
    pub head: u64,
    /// Headers of every block in `range`, ascending.
    pub blocks: Vec<BlockHeader>,
}

impl BatchContext {
    /// Header of the block at `number`, if it is part of this batch.
    pub fn block(&self, number: u64) -> Option<&BlockHeader> {
        let idx = number.checked_sub(self.range.from)? as usize;
        self.blocks.get(idx).filter(|h| h.number == number)
    }
}

/// Processes one ordered batch of decoded events.
///
/// The handler runs inside the store transaction that also advances the
/// cursor. Writes must go through `sink` to be covered by that transaction.
/// A batch may be redelivered after a failed commit, so writes should be
/// keyed upserts.
#[async_trait]
pub trait BatchHandler<E: Send + Sync>: Send + Sync {
    /// Handler name, used in logs and errors.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(
        &self,
        ctx: &BatchContext,
        events: &[DecodedEvent<E>],
        sink: &mut dyn RecordSink,
    ) -> Result<(), IngestError>;
}

#[async_trait]
impl<E, T> BatchHandler<E> for Arc<T>
where
    E: Send + Sync,
    T: BatchHandler<E> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(
        &self,
        ctx: &BatchContext,
        events: &[DecodedEvent<E>],
        sink: &mut dyn RecordSink,
    ) -> Result<(), IngestError> {
        (**self).handle(ctx, events, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::chain;

    #[test]
    fn context_looks_up_blocks_by_height() {
        let ctx = BatchContext {
            chain: "ethereum".into(),
            stream_id: "s".into(),
            range: BlockRange::new(3, 6),
            head: 100,
            blocks: chain(6, "a")[3..].to_vec(),
        };
        assert_eq!(ctx.block(4).unwrap().number, 4);
        assert!(ctx.block(2).is_none());
        assert!(ctx.block(6).is_none());
    }
}
