//! Range planner: decides the next block range to fetch.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::types::BlockRange;

/// Plans contiguous ranges that start at the committed cursor and stay
/// below the finality horizon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePlanner {
    /// Blocks behind head considered final.
    pub confirmation_depth: u64,
    /// Maximum heights per batch.
    pub max_batch_size: u64,
    /// Inclusive upper bound for a backfill; `None` follows the head forever.
    pub end_height: Option<u64>,
}

impl RangePlanner {
    pub fn new(confirmation_depth: u64, max_batch_size: u64) -> Self {
        Self {
            confirmation_depth,
            max_batch_size: max_batch_size.max(1),
            end_height: None,
        }
    }

    pub fn with_end_height(mut self, end: Option<u64>) -> Self {
        self.end_height = end;
        self
    }

    /// Highest height (exclusive) that is final under `chain_head`.
    pub fn safe_height(&self, chain_head: u64) -> u64 {
        chain_head.saturating_sub(self.confirmation_depth)
    }

    /// The next range to fetch, or `None` if nothing is final yet.
    ///
    /// `cursor` is the next height to fetch. A cursor ahead of the reported
    /// head means the store and the upstream disagree about the chain.
    pub fn next_range(
        &self,
        cursor: u64,
        chain_head: u64,
    ) -> Result<Option<BlockRange>, IngestError> {
        if cursor > chain_head {
            return Err(IngestError::Config(format!(
                "cursor {cursor} is ahead of chain head {chain_head}"
            )));
        }
        if self.is_finished(cursor) {
            return Ok(None);
        }

        let mut to = self
            .safe_height(chain_head)
            .min(cursor.saturating_add(self.max_batch_size));
        if let Some(end) = self.end_height {
            to = to.min(end.saturating_add(1));
        }
        if to <= cursor {
            return Ok(None);
        }
        Ok(Some(BlockRange::new(cursor, to)))
    }

    /// Returns `true` once a bounded backfill has delivered `end_height`.
    pub fn is_finished(&self, cursor: u64) -> bool {
        matches!(self.end_height, Some(end) if cursor > end)
    }
}
