//! Finality gate: withholds blocks until they are `confirmation_depth`
//! behind the chain head.
//!
//! Block lifecycle:
//!
//! ```text
//! Fetched ──► Pending (H + depth > head) ──► Final (H + depth <= head)
//!                 │
//!                 └─ replaced silently if a different block arrives at H
//! ```
//!
//! A Pending block is only promoted by admitting it again under a higher
//! head, so whatever becomes Final is the latest copy fetched.
//!
//! A Final block is never replaced. Upstream data that contradicts a Final
//! block (different hash at the same height, or a child whose parent hash
//! disagrees) is reported as [`IngestError::ReorgBeyondFinality`].

use std::collections::BTreeMap;

use crate::error::IngestError;
use crate::types::{BlockData, BlockRef};

/// Result of admitting a batch of fetched blocks.
#[derive(Debug, Clone, Default)]
pub struct GateOutput {
    /// Ascending, contiguous run of Final blocks from the start of the input.
    pub final_blocks: Vec<BlockData>,
    /// Blocks still waiting for confirmations.
    pub pending: Vec<BlockRef>,
    /// Pending blocks that were replaced by a different block at the same height.
    pub superseded: Vec<BlockRef>,
}

/// Classifies fetched blocks as Pending or Final.
pub struct FinalityGate {
    confirmation_depth: u64,
    /// Highest head seen so far.
    head: u64,
    /// Recently finalized blocks by height.
    finalized: BTreeMap<u64, BlockRef>,
    pending: BTreeMap<u64, BlockData>,
    window_size: usize,
}

impl FinalityGate {
    pub fn new(confirmation_depth: u64, window_size: usize) -> Self {
        Self {
            confirmation_depth,
            head: 0,
            finalized: BTreeMap::new(),
            pending: BTreeMap::new(),
            window_size: window_size.max(1),
        }
    }

    /// Mark `block` as Final, typically the last committed block on resume.
    pub fn seed(&mut self, block: BlockRef) {
        self.finalized.insert(block.number, block);
    }

    /// Returns `true` if `height` is final under the current head.
    pub fn is_final(&self, height: u64) -> bool {
        is_final_at(height, self.head, self.confirmation_depth)
    }

    /// The highest head observed.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// The Final block recorded at `height`, if still in the window.
    pub fn finalized(&self, height: u64) -> Option<&BlockRef> {
        self.finalized.get(&height)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Admit blocks (ascending by height) observed with chain head `head`.
    pub fn admit(
        &mut self,
        blocks: Vec<BlockData>,
        head: u64,
    ) -> Result<GateOutput, IngestError> {
        self.observe_head(head);

        let mut out = GateOutput::default();
        let mut emitting = true;
        for block in blocks {
            let height = block.header.number;
            if self.is_final(height) {
                self.check_against_final(&block)?;
                self.pending.remove(&height);
                self.finalized.insert(height, block.header.block_ref());
                if emitting {
                    out.final_blocks.push(block);
                }
                continue;
            }

            emitting = false;
            if let Some(previous) = self.pending.get(&height) {
                if previous.header.hash != block.header.hash {
                    tracing::debug!(
                        height,
                        old = %previous.header.hash,
                        new = %block.header.hash,
                        "pending block superseded"
                    );
                    out.superseded.push(previous.header.block_ref());
                }
            }
            out.pending.push(block.header.block_ref());
            self.pending.insert(height, block);
        }
        self.trim();
        Ok(out)
    }

    /// Forget everything below `height`, except the final ref at `height - 1`
    /// and up to `window_size` final refs before it.
    pub fn prune_below(&mut self, height: u64) {
        self.pending = self.pending.split_off(&height);
        let keep_from = height.saturating_sub(self.window_size as u64);
        self.finalized = self.finalized.split_off(&keep_from);
    }

    /// Record a chain head. A head lower than one already seen is ignored.
    pub fn observe_head(&mut self, head: u64) {
        if head < self.head {
            tracing::debug!(
                previous = self.head,
                reported = head,
                "chain head went backwards; keeping the higher head"
            );
            return;
        }
        self.head = head;
    }

    fn check_against_final(&self, block: &BlockData) -> Result<(), IngestError> {
        let header = &block.header;
        if let Some(known) = self.finalized.get(&header.number) {
            if known.hash != header.hash {
                tracing::error!(
                    height = header.number,
                    finalized = %known.hash,
                    reported = %header.hash,
                    "upstream contradicts a final block"
                );
                return Err(IngestError::ReorgBeyondFinality {
                    block_number: header.number,
                    finalized: known.hash.clone(),
                    reported: header.hash.clone(),
                });
            }
        }
        if let Some(parent) = header
            .number
            .checked_sub(1)
            .and_then(|p| self.finalized.get(&p))
        {
            if parent.hash != header.parent_hash {
                tracing::error!(
                    height = parent.number,
                    finalized = %parent.hash,
                    reported = %header.parent_hash,
                    "upstream block does not descend from the final chain"
                );
                return Err(IngestError::ReorgBeyondFinality {
                    block_number: parent.number,
                    finalized: parent.hash.clone(),
                    reported: header.parent_hash.clone(),
                });
            }
        }
        Ok(())
    }

    fn trim(&mut self) {
        while self.finalized.len() > self.window_size {
            self.finalized.pop_first();
        }
    }
}

/// Block `height` is final once `head >= height + depth`.
pub fn is_final_at(height: u64, head: u64, depth: u64) -> bool {
    height.saturating_add(depth) <= head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_ref, chain};
    use crate::types::BlockHeader;

    fn data(headers: &[BlockHeader]) -> Vec<BlockData> {
        headers
            .iter()
            .map(|h| BlockData {
                header: h.clone(),
                logs: vec![],
            })
            .collect()
    }

    #[test]
    fn finality_boundary() {
        assert!(is_final_at(25, 100, 75));
        assert!(!is_final_at(26, 100, 75));
        assert!(is_final_at(0, 0, 0));
    }

    #[test]
    fn emits_final_prefix_and_holds_pending() {
        let headers = chain(10, "a");
        let mut gate = FinalityGate::new(5, 64);
        // head 12 → heights <= 7 are final
        let out = gate.admit(data(&headers), 12).unwrap();
        assert_eq!(out.final_blocks.len(), 8);
        assert_eq!(out.pending.len(), 2);
        assert_eq!(out.pending[0].number, 8);
        assert_eq!(gate.pending_len(), 2);
    }

    #[test]
    fn pending_block_replaced_silently() {
        let a = chain(10, "a");
        let b = chain(10, "b");
        let mut gate = FinalityGate::new(5, 64);
        gate.admit(data(&a[8..]), 12).unwrap();

        let out = gate.admit(data(&b[8..]), 12).unwrap();
        assert!(out.final_blocks.is_empty());
        assert_eq!(out.superseded, vec![block_ref(8, "a"), block_ref(9, "a")]);

        assert_eq!(gate.pending_len(), 2);

        // refetched once final, the replacement is what gets emitted
        let out = gate.admit(data(&b[8..]), 14).unwrap();
        let hashes: Vec<&str> = out.final_blocks.iter().map(|b| b.header.hash.as_str()).collect();
        assert_eq!(hashes, vec![b[8].hash.as_str(), b[9].hash.as_str()]);
        assert!(out.superseded.is_empty());
        assert_eq!(gate.pending_len(), 0);
    }

    #[test]
    fn conflicting_final_hash_is_fatal() {
        let mut gate = FinalityGate::new(5, 64);
        gate.admit(data(&chain(5, "a")), 100).unwrap();

        let err = gate.admit(data(&chain(5, "b")[3..4]), 100).unwrap_err();
        assert!(matches!(
            err,
            IngestError::ReorgBeyondFinality { block_number: 3, .. }
        ));
    }

    #[test]
    fn child_of_a_different_final_parent_is_fatal() {
        let mut gate = FinalityGate::new(5, 64);
        gate.seed(block_ref(9, "a"));
        let forked = chain(12, "b");

        let err = gate.admit(data(&forked[10..]), 100).unwrap_err();
        match err {
            IngestError::ReorgBeyondFinality {
                block_number,
                finalized,
                reported,
            } => {
                assert_eq!(block_number, 9);
                assert_eq!(finalized, block_ref(9, "a").hash);
                assert_eq!(reported, block_ref(9, "b").hash);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn head_never_moves_backwards() {
        let mut gate = FinalityGate::new(5, 64);
        gate.admit(vec![], 50).unwrap();
        gate.admit(vec![], 40).unwrap();
        assert_eq!(gate.head(), 50);
        assert!(gate.is_final(45));
    }

    #[test]
    fn observed_head_survives_a_lower_report() {
        let mut gate = FinalityGate::new(75, 64);
        gate.seed(block_ref(49, "a"));
        gate.observe_head(125);
        assert!(gate.is_final(50));

        gate.admit(vec![], 100).unwrap();
        assert_eq!(gate.head(), 125);
    }

    #[test]
    fn window_is_bounded() {
        let mut gate = FinalityGate::new(0, 4);
        gate.admit(data(&chain(20, "a")), 100).unwrap();
        assert!(gate.finalized(19).is_some());
        assert!(gate.finalized(15).is_none());

        gate.prune_below(20);
        assert!(gate.finalized(19).is_some(), "linkage ref survives pruning");
    }
}
