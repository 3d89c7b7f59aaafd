//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The subset of a block header the pipeline needs for ordering and finality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }

    /// Returns the `(number, hash)` identifier of this block.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash.clone(),
        }
    }
}

/// Identifies a block by height and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

// ─── LogRecord ────────────────────────────────────────────────────────────────

/// A raw log emitted by a contract, as returned by the upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// The block that contains this log.
    pub block: BlockRef,
    /// Hash of the transaction that emitted the log.
    pub tx_hash: String,
    /// Emitting contract address.
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed payload.
    pub data: Vec<u8>,
    /// Position of the log within its block.
    pub log_index: u32,
}

impl LogRecord {
    /// Returns `topics[0]`, if present.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(|s| s.as_str())
    }
}

/// One fetched block: its header plus the matching logs, ordered by log index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub header: BlockHeader,
    pub logs: Vec<LogRecord>,
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// A half-open interval of block heights `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    /// First height (inclusive).
    pub from: u64,
    /// End height (exclusive).
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of heights in the range.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && height < self.to
    }

    /// Last height in the range, if it is not empty.
    pub fn last(&self) -> Option<u64> {
        (!self.is_empty()).then(|| self.to - 1)
    }

    /// Split into consecutive sub-ranges of at most `span` heights.
    pub fn split(&self, span: u64) -> Vec<BlockRange> {
        let span = span.max(1);
        let mut out = Vec::new();
        let mut start = self.from;
        while start < self.to {
            let end = start.saturating_add(span).min(self.to);
            out.push(BlockRange::new(start, end));
            start = end;
        }
        out
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Server-side log filter sent with `getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only fetch logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only fetch logs with one of these topic[0] values (empty = all events).
    pub topic0_values: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic0(&self, topic0: &str) -> bool {
        self.topic0_values.is_empty()
            || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }

    /// Returns `true` if the log passes both the address and topic0 checks.
    pub fn matches(&self, log: &LogRecord) -> bool {
        self.matches_address(&log.address)
            && log.topic0().map(|t| self.matches_topic0(t)).unwrap_or(false)
    }
}

// ─── DecodedEvent ─────────────────────────────────────────────────────────────

/// A typed event decoded from exactly one [`LogRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent<E> {
    /// Block the source log belongs to.
    pub block: BlockRef,
    /// Transaction hash.
    pub tx_hash: String,
    /// Emitting contract address.
    pub address: String,
    /// Log index within the block.
    pub log_index: u32,
    /// Name of the decode rule that produced the payload.
    pub rule: String,
    /// The typed payload.
    pub payload: E,
}

impl<E> DecodedEvent<E> {
    /// Globally unique key of the source log: `tx_hash:log_index`.
    pub fn log_key(&self) -> String {
        format!("{}:{}", self.tx_hash, self.log_index)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
