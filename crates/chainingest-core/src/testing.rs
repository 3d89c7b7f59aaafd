//! Scripted in-memory ledger used by the unit tests of this crate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::decode::DecodeRule;
use crate::error::{DecodeError, IngestError};
use crate::source::LedgerSource;
use crate::types::{BlockHeader, BlockRange, BlockRef, LogFilter, LogRecord};

pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
pub const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

pub fn hash(number: u64, fork: &str) -> String {
    format!("0x{fork}{number:06x}")
}

/// Build a linked chain `0..len` on the given fork label.
pub fn chain(len: u64, fork: &str) -> Vec<BlockHeader> {
    (0..len)
        .map(|n| BlockHeader {
            number: n,
            hash: hash(n, fork),
            parent_hash: if n == 0 {
                "0xgenesis".into()
            } else {
                hash(n - 1, fork)
            },
            timestamp: (n * 12) as i64,
        })
        .collect()
}

pub fn log_at(header: &BlockHeader, log_index: u32, address: &str, data: Vec<u8>) -> LogRecord {
    LogRecord {
        block: header.block_ref(),
        tx_hash: format!("0xtx{:06x}{log_index:02x}", header.number),
        address: address.into(),
        topics: vec![TRANSFER_TOPIC.into()],
        data,
        log_index,
    }
}

#[derive(Default)]
struct Script {
    head: u64,
    headers: Vec<BlockHeader>,
    logs: Vec<LogRecord>,
    /// Heights at and above this are withheld from `blocks`.
    serve_below: Option<u64>,
}

/// A ledger whose contents and failures are set by the test.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
    /// Number of upcoming calls that fail with a transient error.
    pub transient_failures: AtomicU32,
    pub calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(headers: Vec<BlockHeader>, head: u64) -> Self {
        let source = Self::default();
        {
            let mut script = source.script.lock().unwrap();
            script.headers = headers;
            script.head = head;
        }
        source
    }

    pub fn with_logs(self, logs: Vec<LogRecord>) -> Self {
        self.script.lock().unwrap().logs = logs;
        self
    }

    pub fn set_head(&self, head: u64) {
        self.script.lock().unwrap().head = head;
    }

    pub fn serve_below(&self, height: Option<u64>) {
        self.script.lock().unwrap().serve_below = height;
    }

    /// Replace the chain from `from` onwards with `headers` and their logs.
    pub fn reorg(&self, from: u64, headers: Vec<BlockHeader>, logs: Vec<LogRecord>) {
        let mut script = self.script.lock().unwrap();
        script.headers.retain(|h| h.number < from);
        script.headers.extend(headers.into_iter().filter(|h| h.number >= from));
        script.logs.retain(|l| l.block.number < from);
        script.logs.extend(logs.into_iter().filter(|l| l.block.number >= from));
    }

    fn tick(&self) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::Rpc("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chain_head(&self) -> Result<u64, IngestError> {
        self.tick()?;
        Ok(self.script.lock().unwrap().head)
    }

    async fn blocks(&self, range: BlockRange) -> Result<Vec<BlockHeader>, IngestError> {
        self.tick()?;
        let script = self.script.lock().unwrap();
        let limit = script.serve_below.unwrap_or(u64::MAX);
        Ok(script
            .headers
            .iter()
            .filter(|h| range.contains(h.number) && h.number < limit)
            .cloned()
            .collect())
    }

    async fn logs(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<Vec<LogRecord>, IngestError> {
        self.tick()?;
        let script = self.script.lock().unwrap();
        // Reverse order: the fetcher must not rely on upstream ordering.
        Ok(script
            .logs
            .iter()
            .rev()
            .filter(|l| range.contains(l.block.number) && filter.matches(l))
            .cloned()
            .collect())
    }
}

pub fn block_ref(number: u64, fork: &str) -> BlockRef {
    BlockRef {
        number,
        hash: hash(number, fork),
    }
}

/// Decodes the first data byte; fails on empty data.
pub struct FirstByte;

impl DecodeRule<u8> for FirstByte {
    fn name(&self) -> &str {
        "first_byte"
    }

    fn topic0(&self) -> &str {
        TRANSFER_TOPIC
    }

    fn decode(&self, log: &LogRecord) -> Result<u8, DecodeError> {
        log.data
            .first()
            .copied()
            .ok_or_else(|| DecodeError::Malformed("empty data".into()))
    }
}
