//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decode::ErrorMode;
use crate::error::IngestError;
use crate::fetcher::FetcherConfig;

/// What to do with the consistent prefix of a truncated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncatedPolicy {
    /// Commit the prefix and plan the remainder next cycle.
    #[default]
    CommitPrefix,
    /// Drop the whole range and retry it next cycle.
    Discard,
}

/// Configuration for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chain slug (e.g. `"ethereum"`), part of the checkpoint key.
    pub chain: String,
    /// Unique stream name (used for checkpoint keys).
    pub stream_id: String,
    /// First height to deliver when no checkpoint exists.
    pub start_height: u64,
    /// Optional inclusive end height (bounded backfill). `None` = run forever.
    pub end_height: Option<u64>,
    /// Number of blocks behind head before a block is final.
    pub confirmation_depth: u64,
    /// Maximum heights per committed batch.
    pub max_batch_size: u64,
    /// Recent final blocks kept for reorg checks.
    pub window_size: usize,
    /// Upstream request budget shared by all calls. `0` = unlimited.
    pub requests_per_second: u32,
    pub fetcher: FetcherConfig,
    /// Sleep between cycles when nothing is final yet.
    pub poll_interval: Duration,
    pub decode_errors: ErrorMode,
    pub truncated: TruncatedPolicy,
    /// Consecutive failed cycles tolerated before the pipeline halts.
    pub max_cycle_failures: u32,
    /// Optional limit on a single handler invocation.
    pub handler_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            stream_id: "default".into(),
            start_height: 0,
            end_height: None,
            confirmation_depth: 75,
            max_batch_size: 1000,
            window_size: 256,
            requests_per_second: 10,
            fetcher: FetcherConfig::default(),
            poll_interval: Duration::from_secs(2),
            decode_errors: ErrorMode::Abort,
            truncated: TruncatedPolicy::CommitPrefix,
            max_cycle_failures: 10,
            handler_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), IngestError> {
        let fail = |msg: String| Err(IngestError::Config(msg));
        if self.chain.trim().is_empty() {
            return fail("chain must not be empty".into());
        }
        if self.stream_id.trim().is_empty() {
            return fail("stream_id must not be empty".into());
        }
        if self.max_batch_size == 0 {
            return fail("max_batch_size must be positive".into());
        }
        if self.window_size == 0 {
            return fail("window_size must be positive".into());
        }
        if self.fetcher.request_span == 0 || self.fetcher.concurrency == 0 {
            return fail("fetcher request_span and concurrency must be positive".into());
        }
        if self.fetcher.attempt_timeout.is_zero() {
            return fail("fetcher attempt_timeout must be positive".into());
        }
        if self.max_cycle_failures == 0 {
            return fail("max_cycle_failures must be positive".into());
        }
        if let Some(end) = self.end_height {
            if end < self.start_height {
                return fail(format!(
                    "end height {end} is below start height {}",
                    self.start_height
                ));
            }
        }
        Ok(())
    }
}
