//! Block and log fetcher.
//!
//! Splits a planned range into sub-ranges of `request_span` blocks and
//! fetches them concurrently (results kept in order). Every upstream call
//! goes through the shared [`RateLimiter`], an attempt deadline, and a
//! bounded [`Backoff`]; retries rotate through the configured sources.
//!
//! Responses are cut down to the contiguous, internally consistent prefix
//! of the requested range. A short or inconsistent response is reported as
//! a truncated outcome rather than an error.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::policy::{RateLimiter, RetryConfig, RetryPolicy};
use crate::source::LedgerSource;
use crate::types::{BlockData, BlockHeader, BlockRange, LogFilter, LogRecord};

/// Fetcher tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Blocks per upstream request.
    pub request_span: u64,
    /// Maximum sub-ranges in flight at once.
    pub concurrency: usize,
    /// Deadline for a single upstream call.
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_span: 100,
            concurrency: 4,
            attempt_timeout: Duration::from_secs(20),
            retry: RetryConfig::default(),
        }
    }
}

/// The result of fetching a planned range.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The range that was asked for.
    pub requested: BlockRange,
    /// Contiguous blocks starting at `requested.from`.
    pub blocks: Vec<BlockData>,
    /// `true` if fewer blocks than requested could be returned.
    pub truncated: bool,
}

impl FetchOutcome {
    /// The heights actually covered by `blocks`.
    pub fn covered(&self) -> BlockRange {
        BlockRange::new(
            self.requested.from,
            self.requested.from + self.blocks.len() as u64,
        )
    }
}

enum Call<'a> {
    Head,
    Blocks(BlockRange),
    Logs(BlockRange, &'a LogFilter),
}

impl Call<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Head => "chain head".to_string(),
            Self::Blocks(r) => format!("blocks {r}"),
            Self::Logs(r, _) => format!("logs {r}"),
        }
    }
}

enum Reply {
    Head(u64),
    Blocks(Vec<BlockHeader>),
    Logs(Vec<LogRecord>),
}

/// Fetches headers and logs from one or more upstream sources.
pub struct Fetcher {
    sources: Vec<Arc<dyn LedgerSource>>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    config: FetcherConfig,
}

impl Fetcher {
    /// Create a fetcher over `sources` (primary first).
    pub fn new(
        sources: Vec<Arc<dyn LedgerSource>>,
        config: FetcherConfig,
    ) -> Result<Self, IngestError> {
        if sources.is_empty() {
            return Err(IngestError::Config("at least one ledger source is required".into()));
        }
        if config.request_span == 0 || config.concurrency == 0 {
            return Err(IngestError::Config(
                "request_span and concurrency must be positive".into(),
            ));
        }
        Ok(Self {
            sources,
            limiter: None,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    /// Route every upstream call through `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Fetch the current chain head.
    pub async fn chain_head(&self) -> Result<u64, IngestError> {
        match self.call(Call::Head).await? {
            Reply::Head(h) => Ok(h),
            _ => Err(IngestError::Other("unexpected reply to chain head".into())),
        }
    }

    /// Fetch headers and matching logs for every height in `range`.
    pub async fn fetch(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<FetchOutcome, IngestError> {
        let mut outcome = FetchOutcome {
            requested: range,
            blocks: Vec::with_capacity(range.len() as usize),
            truncated: false,
        };
        if range.is_empty() {
            return Ok(outcome);
        }

        let spans = range.split(self.config.request_span);
        let mut results = stream::iter(spans)
            .map(|span| self.fetch_span(span, filter))
            .buffered(self.config.concurrency);

        while let Some(result) = results.next().await {
            let (blocks, span_truncated) = result?;
            for block in blocks {
                if let Some(prev) = outcome.blocks.last() {
                    if !block.header.extends(&prev.header) {
                        tracing::debug!(
                            at = block.header.number,
                            "sub-range does not link to its predecessor — truncating"
                        );
                        outcome.truncated = true;
                        break;
                    }
                }
                outcome.blocks.push(block);
            }
            if span_truncated || outcome.truncated {
                outcome.truncated = true;
                break;
            }
        }

        if outcome.truncated {
            tracing::warn!(
                requested = %range,
                covered = %outcome.covered(),
                "partial response — truncated range"
            );
        }
        Ok(outcome)
    }

    async fn fetch_span(
        &self,
        span: BlockRange,
        filter: &LogFilter,
    ) -> Result<(Vec<BlockData>, bool), IngestError> {
        let (headers, logs) =
            futures::try_join!(self.call(Call::Blocks(span)), self.call(Call::Logs(span, filter)))?;
        let (Reply::Blocks(headers), Reply::Logs(logs)) = (headers, logs) else {
            return Err(IngestError::Other("unexpected reply to range fetch".into()));
        };
        Ok(assemble(span, headers, logs))
    }

    async fn call(&self, call: Call<'_>) -> Result<Reply, IngestError> {
        let mut backoff = self.retry.start();
        loop {
            let source = &self.sources[backoff.failures() as usize % self.sources.len()];
            if let Some(limiter) = self.limiter.as_ref().filter(|_| !source.paces_requests()) {
                limiter.acquire().await;
            }

            let attempt = async {
                match &call {
                    Call::Head => source.chain_head().await.map(Reply::Head),
                    Call::Blocks(r) => source.blocks(*r).await.map(Reply::Blocks),
                    Call::Logs(r, f) => source.logs(*r, f).await.map(Reply::Logs),
                }
            };
            let result = match tokio::time::timeout(self.config.attempt_timeout, attempt).await {
                Ok(r) => r,
                Err(_) => Err(IngestError::Timeout {
                    ms: self.config.attempt_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            attempt = backoff.failures(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            source = source.name(),
                            call = %call.describe(),
                            "retrying upstream call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            attempts = backoff.failures(),
                            error = %e,
                            call = %call.describe(),
                            "retry budget exhausted"
                        );
                        return Err(IngestError::Fetch {
                            what: call.describe(),
                            attempts: backoff.failures(),
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pair headers with logs and keep only the consistent prefix of `span`.
fn assemble(
    span: BlockRange,
    mut headers: Vec<BlockHeader>,
    logs: Vec<LogRecord>,
) -> (Vec<BlockData>, bool) {
    headers.sort_by_key(|h| h.number);

    let mut blocks: Vec<BlockData> = Vec::with_capacity(headers.len());
    for header in headers {
        let expected = span.from + blocks.len() as u64;
        if header.number != expected {
            break;
        }
        if let Some(prev) = blocks.last() {
            if !header.extends(&prev.header) {
                break;
            }
        }
        blocks.push(BlockData {
            header,
            logs: Vec::new(),
        });
    }

    let mut cut = blocks.len();
    for log in logs {
        if !span.contains(log.block.number) {
            continue;
        }
        let idx = (log.block.number - span.from) as usize;
        let Some(block) = blocks.get_mut(idx) else {
            continue;
        };
        if block.header.hash != log.block.hash {
            // logs from a different fork than the header we hold
            cut = cut.min(idx);
            continue;
        }
        block.logs.push(log);
    }
    blocks.truncate(cut);

    for block in &mut blocks {
        block.logs.sort_by_key(|l| l.log_index);
    }

    let truncated = (blocks.len() as u64) < span.len();
    (blocks, truncated)
}
