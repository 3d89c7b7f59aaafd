//! Fluent builder API for creating pipelines.
//!
//! # Example
//!
//! ```rust,ignore
//! use chainingest_core::PipelineBuilder;
//!
//! let pipeline = PipelineBuilder::<u8>::new()
//!     .chain("ethereum")
//!     .stream_id("usdc-transfers")
//!     .start_height(6_082_465)
//!     .confirmation_depth(75)
//!     .requests_per_second(10)
//!     .source(rpc_source)
//!     .rule("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", transfer_rule)
//!     .build(store, handler)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::CheckpointStore;
use crate::config::{PipelineConfig, TruncatedPolicy};
use crate::decode::{DecodeRule, ErrorMode, RuleRegistry};
use crate::error::IngestError;
use crate::fetcher::{Fetcher, FetcherConfig};
use crate::handler::BatchHandler;
use crate::pipeline::Pipeline;
use crate::policy::{RateLimiter, RateLimiterConfig, RetryConfig};
use crate::source::LedgerSource;

/// Fluent builder for [`Pipeline`].
pub struct PipelineBuilder<E> {
    config: PipelineConfig,
    sources: Vec<Arc<dyn LedgerSource>>,
    rules: Vec<(String, Arc<dyn DecodeRule<E>>)>,
    limiter: Option<Arc<RateLimiter>>,
}

impl<E> Default for PipelineBuilder<E> {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            sources: Vec::new(),
            rules: Vec::new(),
            limiter: None,
        }
    }
}

impl<E> PipelineBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the stream ID (used for checkpoint keys).
    pub fn stream_id(mut self, id: impl Into<String>) -> Self {
        self.config.stream_id = id.into();
        self
    }

    /// First height to deliver when no checkpoint exists.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Stop after delivering `height` (bounded backfill).
    pub fn end_height(mut self, height: u64) -> Self {
        self.config.end_height = Some(height);
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Maximum heights per committed batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Blocks per upstream request.
    pub fn request_span(mut self, span: u64) -> Self {
        self.config.fetcher.request_span = span;
        self
    }

    /// Sub-range requests in flight at once.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.fetcher.concurrency = n;
        self
    }

    /// Shared request budget; `0` disables rate limiting.
    pub fn requests_per_second(mut self, rps: u32) -> Self {
        self.config.requests_per_second = rps;
        self
    }

    /// Share an existing limiter (e.g. with another pipeline on the same
    /// endpoint) instead of creating one from `requests_per_second`.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.fetcher.retry = retry;
        self
    }

    pub fn fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.config.fetcher = fetcher;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn decode_errors(mut self, mode: ErrorMode) -> Self {
        self.config.decode_errors = mode;
        self
    }

    pub fn truncated(mut self, policy: TruncatedPolicy) -> Self {
        self.config.truncated = policy;
        self
    }

    pub fn max_cycle_failures(mut self, n: u32) -> Self {
        self.config.max_cycle_failures = n;
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    /// Add an upstream source. The first one added is the primary; the
    /// rest are tried in order on retries.
    pub fn source(mut self, source: Arc<dyn LedgerSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Decode logs from `address` with `rule`.
    pub fn rule(mut self, address: impl Into<String>, rule: Arc<dyn DecodeRule<E>>) -> Self {
        self.rules.push((address.into(), rule));
        self
    }

    /// Validate the configuration and assemble the pipeline.
    pub fn build<S, H>(self, store: Arc<S>, handler: H) -> Result<Pipeline<E, S, H>, IngestError>
    where
        E: Send + Sync,
        S: CheckpointStore,
        H: BatchHandler<E>,
    {
        self.config.validate()?;
        if self.rules.is_empty() {
            return Err(IngestError::Config("at least one decode rule is required".into()));
        }

        let mut registry = RuleRegistry::new();
        for (address, rule) in self.rules {
            registry.register(&address, rule)?;
        }

        let mut fetcher = Fetcher::new(self.sources, self.config.fetcher.clone())?;
        let limiter = self.limiter.or_else(|| {
            (self.config.requests_per_second > 0).then(|| {
                Arc::new(RateLimiter::new(RateLimiterConfig::per_second(
                    self.config.requests_per_second,
                )))
            })
        });
        if let Some(limiter) = limiter {
            fetcher = fetcher.with_rate_limiter(limiter);
        }

        Ok(Pipeline::new(self.config, fetcher, registry, store, handler))
    }
}
