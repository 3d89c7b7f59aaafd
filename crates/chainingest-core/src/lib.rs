//! chainingest-core: incremental, checkpointed log ingestion for
//! finality-delayed ledgers.
//!
//! # Architecture
//!
//! ```text
//! PipelineBuilder → Pipeline
//!                      ├── RangePlanner   (cursor + head → next final range)
//!                      ├── Fetcher        (rate limit, retry, failover, truncation)
//!                      ├── FinalityGate   (Pending → Final, reorg checks)
//!                      ├── decode         (RuleRegistry of DecodeRule<E>)
//!                      └── BatchCommitter (handler + checkpoint in one store tx)
//! ```
//!
//! Upstream access goes through [`LedgerSource`]; persistence through
//! [`CheckpointStore`]. Both are traits so the RPC and storage crates plug in
//! from outside.

pub mod builder;
pub mod checkpoint;
pub mod committer;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetcher;
pub mod finality;
pub mod handler;
pub mod pipeline;
pub mod planner;
pub mod policy;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

pub use builder::PipelineBuilder;
pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, RecordSink, StoreTx};
pub use committer::{BatchCommitter, CommitResult, FinalBatch};
pub use config::{PipelineConfig, TruncatedPolicy};
pub use decode::{decode, DecodeOutcome, DecodeRule, ErrorMode, RuleRegistry};
pub use error::{DecodeError, IngestError};
pub use fetcher::{FetchOutcome, Fetcher, FetcherConfig};
pub use finality::{FinalityGate, GateOutput};
pub use handler::{BatchContext, BatchHandler};
pub use pipeline::{Pipeline, PipelineState, PipelineStats, StepOutcome};
pub use planner::RangePlanner;
pub use policy::{RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy};
pub use source::LedgerSource;
pub use types::{BlockData, BlockHeader, BlockRange, BlockRef, DecodedEvent, LogFilter, LogRecord};
