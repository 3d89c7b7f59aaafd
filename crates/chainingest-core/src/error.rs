//! Error types for the chainingest pipeline.

use thiserror::Error;

use crate::types::BlockRange;

/// Errors that can occur while ingesting.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or inconsistent configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient upstream failure (connection reset, 5xx, rate limited).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Upstream rejected the request; retrying will not help.
    #[error("RPC request rejected: {0}")]
    RpcRejected(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Retry budget exhausted for an upstream call.
    #[error("Fetch of {what} failed after {attempts} attempts: {reason}")]
    Fetch {
        what: String,
        attempts: u32,
        reason: String,
    },

    /// A log matched a rule but its payload could not be decoded.
    #[error("Decode error in '{rule}' at block {block_number} log {log_index}: {reason}")]
    Decode {
        rule: String,
        block_number: u64,
        log_index: u32,
        reason: String,
    },

    /// Upstream reports a block that conflicts with one already judged final.
    #[error(
        "Reorg beyond finality at block {block_number}: finalized hash {finalized}, upstream reports {reported}"
    )]
    ReorgBeyondFinality {
        block_number: u64,
        finalized: String,
        reported: String,
    },

    /// The batch was not committed; the cursor is unchanged.
    #[error("Commit of {range} failed: {reason}")]
    Commit { range: BlockRange, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Pipeline aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Returns `true` if a single upstream call failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the pipeline must halt instead of retrying the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ReorgBeyondFinality { .. }
                | Self::Decode { .. }
                | Self::Aborted { .. }
        )
    }
}

/// Errors produced by a single decode rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing topic {index}")]
    MissingTopic { index: usize },

    #[error("unexpected topic count: expected {expected}, got {got}")]
    TopicCount { expected: usize, got: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
