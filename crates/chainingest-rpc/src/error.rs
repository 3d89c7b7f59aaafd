//! Transport-level error types.

use chainingest_core::IngestError;
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, DNS, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Rate limit exceeded: caller should back off.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The node answered, but the payload is not what the method promises.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc(e) => e.code == JsonRpcError::LIMIT_EXCEEDED,
            _ => false,
        }
    }
}

impl From<TransportError> for IngestError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { ms } => IngestError::Timeout { ms },
            e if e.is_retryable() => IngestError::Rpc(e.to_string()),
            e => IngestError::RpcRejected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransportError::Http("reset".into()).is_retryable());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(TransportError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!TransportError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn converts_into_ingest_errors() {
        let throttled = TransportError::Rpc(JsonRpcError {
            code: JsonRpcError::LIMIT_EXCEEDED,
            message: "slow down".into(),
            data: None,
        });
        assert!(IngestError::from(throttled).is_retryable());

        let rejected = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        });
        assert!(matches!(IngestError::from(rejected), IngestError::RpcRejected(_)));

        assert!(matches!(
            IngestError::from(TransportError::Timeout { ms: 5 }),
            IngestError::Timeout { ms: 5 }
        ));
    }
}
