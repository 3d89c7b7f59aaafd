//! chainingest-rpc: JSON-RPC transport and EVM ledger source.
//!
//! # Overview
//!
//! - [`RpcTransport`]: async trait for sending JSON-RPC requests to one endpoint
//! - [`HttpTransport`]: `reqwest`-backed implementation with true batching
//! - [`EvmRpcSource`]: [`chainingest_core::LedgerSource`] over any transport,
//!   using `eth_blockNumber`, `eth_getBlockByNumber` and `eth_getLogs`
//! - [`TransportError`]: transport failures, convertible into
//!   [`chainingest_core::IngestError`] with retryability preserved

pub mod error;
pub mod http;
pub mod request;
pub mod source;
pub mod transport;

pub use error::TransportError;
pub use http::{redact_url, HttpTransport, HttpTransportConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use source::{parse_hex_u64, EvmRpcSource, RawLog};
pub use transport::RpcTransport;
