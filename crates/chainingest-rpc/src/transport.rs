//! The `RpcTransport` trait: how requests reach a node.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// Sends JSON-RPC requests to a single endpoint.
///
/// Transports do not retry; the fetcher owns retry, rate limiting and
/// failover across endpoints.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Send a batch of requests.
    ///
    /// Default implementation sends them sequentially; override for true batching.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            responses.push(self.send(req).await?);
        }
        Ok(responses)
    }

    /// The transport's identifier (URL or name).
    fn url(&self) -> &str;
}
