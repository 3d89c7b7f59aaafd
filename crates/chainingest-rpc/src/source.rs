//! EVM ledger source over JSON-RPC.
//!
//! Uses `eth_blockNumber`, batched `eth_getBlockByNumber` and `eth_getLogs`.
//! Heights the node does not know yet (a `null` block) are simply left out;
//! the fetcher treats the gap as a truncated response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use chainingest_core::{
    BlockHeader, BlockRange, BlockRef, IngestError, LedgerSource, LogFilter, LogRecord, RateLimiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::http::redact_url;
use crate::request::{JsonRpcRequest, RpcId};
use crate::transport::RpcTransport;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Convert into the pipeline's log record, decoding the hex payload.
    pub fn into_record(self) -> Result<LogRecord, TransportError> {
        let data = self.data.strip_prefix("0x").unwrap_or(&self.data);
        let data = hex::decode(data)
            .map_err(|e| TransportError::InvalidResponse(format!("log data: {e}")))?;
        Ok(LogRecord {
            block: BlockRef {
                number: parse_hex_u64(&self.block_number)?,
                hash: self.block_hash,
            },
            tx_hash: self.tx_hash,
            address: self.address,
            topics: self.topics,
            data,
            log_index: u32::try_from(parse_hex_u64(&self.log_index)?)
                .map_err(|_| TransportError::InvalidResponse("log index overflow".into()))?,
        })
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| TransportError::InvalidResponse(format!("not a hex quantity: '{s}'")))
}

fn hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Convert an `eth_getBlockByNumber` result into a header.
pub fn header_from_json(v: &Value) -> Result<BlockHeader, TransportError> {
    let field = |name: &str| {
        v[name]
            .as_str()
            .ok_or_else(|| TransportError::InvalidResponse(format!("block field '{name}' missing")))
    };
    Ok(BlockHeader {
        number: parse_hex_u64(field("number")?)?,
        hash: field("hash")?.to_string(),
        parent_hash: field("parentHash")?.to_string(),
        timestamp: parse_hex_u64(field("timestamp")?)? as i64,
    })
}

/// [`LedgerSource`] backed by an [`RpcTransport`].
pub struct EvmRpcSource<T> {
    transport: Arc<T>,
    name: String,
    next_id: AtomicU64,
    /// Upper bound on requests per JSON-RPC batch.
    max_batch: usize,
    limiter: Option<Arc<RateLimiter>>,
}

impl<T: RpcTransport> EvmRpcSource<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            name: redact_url(transport.url()),
            transport,
            next_id: AtomicU64::new(1),
            max_batch: 100,
            limiter: None,
        }
    }

    /// Use a display name other than the redacted endpoint URL.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Take one permit from `limiter` per HTTP post (a JSON-RPC batch is
    /// one post). Share the pipeline's limiter so the budget covers every
    /// request this source sends.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn permit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }

    fn request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.permit().await;
        let resp = self.transport.send(self.request(method, params)).await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    async fn headers(&self, range: BlockRange) -> Result<Vec<BlockHeader>, TransportError> {
        let chunks = range
            .split(self.max_batch as u64)
            .into_iter()
            .map(|chunk| self.header_chunk(chunk));
        let headers = try_join_all(chunks).await?;
        Ok(headers.into_iter().flatten().collect())
    }

    async fn header_chunk(&self, chunk: BlockRange) -> Result<Vec<BlockHeader>, TransportError> {
        let reqs: Vec<JsonRpcRequest> = (chunk.from..chunk.to)
            .map(|n| self.request("eth_getBlockByNumber", vec![json!(hex_quantity(n)), json!(false)]))
            .collect();
        let ids: Vec<RpcId> = reqs.iter().map(|r| r.id.clone()).collect();

        self.permit().await;
        let mut by_id: HashMap<RpcId, _> = self
            .transport
            .send_batch(reqs)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut headers = Vec::with_capacity(ids.len());
        for id in ids {
            let resp = by_id
                .remove(&id)
                .ok_or_else(|| TransportError::InvalidResponse(format!("no response for id {id}")))?;
            let value = resp.into_result().map_err(TransportError::Rpc)?;
            if value.is_null() {
                continue;
            }
            headers.push(header_from_json(&value)?);
        }
        Ok(headers)
    }

    async fn raw_logs(&self, range: BlockRange, filter: &LogFilter) -> Result<Vec<LogRecord>, TransportError> {
        let Some(last) = range.last() else {
            return Ok(vec![]);
        };
        let mut params = json!({
            "fromBlock": hex_quantity(range.from),
            "toBlock": hex_quantity(last),
        });
        if !filter.addresses.is_empty() {
            params["address"] = json!(filter.addresses);
        }
        if !filter.topic0_values.is_empty() {
            params["topics"] = json!([filter.topic0_values]);
        }

        let value = self.call("eth_getLogs", vec![params]).await?;
        let raw: Vec<RawLog> = serde_json::from_value(value)?;
        let mut removed = 0usize;
        let mut logs = Vec::with_capacity(raw.len());
        for log in raw {
            if log.is_removed() {
                removed += 1;
                continue;
            }
            logs.push(log.into_record()?);
        }
        if removed > 0 {
            tracing::debug!(removed, range = %range, source = %self.name, "dropped removed logs");
        }
        Ok(logs)
    }
}

#[async_trait]
impl<T: RpcTransport> LedgerSource for EvmRpcSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn paces_requests(&self) -> bool {
        self.limiter.is_some()
    }

    async fn chain_head(&self) -> Result<u64, IngestError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        let head = value
            .as_str()
            .ok_or_else(|| TransportError::InvalidResponse("eth_blockNumber: expected a string".into()))?;
        Ok(parse_hex_u64(head)?)
    }

    async fn blocks(&self, range: BlockRange) -> Result<Vec<BlockHeader>, IngestError> {
        Ok(self.headers(range).await?)
    }

    async fn logs(&self, range: BlockRange, filter: &LogFilter) -> Result<Vec<LogRecord>, IngestError> {
        Ok(self.raw_logs(range, filter).await?)
    }
}
