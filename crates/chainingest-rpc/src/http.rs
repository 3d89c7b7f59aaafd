//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! One request per call, or one HTTP POST carrying a JSON array for
//! [`RpcTransport::send_batch`]. No retry here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

/// Configuration for `HttpTransport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("chainingest/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// HTTP JSON-RPC transport.
pub struct HttpTransport {
    url: String,
    /// `url` without path or query, safe to log.
    endpoint: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpTransportConfig) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TransportError::Other(format!("not an HTTP(S) endpoint: {url}")));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: redact_url(&url),
            url,
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpTransportConfig::default())
    }

    /// Scheme and host of the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(&self.endpoint, status, body));
        }
        Ok(resp)
    }

    /// Read the whole body, then decode it. A connection dropped mid-body is
    /// a transport failure; only a complete but malformed body is invalid.
    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, TransportError> {
        let bytes = resp.bytes().await.map_err(|e| self.map_reqwest(e))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

/// Map a non-success HTTP status to a transport error.
fn classify_status(endpoint: &str, status: u16, body: String) -> TransportError {
    if status == 429 {
        return TransportError::RateLimited {
            provider: endpoint.to_string(),
        };
    }
    let body = if body.chars().count() > 256 {
        body.chars().take(256).chain(std::iter::once('…')).collect()
    } else {
        body
    };
    TransportError::Status { status, body }
}

/// Scheme and host only; provider URLs often carry an API key in the path.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let host = rest.split(['/', '?']).next().unwrap_or(rest);
    if scheme.is_empty() {
        host.to_string()
    } else {
        format!("{scheme}://{host}")
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::trace!(method = %req.method, id = %req.id, endpoint = %self.endpoint, "rpc request");
        let resp = self.post(&req).await?;
        self.read_json(resp).await
    }

    /// True HTTP batch: send all requests as a JSON array in one HTTP call.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }
        tracing::trace!(size = reqs.len(), endpoint = %self.endpoint, "rpc batch request");
        let resp = self.post(&reqs).await?;
        self.read_json(resp).await
    }

    fn url(&self) -> &str {
        &self.url
    }
}
