//! The upstream ledger source: the read-only interface the fetcher drives.

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{BlockHeader, BlockRange, LogFilter, LogRecord};

/// Read-only access to a ledger node or archive.
///
/// Implementations report transient failures as [`IngestError::Rpc`] or
/// [`IngestError::Timeout`] so the fetcher can retry them; anything else
/// is surfaced to the caller unchanged.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Identifier used in logs (URL or provider name).
    fn name(&self) -> &str;

    /// `true` if the source takes a permit from the shared
    /// [`RateLimiter`](crate::policy::RateLimiter) before every request it
    /// puts on the wire. The fetcher then leaves pacing to the source.
    fn paces_requests(&self) -> bool {
        false
    }

    /// Current chain head height.
    async fn chain_head(&self) -> Result<u64, IngestError>;

    /// Headers for every height in `range`, ascending.
    ///
    /// A source may return fewer headers than requested when it has not
    /// caught up; the fetcher treats that as a truncated range.
    async fn blocks(&self, range: BlockRange) -> Result<Vec<BlockHeader>, IngestError>;

    /// Logs in `range` matching `filter`, in any order.
    async fn logs(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<Vec<LogRecord>, IngestError>;
}
