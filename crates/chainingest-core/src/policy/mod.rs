//! Reliability policies applied to every upstream call.
//!
//! ```text
//! Request → [RateLimiter] → [attempt timeout] → [Backoff] → LedgerSource
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{Backoff, RetryConfig, RetryPolicy};
