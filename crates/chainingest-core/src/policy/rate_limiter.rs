//! Token bucket rate limiter shared by every upstream call.
//!
//! Tokens accrue at `refill_rate` tokens/second up to `capacity`. Each
//! request consumes `cost` tokens. Waiters are served in arrival order:
//! the bucket lives behind a `tokio::sync::Mutex`, whose lock queue is FIFO,
//! and a waiter keeps the lock while it sleeps off its deficit.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket (burst size).
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
}

impl RateLimiterConfig {
    /// `rps` requests per second with a burst of the same size.
    pub fn per_second(rps: u32) -> Self {
        Self {
            capacity: rps.max(1) as f64,
            refill_rate: rps as f64,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(10)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Async, FIFO-fair token bucket.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    /// Cost of a standard request.
    pub default_cost: f64,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
            default_cost: 1.0,
        }
    }

    /// Wait until the default cost is available, then consume it.
    pub async fn acquire(&self) {
        self.acquire_cost(self.default_cost).await
    }

    /// Wait until `cost` tokens are available, then consume them.
    pub async fn acquire_cost(&self, cost: f64) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens < cost {
            let wait = self.deficit_wait(state.tokens, cost);
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited — waiting");
            tokio::time::sleep(wait).await;
            self.refill(&mut state);
        }
        state.tokens -= cost;
    }

    fn deficit_wait(&self, tokens: f64, cost: f64) -> Duration {
        let deficit = cost - tokens;
        if deficit <= 0.0 || self.config.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(deficit / self.config.refill_rate)
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let new_tokens = elapsed * self.config.refill_rate;
        state.tokens = (state.tokens + new_tokens).min(self.config.capacity);
        state.last_refill = now;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}
