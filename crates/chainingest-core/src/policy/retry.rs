//! Exponential backoff retry policy with optional jitter.
//!
//! [`RetryPolicy`] is stateless; [`Backoff`] is the per-operation state
//! machine (attempt count, next delay, deadline) driven by the fetcher.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
    /// Add up to `jitter_fraction * backoff` random jitter (0.0 = no jitter).
    pub jitter_fraction: f64,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
            max_elapsed: None,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        let capped = base_ms.min(cap_ms);

        let jitter_ms = if self.config.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped * self.config.jitter_fraction)
        } else {
            0.0
        };

        Some(Duration::from_millis((capped + jitter_ms) as u64))
    }

    /// Start a new backoff sequence for one operation.
    pub fn start(&self) -> Backoff {
        Backoff {
            deadline: self.config.max_elapsed.map(|d| Instant::now() + d),
            policy: self.clone(),
            failures: 0,
        }
    }
}

/// Bounded retry state for a single operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once the attempt budget or the deadline is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        let delay = self.policy.next_delay(self.failures)?;
        match self.deadline {
            Some(deadline) if Instant::now() + delay > deadline => None,
            _ => Some(delay),
        }
    }

    /// Number of failures recorded.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
            max_elapsed: None,
        })
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = no_jitter(3);
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
            max_elapsed: None,
        });
        let d5 = policy.next_delay(5).unwrap();
        assert_eq!(d5, Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter_fraction: 0.5,
            ..no_jitter(1).config
        });
        for _ in 0..50 {
            let d = policy.next_delay(1).unwrap();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn backoff_is_bounded_by_attempts() {
        let mut backoff = no_jitter(2).start();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_respects_deadline() {
        let policy = RetryPolicy::new(RetryConfig {
            max_elapsed: Some(Duration::from_millis(250)),
            ..no_jitter(10).config
        });
        let mut backoff = policy.start();
        let d1 = backoff.next_delay().unwrap(); // 100ms, within budget
        tokio::time::sleep(d1).await;
        // next delay is 200ms; 100 + 200 > 250
        assert!(backoff.next_delay().is_none());
    }
}
