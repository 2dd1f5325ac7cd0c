//! Retry policy: decides backoff delays.

use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for store writes on the payment confirmation path.
    pub fn capture_default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_attempts: 3,
            max_delay: Duration::from_secs(2),
        }
    }

    /// Delay after the given number of failed attempts (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`.
    ///
    /// With base_delay=50ms, multiplier=2.0: 50ms, 100ms, 200ms, ...
    /// capped at `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the last error.
    pub async fn run<T, E, F, Fut>(&self, mut op: F, retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op(attempts).await {
                Ok(value) => return Ok(value),
                Err(err) if retryable(&err) && self.should_retry(attempts) => {
                    tokio::time::sleep(self.next_delay(attempts)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
