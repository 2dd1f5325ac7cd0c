//! Settings for the unlock workflow.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rate_limit::RateLimitPolicy;
use super::retry::RetryPolicy;
use super::status_watch::PollPolicy;

/// Most store-write attempts a capture may make.
pub const MAX_CAPTURE_RETRY_ATTEMPTS: u32 = 10;

/// Tunables handed to the core by whoever wires it up.
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockSettings {
    /// ISO currency sent to the gateway.
    pub currency: String,
    /// Unlock price in major units when the client does not send one.
    pub default_amount: f64,
    /// Unpaid results end in `locked` instead of `evaluated`.
    pub lock_unpaid_results: bool,
    /// Free unlocks granted to a new account.
    pub initial_credits: u32,
    pub evaluator_timeout_ms: u64,
    pub gateway_timeout_ms: u64,
    pub capture_retry_attempts: u32,
    pub capture_retry_base_ms: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_ms: u64,
    pub status_poll_interval_ms: u64,
    pub status_poll_max_attempts: u32,
    pub status_max_wait_ms: u64,
}

impl Default for UnlockSettings {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            default_amount: 10.0,
            lock_unpaid_results: false,
            initial_credits: 0,
            evaluator_timeout_ms: 30_000,
            gateway_timeout_ms: 10_000,
            capture_retry_attempts: 3,
            capture_retry_base_ms: 50,
            rate_limit_max_requests: 10,
            rate_limit_window_ms: 60_000,
            status_poll_interval_ms: 2_000,
            status_poll_max_attempts: 30,
            status_max_wait_ms: 60_000,
        }
    }
}

impl UnlockSettings {
    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluator_timeout_ms)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    pub fn capture_retry(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.capture_retry_base_ms),
            multiplier: 2.0,
            max_attempts: self.capture_retry_attempts.clamp(1, MAX_CAPTURE_RETRY_ATTEMPTS),
            ..RetryPolicy::capture_default()
        }
    }

    pub fn rate_limit(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_millis(self.rate_limit_window_ms),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.status_poll_interval_ms),
            max_attempts: self.status_poll_max_attempts,
            max_duration: Duration::from_millis(self.status_max_wait_ms),
        }
    }

    /// Problems that make the settings unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.currency.trim().is_empty() {
            return Err("currency must not be empty".into());
        }
        if !self.default_amount.is_finite() || self.default_amount <= 0.0 {
            return Err(format!(
                "default_amount must be positive, got {}",
                self.default_amount
            ));
        }
        if self.rate_limit_max_requests == 0 || self.rate_limit_window_ms == 0 {
            return Err("rate limit needs a positive budget and window".into());
        }
        if self.evaluator_timeout_ms == 0 || self.gateway_timeout_ms == 0 {
            return Err("collaborator timeouts must be positive".into());
        }
        if self.capture_retry_attempts > MAX_CAPTURE_RETRY_ATTEMPTS {
            return Err(format!(
                "capture_retry_attempts must be at most {MAX_CAPTURE_RETRY_ATTEMPTS}, got {}",
                self.capture_retry_attempts
            ));
        }
        Ok(())
    }
}
