//! Fixed-window request counter per user.
//!
//! Process-local and best-effort: counts are lost on restart and are not
//! shared between replicas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::UserId;
use crate::ports::Clock;

/// Windows kept before expired ones are swept.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<UserId, Window>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Count one request for `user`.
    pub fn check(&self, user: UserId) -> RateDecision {
        let now = self.clock.now();
        let window_len = chrono::Duration::milliseconds(self.policy.window.as_millis() as i64);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, w| now - w.started_at < window_len);
        }

        let window = windows.entry(user).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now - window.started_at >= window_len {
            *window = Window {
                started_at: now,
                count: 0,
            };
        }

        window.count = window.count.saturating_add(1);
        if window.count <= self.policy.max_requests {
            RateDecision::Allowed {
                remaining: self.policy.max_requests - window.count,
            }
        } else {
            let reset_at = window.started_at + window_len;
            let retry_after = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
            RateDecision::Limited { retry_after }
        }
    }
}
