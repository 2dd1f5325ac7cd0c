//! Bounded long-poll over a task's status.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{TaskStatus, UnlockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_duration: Duration,
}

impl PollPolicy {
    /// Same policy with the wait capped at `wait`.
    pub fn capped(self, wait: Duration) -> Self {
        Self {
            max_duration: self.max_duration.min(wait),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOutcome {
    /// Last observed status.
    pub status: TaskStatus,
    pub settled: bool,
    pub polls: u32,
}

/// Poll `check` until it reports a settled status or the policy runs out.
///
/// The first check happens immediately. Check errors end the watch.
pub async fn wait_for_settled<F, Fut>(policy: PollPolicy, mut check: F) -> Result<WatchOutcome, UnlockError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskStatus, UnlockError>>,
{
    let deadline = Instant::now() + policy.max_duration;
    let max_attempts = policy.max_attempts.max(1);
    let mut polls = 0;

    loop {
        let status = check().await?;
        polls += 1;
        if status.is_settled() {
            return Ok(WatchOutcome {
                status,
                settled: true,
                polls,
            });
        }

        let now = Instant::now();
        if polls >= max_attempts || now >= deadline {
            return Ok(WatchOutcome {
                status,
                settled: false,
                polls,
            });
        }
        let remaining = deadline - now;
        tokio::time::sleep(policy.interval.min(remaining)).await;
    }
}
