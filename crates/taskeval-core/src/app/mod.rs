//! Application layer: the ports composed into the service's operations.
//!
//! - **AppBuilder**: wiring and fail-fast validation
//! - **UnlockCoordinator**: payment orders and acknowledgement reconciliation
//! - **EvaluationPipeline**: submission, evaluation, owner-facing reads
//! - **RateLimiter**: per-user fixed-window counter
//! - **status_watch**: bounded long-poll over a task's status

pub mod builder;
pub mod coordinator;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod settings;
pub mod status_watch;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testkit;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::coordinator::{
    Confirmation, CreatedOrder, UnlockCoordinator, WebhookAck, WebhookEffect,
};
pub use self::pipeline::{EvaluationPipeline, TaskDetails};
pub use self::rate_limit::{RateDecision, RateLimitPolicy, RateLimiter};
pub use self::retry::RetryPolicy;
pub use self::settings::UnlockSettings;
pub use self::status_watch::{PollPolicy, WatchOutcome};
pub use self::webhook::{GatewayEvent, WebhookParseError};
