//! Persistence ports: tasks, evaluations, payment attempts, accounts.
//!
//! Every multi-record change that the unlock workflow depends on is a single
//! method on `UnlockStore`, so an implementation can run it as one atomic
//! unit (one lock scope in memory, one transaction in SQLite).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CaptureOutcome, EvaluationId, EvaluationRecord, EvaluationReport, GatewayPaymentId, OrderId, PaymentAttempt,
    PaymentCapture, PaymentStatus, StatusChange, TaskFilter, TaskId, TaskRecord, TaskStatus,
    UnlockError, UserAccount, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

impl From<StoreError> for UnlockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => UnlockError::NotFound(what),
            StoreError::Conflict(why) => UnlockError::Conflict(why),
            StoreError::Backend(msg) => UnlockError::PersistenceError(msg),
        }
    }
}

/// Result of moving a payment attempt to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptChange {
    Applied,
    /// Already in the requested status.
    AlreadyThere,
    /// Current status does not allow the move; nothing was written.
    Rejected(PaymentStatus),
}

/// Everything needed to finish an evaluation in one step.
#[derive(Debug, Clone)]
pub struct EvaluationCompletion {
    pub evaluation_id: EvaluationId,
    pub task_id: TaskId,
    pub owner: UserId,
    pub report: EvaluationReport,
    /// Unpaid results end in `locked` instead of `evaluated`.
    pub lock_unpaid: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed {
        record: EvaluationRecord,
        status: TaskStatus,
    },
    /// The task was no longer processing; nothing was written.
    Skipped(TaskStatus),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Owner's tasks, newest first.
    async fn list_tasks(
        &self,
        owner: UserId,
        filter: TaskFilter,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Set `to` only if the current status is one of `from`.
    ///
    /// Fails with `NotFound` for an unknown task.
    async fn transition_task(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError>;

    /// Move a claimable task (see `TaskRecord::is_claimable`) to
    /// `processing`, stamping `at`.
    ///
    /// Fails with `NotFound` for an unknown task.
    async fn claim_for_evaluation(
        &self,
        id: TaskId,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError>;
}

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn get_evaluation(&self, task_id: TaskId)
    -> Result<Option<EvaluationRecord>, StoreError>;
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Conditional insert.
    ///
    /// Fails with `Conflict` when the (owner, task) pair already has an
    /// unresolved attempt or the order id is taken.
    async fn insert_attempt(&self, attempt: PaymentAttempt) -> Result<(), StoreError>;

    async fn find_attempt(&self, order_id: &OrderId)
    -> Result<Option<PaymentAttempt>, StoreError>;

    /// Owner's attempts, newest first.
    async fn list_attempts(&self, owner: UserId) -> Result<Vec<PaymentAttempt>, StoreError>;

    /// Move an attempt along the payment state machine, except to `paid`
    /// (that goes through `UnlockStore::apply_capture`).
    ///
    /// A supplied gateway payment id is recorded with the move; `None` keeps
    /// the stored one.
    async fn advance_attempt(
        &self,
        order_id: &OrderId,
        to: PaymentStatus,
        payment_id: Option<&GatewayPaymentId>,
        at: DateTime<Utc>,
    ) -> Result<AttemptChange, StoreError>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Returns the existing account or creates one with `initial_credits`.
    async fn ensure_account(
        &self,
        user: UserId,
        initial_credits: u32,
    ) -> Result<UserAccount, StoreError>;

    async fn get_account(&self, user: UserId) -> Result<Option<UserAccount>, StoreError>;
}

/// The full persistence surface of the service.
#[async_trait]
pub trait UnlockStore: TaskStore + EvaluationStore + PaymentLedger + AccountDirectory {
    /// Record a confirmed payment, atomically:
    /// attempt -> paid, evaluation unlocked, task -> evaluated (from
    /// processing/locked only), owner -> premium.
    ///
    /// Fails with `NotFound` when no attempt has this order id.
    async fn apply_capture(
        &self,
        capture: &PaymentCapture,
        at: DateTime<Utc>,
    ) -> Result<CaptureOutcome, StoreError>;

    /// Insert the evaluation and settle the task, atomically.
    ///
    /// Spends an unlock credit when the owner is not premium; the record is
    /// unlocked if either applies.
    async fn complete_evaluation(
        &self,
        completion: EvaluationCompletion,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StoreError>;
}
