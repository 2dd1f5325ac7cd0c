//! InMemoryStore - single-process store for development and tests.
//!
//! All records live in one state struct behind one `tokio::sync::Mutex`, so
//! each trait method is atomic with respect to every other.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    CaptureOutcome, EvaluationRecord, GatewayPaymentId, OrderId, PaymentAttempt, PaymentCapture, PaymentStatus,
    StatusChange, TaskFilter, TaskId, TaskRecord, TaskStatus, UserAccount, UserId,
};
use crate::ports::{
    AccountDirectory, AttemptChange, CompletionOutcome, EvaluationCompletion, EvaluationStore,
    PaymentLedger, StoreError, TaskStore, UnlockStore,
};

#[derive(Default)]
struct InMemoryState {
    tasks: HashMap<TaskId, TaskRecord>,
    /// Keyed by task: one evaluation per task.
    evaluations: HashMap<TaskId, EvaluationRecord>,
    attempts: HashMap<OrderId, PaymentAttempt>,
    accounts: HashMap<UserId, UserAccount>,
}

impl InMemoryState {
    fn has_unresolved(&self, owner: UserId, task_id: TaskId) -> bool {
        self.attempts
            .values()
            .any(|a| a.owner == owner && a.task_id == task_id && a.status.is_unresolved())
    }

    fn account_mut(&mut self, user: UserId) -> &mut UserAccount {
        self.accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user, 0))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
    #[cfg(test)]
    failing_captures: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` captures fail with a backend error.
    #[cfg(test)]
    pub(crate) fn fail_next_captures(&self, n: u32) {
        self.failing_captures.store(n, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_capture_failure(&self) -> Result<(), StoreError> {
        let remaining = self.failing_captures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_captures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("injected capture failure".into()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_capture_failure(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list_tasks(
        &self,
        owner: UserId,
        filter: TaskFilter,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<TaskRecord> = state
            .tasks
            .values()
            .filter(|t| t.owner == owner)
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn transition_task(
        &self,
        id: TaskId,
        from: &[TaskStatus],
        to: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        if !from.contains(&task.status) {
            return Ok(StatusChange::Unchanged(task.status));
        }
        task.status = to;
        task.updated_at = at;
        Ok(StatusChange::Applied)
    }

    async fn claim_for_evaluation(
        &self,
        id: TaskId,
        stale_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        if !task.is_claimable(stale_before) {
            return Ok(StatusChange::Unchanged(task.status));
        }
        task.status = TaskStatus::Processing;
        task.updated_at = at;
        Ok(StatusChange::Applied)
    }
}

#[async_trait]
impl EvaluationStore for InMemoryStore {
    async fn get_evaluation(
        &self,
        task_id: TaskId,
    ) -> Result<Option<EvaluationRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.evaluations.get(&task_id).cloned())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryStore {
    async fn insert_attempt(&self, attempt: PaymentAttempt) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.attempts.contains_key(&attempt.order_id) {
            return Err(StoreError::Conflict(format!(
                "order {} already recorded",
                attempt.order_id
            )));
        }
        if state.has_unresolved(attempt.owner, attempt.task_id) {
            return Err(StoreError::Conflict(format!(
                "unresolved payment already exists for task {}",
                attempt.task_id
            )));
        }
        state.attempts.insert(attempt.order_id.clone(), attempt);
        Ok(())
    }

    async fn find_attempt(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.attempts.get(order_id).cloned())
    }

    async fn list_attempts(&self, owner: UserId) -> Result<Vec<PaymentAttempt>, StoreError> {
        let state = self.state.lock().await;
        let mut attempts: Vec<PaymentAttempt> = state
            .attempts
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(attempts)
    }

    async fn advance_attempt(
        &self,
        order_id: &OrderId,
        to: PaymentStatus,
        payment_id: Option<&GatewayPaymentId>,
        at: DateTime<Utc>,
    ) -> Result<AttemptChange, StoreError> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;
        if attempt.status == to {
            return Ok(AttemptChange::AlreadyThere);
        }
        if to == PaymentStatus::Paid || !attempt.status.can_transition_to(to) {
            return Ok(AttemptChange::Rejected(attempt.status));
        }
        attempt.status = to;
        if let Some(payment_id) = payment_id {
            attempt.gateway_payment_id = Some(payment_id.clone());
        }
        attempt.updated_at = at;
        Ok(AttemptChange::Applied)
    }
}

#[async_trait]
impl AccountDirectory for InMemoryStore {
    async fn ensure_account(
        &self,
        user: UserId,
        initial_credits: u32,
    ) -> Result<UserAccount, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user, initial_credits))
            .clone())
    }

    async fn get_account(&self, user: UserId) -> Result<Option<UserAccount>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&user).cloned())
    }
}

#[async_trait]
impl UnlockStore for InMemoryStore {
    async fn apply_capture(
        &self,
        capture: &PaymentCapture,
        at: DateTime<Utc>,
    ) -> Result<CaptureOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get(&capture.order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", capture.order_id)))?;
        match attempt.status {
            PaymentStatus::Paid => return Ok(CaptureOutcome::AlreadyPaid),
            PaymentStatus::Created | PaymentStatus::Attempted => {}
            other => return Ok(CaptureOutcome::Rejected(other)),
        }
        self.injected_capture_failure()?;

        let (task_id, owner) = (attempt.task_id, attempt.owner);

        if let Some(attempt) = state.attempts.get_mut(&capture.order_id) {
            attempt.status = PaymentStatus::Paid;
            if capture.gateway_payment_id.is_some() {
                attempt.gateway_payment_id = capture.gateway_payment_id.clone();
            }
            if capture.signature.is_some() {
                attempt.signature = capture.signature.clone();
            }
            attempt.updated_at = at;
        }
        if let Some(evaluation) = state.evaluations.get_mut(&task_id)
            && !evaluation.unlocked
        {
            evaluation.unlocked = true;
            evaluation.updated_at = at;
        }
        if let Some(task) = state.tasks.get_mut(&task_id)
            && matches!(task.status, TaskStatus::Processing | TaskStatus::Locked)
        {
            task.status = TaskStatus::Evaluated;
            task.updated_at = at;
        }
        state.account_mut(owner).is_premium = true;

        Ok(CaptureOutcome::Applied)
    }

    async fn complete_evaluation(
        &self,
        completion: EvaluationCompletion,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let current = state
            .tasks
            .get(&completion.task_id)
            .map(|t| t.status)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", completion.task_id)))?;
        if current != TaskStatus::Processing {
            return Ok(CompletionOutcome::Skipped(current));
        }
        if state.evaluations.contains_key(&completion.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} already has an evaluation",
                completion.task_id
            )));
        }

        let unlocked = state.account_mut(completion.owner).consume_unlock();
        let status = if unlocked || !completion.lock_unpaid {
            TaskStatus::Evaluated
        } else {
            TaskStatus::Locked
        };

        let record = EvaluationRecord::new(
            completion.evaluation_id,
            completion.task_id,
            completion.report,
            unlocked,
            at,
        );
        state.evaluations.insert(completion.task_id, record.clone());
        if let Some(task) = state.tasks.get_mut(&completion.task_id) {
            task.status = status;
            task.updated_at = at;
        }

        Ok(CompletionOutcome::Completed { record, status })
    }
}
