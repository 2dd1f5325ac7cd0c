//! EvaluationPipeline - task submission, evaluation and owner-facing reads.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::settings::UnlockSettings;
use super::status_watch::{WatchOutcome, wait_for_settled};
use crate::domain::{
    EvaluationView, NewTask, PaymentAttempt, StatusChange, TaskFilter, TaskId, TaskRecord,
    TaskStatus, UnlockError, UserId,
};
use crate::ports::{
    Clock, CompletionOutcome, EvaluationCompletion, EvaluationRequest, Evaluator, EvaluatorError,
    IdGenerator, UnlockStore,
};

/// Largest page `list_tasks` returns.
pub const MAX_PAGE: usize = 100;

/// A task together with what its owner may see of the evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDetails {
    pub task: TaskRecord,
    pub evaluation: Option<EvaluationView>,
}

#[derive(Clone)]
pub struct EvaluationPipeline {
    store: Arc<dyn UnlockStore>,
    evaluator: Arc<dyn Evaluator>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: UnlockSettings,
}

impl EvaluationPipeline {
    pub fn new(
        store: Arc<dyn UnlockStore>,
        evaluator: Arc<dyn Evaluator>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: UnlockSettings,
    ) -> Self {
        Self {
            store,
            evaluator,
            clock,
            ids,
            settings,
        }
    }

    /// Store a new submission in `pending`.
    pub async fn submit_task(
        &self,
        user: UserId,
        submission: NewTask,
    ) -> Result<TaskRecord, UnlockError> {
        if submission.title.trim().is_empty() {
            return Err(UnlockError::InvalidInput("title is required".into()));
        }
        if submission.code_text.trim().is_empty() {
            return Err(UnlockError::InvalidInput("code is required".into()));
        }

        self.store
            .ensure_account(user, self.settings.initial_credits)
            .await?;
        let task = TaskRecord::new(
            self.ids.generate_task_id(),
            user,
            submission,
            self.clock.now(),
        );
        self.store.insert_task(task.clone()).await?;
        info!(task_id = %task.id, language = %task.language, "task submitted");
        Ok(task)
    }

    /// Run the evaluator for a pending (or previously failed) task.
    ///
    /// The task is claimed with a conditional update, so a second trigger
    /// while one is running gets `Conflict`. A `processing` claim older than
    /// the evaluator timeout was abandoned (crash, restart) and is taken over.
    ///
    /// The run itself is spawned: dropping the returned future does not
    /// abandon the evaluation.
    pub async fn trigger_evaluation(
        &self,
        user: UserId,
        task_id: TaskId,
    ) -> Result<EvaluationView, UnlockError> {
        let task = self.owned_task(user, task_id).await?;

        let now = self.clock.now();
        let stale_before = chrono::Duration::from_std(self.settings.evaluator_timeout())
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self
            .store
            .claim_for_evaluation(task.id, stale_before, now)
            .await?
        {
            StatusChange::Applied => {}
            StatusChange::Unchanged(status) => {
                return Err(UnlockError::conflict(format!(
                    "task is already {status}"
                )));
            }
        }
        if task.status == TaskStatus::Processing {
            warn!(task_id = %task.id, since = %task.updated_at, "took over abandoned evaluation");
        }
        info!(task_id = %task.id, "evaluation started");

        let run = self.clone();
        match tokio::spawn(async move { run.evaluate_claimed(task).await }).await {
            Ok(result) => result,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "evaluation run aborted");
                self.mark_error(task_id).await;
                Err(UnlockError::PersistenceError(format!(
                    "evaluation run aborted: {err}"
                )))
            }
        }
    }

    async fn evaluate_claimed(&self, task: TaskRecord) -> Result<EvaluationView, UnlockError> {
        let request = EvaluationRequest::from(&task);
        let report = match tokio::time::timeout(
            self.settings.evaluator_timeout(),
            self.evaluator.evaluate(&request),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                warn!(task_id = %task.id, error = %err, "evaluation failed");
                self.mark_error(task.id).await;
                return Err(match err {
                    EvaluatorError::Malformed(e) => e.into(),
                    other => UnlockError::GatewayError(other.to_string()),
                });
            }
            Err(_) => {
                warn!(task_id = %task.id, "evaluation timed out");
                self.mark_error(task.id).await;
                return Err(UnlockError::GatewayError(
                    EvaluatorError::Timeout.to_string(),
                ));
            }
        };

        let completion = EvaluationCompletion {
            evaluation_id: self.ids.generate_evaluation_id(),
            task_id: task.id,
            owner: task.owner,
            report,
            lock_unpaid: self.settings.lock_unpaid_results,
        };
        let outcome = match self
            .store
            .complete_evaluation(completion, self.clock.now())
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(task_id = %task.id, error = %err, "could not store evaluation");
                self.mark_error(task.id).await;
                return Err(err.into());
            }
        };

        match outcome {
            CompletionOutcome::Completed { record, status } => {
                info!(
                    task_id = %task.id,
                    score = record.report.score,
                    unlocked = record.unlocked,
                    %status,
                    "evaluation stored"
                );
                Ok(record.view())
            }
            CompletionOutcome::Skipped(status) => Err(UnlockError::conflict(format!(
                "task moved to {status} during evaluation"
            ))),
        }
    }

    pub async fn task_details(
        &self,
        user: UserId,
        task_id: TaskId,
    ) -> Result<TaskDetails, UnlockError> {
        let task = self.owned_task(user, task_id).await?;
        let evaluation = self
            .store
            .get_evaluation(task.id)
            .await?
            .map(|record| record.view());
        Ok(TaskDetails { task, evaluation })
    }

    /// Owner's tasks, newest first. The page size is clamped to `1..=MAX_PAGE`.
    pub async fn list_tasks(
        &self,
        user: UserId,
        filter: TaskFilter,
    ) -> Result<Vec<TaskRecord>, UnlockError> {
        let filter = TaskFilter {
            limit: filter.limit.clamp(1, MAX_PAGE),
            ..filter
        };
        Ok(self.store.list_tasks(user, filter).await?)
    }

    pub async fn list_payments(&self, user: UserId) -> Result<Vec<PaymentAttempt>, UnlockError> {
        Ok(self.store.list_attempts(user).await?)
    }

    /// Wait until the task settles, at most `wait` (or the configured limit).
    pub async fn watch_status(
        &self,
        user: UserId,
        task_id: TaskId,
        wait: Option<Duration>,
    ) -> Result<WatchOutcome, UnlockError> {
        self.owned_task(user, task_id).await?;

        let mut policy = self.settings.poll_policy();
        if let Some(wait) = wait {
            policy = policy.capped(wait);
        }
        let store = &self.store;
        wait_for_settled(policy, move || async move {
            store
                .get_task(task_id)
                .await?
                .map(|task| task.status)
                .ok_or_else(|| UnlockError::not_found(format!("task {task_id}")))
        })
        .await
    }

    async fn owned_task(&self, user: UserId, task_id: TaskId) -> Result<TaskRecord, UnlockError> {
        self.store
            .get_task(task_id)
            .await?
            .filter(|task| task.is_owned_by(user))
            .ok_or_else(|| UnlockError::not_found(format!("task {task_id}")))
    }

    async fn mark_error(&self, task_id: TaskId) {
        if let Err(err) = self
            .store
            .transition_task(
                task_id,
                &[TaskStatus::Processing],
                TaskStatus::Error,
                self.clock.now(),
            )
            .await
        {
            error!(task_id = %task_id, error = %err, "could not mark task as failed");
        }
    }
}
