//! Task record and lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::{TaskId, UserId};

/// Language tag used when the submitter does not provide one.
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Task lifecycle status.
///
/// State transitions:
/// - Pending -> Processing (evaluation triggered)
/// - Processing -> Evaluated | Locked | Error (evaluator returned / failed)
/// - Locked -> Evaluated (payment confirmed)
/// - Error -> Processing (evaluation retried)
///
/// Nothing ever goes back to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Evaluated,
    Locked,
    Error,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Evaluated,
        TaskStatus::Locked,
        TaskStatus::Error,
    ];

    /// A settled task needs no further polling.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TaskStatus::Evaluated | TaskStatus::Locked | TaskStatus::Error
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Evaluated)
                | (Processing, Locked)
                | (Processing, Error)
                | (Locked, Evaluated)
                | (Error, Processing)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Evaluated => "evaluated",
            TaskStatus::Locked => "locked",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

/// Persisted code submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub code_text: String,
    pub language: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, owner: UserId, submission: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            title: submission.title,
            description: submission.description,
            code_text: submission.code_text,
            language: submission
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Whether an evaluation run may claim this task.
    ///
    /// A `processing` claim last touched at or before `stale_before` belongs
    /// to a run that can no longer finish and may be taken over.
    pub fn is_claimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending | TaskStatus::Error => true,
            TaskStatus::Processing => self.updated_at <= stale_before,
            TaskStatus::Evaluated | TaskStatus::Locked => false,
        }
    }
}

/// Submission payload for a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub code_text: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The row was in one of the expected states and now holds the new one.
    Applied,
    /// The row was in some other state and was left untouched.
    Unchanged(TaskStatus),
}

/// Listing filter for a user's tasks (newest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}
