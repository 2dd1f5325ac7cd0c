//! Evaluator port: the external code-scoring collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{EvaluationReport, ReportError, TaskRecord};

/// What the evaluator is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub title: String,
    pub description: String,
    pub code_text: String,
    pub language: String,
}

impl From<&TaskRecord> for EvaluationRequest {
    fn from(task: &TaskRecord) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            code_text: task.code_text.clone(),
            language: task.language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluatorError {
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("evaluator timed out")]
    Timeout,

    #[error("malformed evaluator response: {0}")]
    Malformed(#[from] ReportError),
}

/// Opaque scoring function. Implementations must validate what they return.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest)
    -> Result<EvaluationReport, EvaluatorError>;
}
