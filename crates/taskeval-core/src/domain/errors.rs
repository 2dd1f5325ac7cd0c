//! Errors and their operational classification.

use super::evaluation::ReportError;

/// Operational classification of a failure.
///
/// - Transient: a collaborator hiccup, retrying may help
/// - Permanent: retrying is pointless
/// - Infrastructure: the store itself failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Domain error shared by the coordinator and the evaluation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnlockError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("gateway error: {0}")]
    GatewayError(String),

    #[error("invalid evaluator response: {0}")]
    InvalidEvaluatorResponse(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl UnlockError {
    pub fn not_found(what: impl Into<String>) -> Self {
        UnlockError::NotFound(what.into())
    }

    pub fn conflict(why: impl Into<String>) -> Self {
        UnlockError::Conflict(why.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        UnlockError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UnlockError::GatewayError(_) => ErrorKind::Transient,
            UnlockError::PersistenceError(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<ReportError> for UnlockError {
    fn from(err: ReportError) -> Self {
        UnlockError::InvalidEvaluatorResponse(err.to_string())
    }
}
