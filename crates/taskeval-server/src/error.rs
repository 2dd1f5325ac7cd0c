use std::time::Duration;

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use taskeval_core::UnlockError;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::ConfigError;
use crate::state::StateError;

/// Error returned by every handler.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error("Too many requests")]
    RateLimited { retry_after: Duration },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            ApiError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            ApiError::Unlock(err) => match err {
                UnlockError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                UnlockError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                UnlockError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                UnlockError::InvalidSignature => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
                UnlockError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                UnlockError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                UnlockError::GatewayError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_FAILURE")
                }
                UnlockError::InvalidEvaluatorResponse(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "EVALUATION_FAILED")
                }
                UnlockError::PersistenceError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }

    /// Client-facing message. Server-side failures stay generic.
    fn message(&self) -> String {
        match self {
            ApiError::Unlock(UnlockError::GatewayError(_)) => {
                "An upstream service failed, please retry".to_string()
            }
            ApiError::Unlock(UnlockError::InvalidEvaluatorResponse(_)) => {
                "The evaluation could not be completed".to_string()
            }
            ApiError::Unlock(UnlockError::PersistenceError(_)) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(error = %self, code, "request failed");
        } else if matches!(self, ApiError::Unlock(UnlockError::InvalidSignature)) {
            warn!(code, "rejected forged acknowledgement");
        }

        let message = self.message();
        let mut response = (
            status,
            Json(ErrorBody {
                error: &message,
                code,
            }),
        )
            .into_response();

        if let ApiError::RateLimited { retry_after } = self {
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Startup failure.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("wiring: {0}")]
    State(#[from] StateError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
