use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use taskeval_core::UnlockError;
use taskeval_core::domain::UserId;

use crate::error::ApiError;

/// Header carrying the caller's id, set by the fronting identity proxy.
pub const USER_HEADER: &str = "x-user-id";

/// Authenticated caller.
///
/// A missing or malformed header is rejected with 401.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(AuthUser)
            .ok_or(ApiError::Unlock(UnlockError::Unauthorized))
    }
}
