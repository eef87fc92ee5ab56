//! Bearer-token extraction and sender authentication.

use crate::error::ApiError;
use crate::AppState;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Pull the bearer credential off a request, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Require a bearer credential, 401 when absent.
pub fn require_bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    bearer_token(headers).ok_or_else(ApiError::missing_credential)
}

/// Resolve a bearer credential to the registered agent that owns it.
///
/// Used by the relay endpoints, where the caller authenticates by token
/// alone without re-presenting its card.
pub fn authenticate_agent(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let credential = require_bearer(headers)?;
    state
        .identity
        .resolve_token(&credential)?
        .ok_or_else(|| {
            agora_types::AgoraError::Unauthorized("token does not match any registration".into())
                .into()
        })
}
