//! HTTP mapping of the protocol error taxonomy.
//!
//! Every failure response carries the same JSON body shape: a stable code,
//! a human message, and a retry hint. Status codes are a lossy projection
//! of the taxonomy (several codes share 403), which is why clients key off
//! the body, not the status.

use agora_types::{AgoraError, ErrorBody};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// An error leaving the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    inner: AgoraError,
}

impl ApiError {
    /// 401 for a request with no usable credential at all. A *mismatched*
    /// credential on an existing record maps to 403 via `From<AgoraError>`,
    /// keeping the two cases distinguishable.
    pub fn missing_credential() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            inner: AgoraError::Unauthorized("missing bearer token".to_string()),
        }
    }
}

impl From<AgoraError> for ApiError {
    fn from(err: AgoraError) -> Self {
        let status = match &err {
            AgoraError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            AgoraError::InvalidSignature => StatusCode::BAD_REQUEST,
            AgoraError::IntentNotSupported(_) => StatusCode::BAD_REQUEST,
            AgoraError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AgoraError::AgentUnavailable(_) => StatusCode::NOT_FOUND,
            AgoraError::ConversationClosed(_) => StatusCode::CONFLICT,
            AgoraError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AgoraError::OwnerRejected(_) => StatusCode::FORBIDDEN,
            AgoraError::NotFound(_) => StatusCode::NOT_FOUND,
            AgoraError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgoraError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AgoraError::Network(_) => StatusCode::BAD_GATEWAY,
        };
        Self { status, inner: err }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.inner.code(), error = %self.inner, "Request failed");
        } else {
            tracing::debug!(code = self.inner.code(), error = %self.inner, "Request rejected");
        }
        (self.status, Json(ErrorBody::from_error(&self.inner))).into_response()
    }
}
