//! Shared error taxonomy for the Agora protocol.
//!
//! Every error that crosses the HTTP boundary carries a stable wire code,
//! a human-readable message, and a retry hint, so that agents can react
//! programmatically without parsing prose.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Agora system.
#[derive(Error, Debug)]
pub enum AgoraError {
    /// The envelope failed schema or JSON validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Signature verification failed against a known key. The message must
    /// be rejected outright, never processed.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// The recipient does not handle this intent.
    #[error("Intent not supported: {0}")]
    IntentNotSupported(String),

    /// The caller exceeded its request budget.
    #[error("Rate limited")]
    RateLimited,

    /// The addressed agent is unknown or its registration has expired.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// The conversation has been closed by a participant.
    #[error("Conversation closed: {0}")]
    ConversationClosed(String),

    /// Missing or mismatched credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The recipient's access-control policy rejected the sender.
    #[error("Rejected by recipient policy: {0}")]
    OwnerRejected(String),

    /// The requested record does not exist. Distinct from `Unauthorized`:
    /// a credential mismatch on an existing record is never reported as
    /// not-found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A storage backend error occurred.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(String),

    /// A serialization/deserialization error occurred on our side.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgoraError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            AgoraError::InvalidMessage(_) => "INVALID_MESSAGE",
            AgoraError::InvalidSignature => "INVALID_SIGNATURE",
            AgoraError::IntentNotSupported(_) => "INTENT_NOT_SUPPORTED",
            AgoraError::RateLimited => "RATE_LIMITED",
            AgoraError::AgentUnavailable(_) => "AGENT_UNAVAILABLE",
            AgoraError::ConversationClosed(_) => "CONVERSATION_CLOSED",
            AgoraError::Unauthorized(_) => "UNAUTHORIZED",
            AgoraError::OwnerRejected(_) => "OWNER_REJECTED",
            AgoraError::NotFound(_) => "NOT_FOUND",
            AgoraError::Storage(_) => "STORAGE_ERROR",
            AgoraError::Network(_) => "NETWORK_ERROR",
            AgoraError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AgoraError::RateLimited | AgoraError::Storage(_) | AgoraError::Network(_)
        )
    }
}

/// Alias for Result with AgoraError.
pub type AgoraResult<T> = Result<T, AgoraError>;

/// JSON body carried on every failed HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error payload.
    pub error: ErrorDetail,
}

/// Wire form of an error: code + message + retry hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable taxonomy code, e.g. `INVALID_SIGNATURE`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Whether the caller may retry unchanged.
    pub retryable: bool,
}

impl ErrorBody {
    /// Build the wire body for an error.
    pub fn from_error(err: &AgoraError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                retryable: err.retryable(),
            },
        }
    }

    /// Reconstruct a typed error from a wire body (client side).
    pub fn into_error(self) -> AgoraError {
        let msg = self.error.message;
        match self.error.code.as_str() {
            "INVALID_MESSAGE" => AgoraError::InvalidMessage(msg),
            "INVALID_SIGNATURE" => AgoraError::InvalidSignature,
            "INTENT_NOT_SUPPORTED" => AgoraError::IntentNotSupported(msg),
            "RATE_LIMITED" => AgoraError::RateLimited,
            "AGENT_UNAVAILABLE" => AgoraError::AgentUnavailable(msg),
            "CONVERSATION_CLOSED" => AgoraError::ConversationClosed(msg),
            "UNAUTHORIZED" => AgoraError::Unauthorized(msg),
            "OWNER_REJECTED" => AgoraError::OwnerRejected(msg),
            "NOT_FOUND" => AgoraError::NotFound(msg),
            "STORAGE_ERROR" => AgoraError::Storage(msg),
            "NETWORK_ERROR" => AgoraError::Network(msg),
            other => AgoraError::Serialization(format!("unknown error code {other}: {msg}")),
        }
    }
}
