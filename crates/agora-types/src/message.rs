//! Signed message envelopes.
//!
//! A message carries an opaque, intent-tagged payload between two agents.
//! The envelope is signed over its canonical form (every field except
//! `signature`), so a recipient can verify authorship with nothing but the
//! sender's published key.

use crate::canonical::SIGNATURE_FIELD;
use crate::error::{AgoraError, AgoraResult};
use crate::signing::{verify_value, KeyPair};
use crate::{id, PROTOCOL_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signed message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Wire protocol version.
    pub protocol: String,
    /// Unique per message, `msg_`-prefixed.
    pub message_id: String,
    /// Groups a multi-turn exchange, `conv_`-prefixed.
    pub conversation_id: String,
    /// Sending agent id.
    pub from: String,
    /// Receiving agent id.
    pub to: String,
    /// ISO-8601 timestamp of creation.
    pub timestamp: String,
    /// Dot-namespaced purpose tag, e.g. `meeting.schedule`.
    pub intent: String,
    /// Intent-specific payload; opaque to the delivery core.
    pub payload: Value,
    /// Base64url Ed25519 signature over the canonical form of every other
    /// field. Never part of its own signing input.
    #[serde(default)]
    pub signature: String,
}

impl Message {
    /// Build an unsigned message from `from` to `to`.
    ///
    /// Generates a fresh message id and timestamp; a conversation id of
    /// `None` starts a new conversation.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        intent: impl Into<String>,
        payload: Value,
        conversation: Option<String>,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            message_id: id::message_id(),
            conversation_id: conversation.unwrap_or_else(id::conversation_id),
            from: from.into(),
            to: to.into(),
            timestamp: Utc::now().to_rfc3339(),
            intent: intent.into(),
            payload,
            signature: String::new(),
        }
    }

    /// The envelope as a JSON value, `signature` field included as-is.
    pub fn to_value(&self) -> AgoraResult<Value> {
        serde_json::to_value(self).map_err(|e| AgoraError::Serialization(e.to_string()))
    }

    /// Sign the envelope in place with the sender's key.
    pub fn sign(&mut self, keypair: &KeyPair) -> AgoraResult<()> {
        let value = self.to_value()?;
        self.signature = keypair.sign_value(&value)?;
        Ok(())
    }

    /// Verify this envelope against a sender's published key.
    ///
    /// Prefer [`verify_value`] on the raw received JSON when it is
    /// available: verifying the re-serialized struct would silently drop
    /// any unknown fields the sender signed over.
    pub fn verify(&self, public_key: &str) -> bool {
        match self.to_value() {
            Ok(value) => verify_value(&value, &self.signature, public_key),
            Err(_) => false,
        }
    }
}

/// Extract the signature string from a raw message body.
pub fn signature_of(raw: &Value) -> Option<&str> {
    raw.get(SIGNATURE_FIELD).and_then(Value::as_str)
}
