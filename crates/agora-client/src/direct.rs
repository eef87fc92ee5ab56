//! Synchronous direct delivery to a recipient's endpoint.
//!
//! Direct send is a convenience for conversations where the recipient is
//! online: it offers no queuing. A timeout is reported as "no response
//! yet": the message remains deliverable (e.g. re-sent via the relay)
//! and the conversation stays open; only transport-level failures are
//! errors.

use agora_types::{message, verify_value, AgentCard, AgoraError, AgoraResult, Message};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Outcome of a direct send.
#[derive(Debug)]
pub enum SendOutcome {
    /// The recipient answered with a signed reply, already verified
    /// against its published key.
    Reply(Message),
    /// The recipient answered but with nothing to say.
    Accepted,
    /// No response within the caller's timeout. Not a failure.
    NoResponseYet,
}

/// POST a signed message to the recipient's endpoint and wait up to
/// `timeout` for a signed response.
pub async fn send_direct(
    recipient: &AgentCard,
    message: &Message,
    timeout: Duration,
) -> AgoraResult<SendOutcome> {
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgoraError::Network(e.to_string()))?;

    let outcome = tokio::time::timeout(
        timeout,
        http.post(&recipient.endpoint).json(message).send(),
    )
    .await;

    let response = match outcome {
        Err(_) => return Ok(SendOutcome::NoResponseYet),
        Ok(Err(e)) if e.is_timeout() => return Ok(SendOutcome::NoResponseYet),
        Ok(Err(e)) => return Err(AgoraError::Network(e.to_string())),
        Ok(Ok(response)) => response,
    };

    if !response.status().is_success() {
        let status = response.status();
        return match response.json::<agora_types::ErrorBody>().await {
            Ok(body) => Err(body.into_error()),
            Err(_) => Err(AgoraError::Network(format!(
                "unexpected response status {status}"
            ))),
        };
    }

    let raw: Value = match response.json().await {
        Ok(raw) => raw,
        Err(e) => return Err(AgoraError::Serialization(e.to_string())),
    };
    if raw.is_null() {
        return Ok(SendOutcome::Accepted);
    }

    let reply: Message = serde_json::from_value(raw.clone())
        .map_err(|e| AgoraError::InvalidMessage(format!("reply is not a message: {e}")))?;
    let Some(signature) = message::signature_of(&raw) else {
        return Err(AgoraError::InvalidMessage("reply carries no signature".into()));
    };
    if !verify_value(&raw, signature, &recipient.public_key) {
        return Err(AgoraError::InvalidSignature);
    }
    debug!(conversation = %reply.conversation_id, "Received direct reply");
    Ok(SendOutcome::Reply(reply))
}
