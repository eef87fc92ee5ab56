//! Receiving pipeline: validate, verify, admit, dispatch, reply.
//!
//! Every inbound message goes through the same gauntlet before an intent
//! handler sees it, whether it arrived by direct POST or through the
//! relay. The two signature failure states are deliberately distinct:
//! *invalid* (verification failed against a known key) is always rejected
//! outright, while *unverified* (sender key unknown) is a policy choice.

use crate::identity::LocalIdentity;
use agora_types::validate::validate_message;
use agora_types::{resolve_admission, Admission, AgentCard, AgoraError, AgoraResult, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Intent reserved for deferred first-contact replies under approval-mode
/// access control.
pub const PENDING_APPROVAL_INTENT: &str = "system.pending_approval";

/// What to do with a message whose sender's key is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnverifiedPolicy {
    /// Reject the message.
    Reject,
    /// Process it, logging a warning.
    AcceptWithWarning,
}

/// Verification state of one received message.
///
/// `Unverified` (key unknown) and `Invalid` (verification failed) are
/// distinct states and must never be conflated: the first is a policy
/// question, the second is always a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Signature checked out against the sender's published key.
    Verified,
    /// The sender's key is unknown; verification could not be attempted.
    Unverified,
    /// Verification failed against a known key.
    Invalid,
}

/// Classify a raw message body against an optionally-known sender card.
pub fn classify_signature(
    raw: &Value,
    signature: &str,
    sender_card: Option<&AgentCard>,
) -> SignatureStatus {
    match sender_card {
        None => SignatureStatus::Unverified,
        Some(card) => {
            if agora_types::verify_value(raw, signature, &card.public_key) {
                SignatureStatus::Verified
            } else {
                SignatureStatus::Invalid
            }
        }
    }
}

/// A handler's answer to a processed message.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Intent of the reply message.
    pub intent: String,
    /// Reply payload.
    pub payload: Value,
}

/// Application-level intent dispatch.
///
/// Handlers see only messages that passed validation, verification, and
/// admission; they own the payload semantics the delivery core treats as
/// opaque.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Handle one message, optionally producing a reply.
    async fn handle(&self, message: &Message) -> AgoraResult<Option<Reply>>;
}

/// Outcome of processing one inbound message.
#[derive(Debug)]
pub enum InboundOutcome {
    /// A signed reply to return to the sender.
    Reply(Message),
    /// Processed; nothing to say back.
    NoReply,
    /// Not processed. The error says why; the transport layer maps it.
    Rejected(AgoraError),
}

/// The receiving side of message delivery.
pub struct InboundProcessor<H> {
    identity: Arc<LocalIdentity>,
    handler: H,
    unverified_policy: UnverifiedPolicy,
}

impl<H: IntentHandler> InboundProcessor<H> {
    /// Build a processor for this identity and handler.
    pub fn new(identity: Arc<LocalIdentity>, handler: H, unverified_policy: UnverifiedPolicy) -> Self {
        Self {
            identity,
            handler,
            unverified_policy,
        }
    }

    /// Process one raw inbound message body.
    ///
    /// `sender_card` is the sender's published card if the directory knows
    /// it; `None` means the sender's key is unknown and the unverified
    /// policy applies. Verification runs over the raw body, not the parsed
    /// struct, so fields this implementation does not model still count.
    pub async fn process(&self, raw: &Value, sender_card: Option<&AgentCard>) -> InboundOutcome {
        let message: Message = match serde_json::from_value(raw.clone()) {
            Ok(message) => message,
            Err(e) => return InboundOutcome::Rejected(AgoraError::InvalidMessage(e.to_string())),
        };
        if let Err(e) = validate_message(&message) {
            return InboundOutcome::Rejected(e.into());
        }
        if message.to != self.identity.card.agent_id {
            return InboundOutcome::Rejected(AgoraError::AgentUnavailable(message.to.clone()));
        }

        match classify_signature(raw, &message.signature, sender_card) {
            SignatureStatus::Invalid => {
                return InboundOutcome::Rejected(AgoraError::InvalidSignature);
            }
            SignatureStatus::Unverified => match self.unverified_policy {
                UnverifiedPolicy::Reject => {
                    return InboundOutcome::Rejected(AgoraError::Unauthorized(
                        "cannot verify sender: key unknown".to_string(),
                    ));
                }
                UnverifiedPolicy::AcceptWithWarning => {
                    warn!(
                        from = %message.from,
                        message = %message.message_id,
                        "Accepting message from sender with unknown key"
                    );
                }
            },
            SignatureStatus::Verified => {}
        }

        match resolve_admission(&self.identity.card, &message.from) {
            Admission::Rejected => {
                return InboundOutcome::Rejected(AgoraError::OwnerRejected(format!(
                    "sender {} is not admitted",
                    message.from
                )));
            }
            Admission::GrantedPendingApproval => {
                return self.reply_to(
                    &message,
                    Reply {
                        intent: PENDING_APPROVAL_INTENT.to_string(),
                        payload: serde_json::json!({
                            "status": "pending_approval",
                            "message_id": message.message_id,
                        }),
                    },
                );
            }
            Admission::Granted => {}
        }

        if !self.identity.card.handles_intent(&message.intent) {
            return InboundOutcome::Rejected(AgoraError::IntentNotSupported(
                message.intent.clone(),
            ));
        }

        match self.handler.handle(&message).await {
            Ok(Some(reply)) => self.reply_to(&message, reply),
            Ok(None) => InboundOutcome::NoReply,
            Err(e) => InboundOutcome::Rejected(e),
        }
    }

    fn reply_to(&self, message: &Message, reply: Reply) -> InboundOutcome {
        match self.identity.compose(
            message.from.clone(),
            reply.intent,
            reply.payload,
            Some(message.conversation_id.clone()),
        ) {
            Ok(signed) => InboundOutcome::Reply(signed),
            Err(e) => InboundOutcome::Rejected(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::{AccessControl, AccessMode};
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl IntentHandler for EchoHandler {
        async fn handle(&self, message: &Message) -> AgoraResult<Option<Reply>> {
            Ok(Some(Reply {
                intent: "task.result".to_string(),
                payload: json!({"echo": message.payload}),
            }))
        }
    }

    struct ClosedHandler;

    #[async_trait]
    impl IntentHandler for ClosedHandler {
        async fn handle(&self, message: &Message) -> AgoraResult<Option<Reply>> {
            Err(AgoraError::ConversationClosed(
                message.conversation_id.clone(),
            ))
        }
    }

    fn receiver_and_sender() -> (Arc<LocalIdentity>, LocalIdentity) {
        let receiver = LocalIdentity::new(
            "receiver",
            "https://example.com/recv",
            vec!["tasks".into()],
            vec!["task.request".into()],
        );
        let sender = LocalIdentity::new(
            "sender",
            "https://example.com/send",
            vec!["tasks".into()],
            vec!["task.result".into()],
        );
        (Arc::new(receiver), sender)
    }

    fn raw_message(sender: &LocalIdentity, to: &str, intent: &str) -> Value {
        let message = sender.compose(to, intent, json!({"n": 7}), None).unwrap();
        message.to_value().unwrap()
    }

    #[test]
    fn test_classify_signature_states_are_distinct() {
        let keypair = agora_types::KeyPair::generate();
        let card =
            agora_types::AgentCard::new("s", "https://example.com", keypair.public_key());

        let value = json!({"k": "v"});
        let signature = keypair.sign_value(&value).unwrap();

        assert_eq!(
            classify_signature(&value, &signature, Some(&card)),
            SignatureStatus::Verified
        );
        assert_eq!(
            classify_signature(&value, &signature, None),
            SignatureStatus::Unverified
        );

        let tampered = json!({"k": "other"});
        assert_eq!(
            classify_signature(&tampered, &signature, Some(&card)),
            SignatureStatus::Invalid
        );
    }

    #[tokio::test]
    async fn test_valid_message_is_dispatched_and_replied() {
        let (receiver, sender) = receiver_and_sender();
        let processor =
            InboundProcessor::new(receiver.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, receiver.agent_id(), "task.request");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Reply(reply) => {
                assert_eq!(reply.intent, "task.result");
                assert_eq!(reply.to, sender.agent_id());
                assert_eq!(reply.payload["echo"]["n"], 7);
                // The reply itself verifies against the receiver's key.
                assert!(reply.verify(&receiver.card.public_key));
            }
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tampered_message_is_invalid_not_unverified() {
        let (receiver, sender) = receiver_and_sender();
        let processor =
            InboundProcessor::new(receiver.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let mut raw = raw_message(&sender, receiver.agent_id(), "task.request");
        raw["payload"]["n"] = json!(8);

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Rejected(AgoraError::InvalidSignature) => {}
            other => panic!("Expected InvalidSignature, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_sender_key_policies() {
        let (receiver, sender) = receiver_and_sender();
        let raw = raw_message(&sender, receiver.agent_id(), "task.request");

        let strict = InboundProcessor::new(receiver.clone(), EchoHandler, UnverifiedPolicy::Reject);
        match strict.process(&raw, None).await {
            InboundOutcome::Rejected(AgoraError::Unauthorized(_)) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }

        let lenient = InboundProcessor::new(
            receiver.clone(),
            EchoHandler,
            UnverifiedPolicy::AcceptWithWarning,
        );
        match lenient.process(&raw, None).await {
            InboundOutcome::Reply(_) => {}
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_intent_is_rejected() {
        let (receiver, sender) = receiver_and_sender();
        let processor =
            InboundProcessor::new(receiver.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, receiver.agent_id(), "payments.invoice");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Rejected(AgoraError::IntentNotSupported(intent)) => {
                assert_eq!(intent, "payments.invoice");
            }
            other => panic!("Expected IntentNotSupported, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allowlist_rejects_stranger() {
        let (_, sender) = receiver_and_sender();
        let mut gated = LocalIdentity::new(
            "gated",
            "https://example.com",
            vec!["tasks".into()],
            vec!["task.request".into()],
        );
        gated.card.access_control = Some(AccessControl {
            mode: AccessMode::Allowlist,
            allow: vec!["agt_someone_else".into()],
            block: vec![],
        });
        let gated = Arc::new(gated);

        let processor = InboundProcessor::new(gated.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, gated.agent_id(), "task.request");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Rejected(AgoraError::OwnerRejected(_)) => {}
            other => panic!("Expected OwnerRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_approval_mode_defers_first_contact() {
        let (_, sender) = receiver_and_sender();
        let mut approval = LocalIdentity::new(
            "careful",
            "https://example.com",
            vec!["tasks".into()],
            vec!["task.request".into()],
        );
        approval.card.access_control = Some(AccessControl {
            mode: AccessMode::Approval,
            allow: vec![],
            block: vec![],
        });
        let approval = Arc::new(approval);

        let processor =
            InboundProcessor::new(approval.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, approval.agent_id(), "task.request");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Reply(reply) => {
                assert_eq!(reply.intent, PENDING_APPROVAL_INTENT);
                assert_eq!(reply.payload["status"], "pending_approval");
            }
            other => panic!("Expected pending-approval reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_misaddressed_message_is_rejected() {
        let (receiver, sender) = receiver_and_sender();
        let processor =
            InboundProcessor::new(receiver.clone(), EchoHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, "agt_ffffffffffffffffffffffffffffffff", "task.request");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Rejected(AgoraError::AgentUnavailable(_)) => {}
            other => panic!("Expected AgentUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let (receiver, sender) = receiver_and_sender();
        let processor =
            InboundProcessor::new(receiver.clone(), ClosedHandler, UnverifiedPolicy::Reject);
        let raw = raw_message(&sender, receiver.agent_id(), "task.request");

        match processor.process(&raw, Some(&sender.card)).await {
            InboundOutcome::Rejected(AgoraError::ConversationClosed(_)) => {}
            other => panic!("Expected ConversationClosed, got {other:?}"),
        }
    }
}
