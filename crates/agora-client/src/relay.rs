//! Store-and-forward consumption: the relay polling loop.
//!
//! The relay is at-least-once, so the poller dedupes by message id and
//! treats every entry as possibly seen before. Failure handling follows
//! three rules: network failures are swallowed and retried on the next
//! interval; malformed or invalid-signature entries are acknowledged to
//! drain them rather than retried forever; an entry whose sender card
//! could not be *fetched* (transient) is left unacknowledged for the next
//! poll.

use crate::direct::SendOutcome;
use crate::directory::{DirectoryClient, PolledMessage};
use crate::identity::LocalIdentity;
use crate::inbound::{InboundOutcome, InboundProcessor, IntentHandler, UnverifiedPolicy};
use agora_types::{message, verify_value, AgentCard, AgoraError, AgoraResult, Message};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Polling consumer for one agent's relay inbox.
pub struct RelayPoller<H> {
    directory: DirectoryClient,
    identity: Arc<LocalIdentity>,
    processor: InboundProcessor<H>,
    interval: Duration,
    /// Message ids already handled, for at-least-once dedup.
    seen: HashSet<String>,
    /// Sender cards fetched from the directory, keyed by agent id.
    card_cache: DashMap<String, AgentCard>,
}

impl<H: IntentHandler> RelayPoller<H> {
    /// Build a poller that checks the relay every `interval`.
    pub fn new(
        directory: DirectoryClient,
        identity: Arc<LocalIdentity>,
        handler: H,
        unverified_policy: UnverifiedPolicy,
        interval: Duration,
    ) -> Self {
        let processor = InboundProcessor::new(identity.clone(), handler, unverified_policy);
        Self {
            directory,
            identity,
            processor,
            interval,
            seen: HashSet::new(),
            card_cache: DashMap::new(),
        }
    }

    /// Run until `shutdown` flips to true. Poll errors are logged and
    /// retried on the next tick, never fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Relay poll failed; will retry");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Relay poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One poll/process/acknowledge pass. Returns how many entries were
    /// handled (dispatched or deliberately drained).
    pub async fn poll_once(&mut self) -> AgoraResult<usize> {
        let entries = self
            .directory
            .poll_relay(self.identity.credential(), None, None)
            .await?;

        let mut handled = 0;
        for entry in entries {
            if self.process_entry(&entry).await {
                self.acknowledge(&entry.relay_id).await;
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Process one entry. Returns whether it should be acknowledged.
    async fn process_entry(&mut self, entry: &PolledMessage) -> bool {
        // Dedup before anything else: an entry seen in a previous pass
        // (acknowledged too late, or re-delivered) is drained silently.
        let message_id = entry
            .message
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(ref message_id) = message_id {
            if self.seen.contains(message_id) {
                debug!(message = %message_id, "Dropping duplicate delivery");
                return true;
            }
        }

        let sender_card = match self.sender_card(&entry.message).await {
            Ok(card) => card,
            Err(e) => {
                // Transient lookup failure: leave the entry queued.
                warn!(error = %e, relay = %entry.relay_id, "Sender lookup failed; deferring entry");
                return false;
            }
        };

        match self
            .processor
            .process(&entry.message, sender_card.as_ref())
            .await
        {
            InboundOutcome::Reply(reply) => {
                if let Err(e) = self
                    .directory
                    .submit_relay(&reply, self.identity.credential())
                    .await
                {
                    // The reply can be regenerated; do not redeliver the
                    // inbound message just because the reply failed.
                    warn!(error = %e, "Failed to submit reply via relay");
                }
            }
            InboundOutcome::NoReply => {}
            InboundOutcome::Rejected(e) => {
                // Malformed, invalid-signature, or policy-rejected entries
                // are drained, not retried forever.
                warn!(code = e.code(), error = %e, relay = %entry.relay_id, "Draining rejected entry");
            }
        }

        if let Some(message_id) = message_id {
            self.seen.insert(message_id);
        }
        true
    }

    async fn sender_card(&self, raw: &Value) -> AgoraResult<Option<AgentCard>> {
        let Some(from) = raw.get("from").and_then(Value::as_str) else {
            // No sender field at all: the processor will reject it as
            // malformed; no card to fetch.
            return Ok(None);
        };
        if let Some(card) = self.card_cache.get(from) {
            return Ok(Some(card.clone()));
        }
        match self.directory.get_agent(from).await {
            Ok(card) => {
                self.card_cache.insert(from.to_string(), card.clone());
                Ok(Some(card))
            }
            Err(AgoraError::NotFound(_)) | Err(AgoraError::AgentUnavailable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn acknowledge(&self, relay_id: &str) {
        if let Err(e) = self
            .directory
            .acknowledge(relay_id, self.identity.credential())
            .await
        {
            // Acknowledgment is idempotent; a lost ack only means one
            // duplicate delivery, which dedup absorbs.
            warn!(error = %e, relay = %relay_id, "Acknowledgment failed");
        }
    }
}

/// Submit `message` through the relay, then poll its conversation until the
/// recipient replies or `timeout` elapses.
///
/// The store-and-forward counterpart of [`crate::direct::send_direct`]: a
/// timeout is "no response yet", not failure. The message stays queued for
/// the recipient and the conversation stays open. Poll failures inside the
/// window are swallowed and retried on the next interval.
///
/// A reply whose signature fails against the recipient's published key is
/// drained and rejected outright; malformed entries in the conversation are
/// drained and skipped.
pub async fn send_and_await_reply(
    directory: &DirectoryClient,
    identity: &LocalIdentity,
    recipient: &AgentCard,
    message: &Message,
    poll_interval: Duration,
    timeout: Duration,
) -> AgoraResult<SendOutcome> {
    directory
        .submit_relay(message, identity.credential())
        .await?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let entries = match directory
            .poll_relay(
                identity.credential(),
                Some(&message.conversation_id),
                None,
            )
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Reply poll failed; will retry");
                Vec::new()
            }
        };

        for entry in entries {
            let from = entry.message.get("from").and_then(Value::as_str);
            if from != Some(message.to.as_str()) {
                // Someone else's turn in the conversation; leave it queued.
                continue;
            }

            let Some(signature) = message::signature_of(&entry.message) else {
                warn!(relay = %entry.relay_id, "Draining unsigned reply");
                ack_reply(directory, identity, &entry.relay_id).await;
                continue;
            };
            if !verify_value(&entry.message, signature, &recipient.public_key) {
                ack_reply(directory, identity, &entry.relay_id).await;
                return Err(AgoraError::InvalidSignature);
            }
            let reply: Message = match serde_json::from_value(entry.message.clone()) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, relay = %entry.relay_id, "Draining malformed reply");
                    ack_reply(directory, identity, &entry.relay_id).await;
                    continue;
                }
            };

            ack_reply(directory, identity, &entry.relay_id).await;
            debug!(conversation = %reply.conversation_id, "Received relayed reply");
            return Ok(SendOutcome::Reply(reply));
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(SendOutcome::NoResponseYet);
        }
        tokio::time::sleep_until(std::cmp::min(now + poll_interval, deadline)).await;
    }
}

async fn ack_reply(directory: &DirectoryClient, identity: &LocalIdentity, relay_id: &str) {
    if let Err(e) = directory.acknowledge(relay_id, identity.credential()).await {
        warn!(error = %e, relay = %relay_id, "Acknowledgment failed");
    }
}
