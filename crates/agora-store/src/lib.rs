//! Storage contracts for the Agora directory.
//!
//! Two contracts, two backends each:
//! - **IdentityStore**: durable map of agent id → card + credential hash,
//!   with registration expiry and reverse token lookup
//! - **RelayQueue**: per-recipient inbox of undelivered messages, removed
//!   on acknowledgment
//!
//! Backends are selected at startup: [`MemStore`] keeps everything in
//! process (tests, development), [`SqliteStore`] persists to disk. Both
//! satisfy the same contract, including token-hash lookup, so swapping
//! them never changes observable semantics.
//!
//! Credentials are never stored in recoverable form, only a one-way
//! SHA-256 projection. A store compromise does not disclose bearer tokens.

use agora_types::{AgentCard, AgoraResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

mod mem;
mod sqlite;

pub use mem::MemStore;
pub use sqlite::SqliteStore;

/// How long a registration lives without renewal.
pub const REGISTRATION_TTL_DAYS: i64 = 30;

/// A persisted agent registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAgent {
    /// The published identity card.
    pub card: AgentCard,
    /// When the agent first registered.
    pub registered_at: DateTime<Utc>,
    /// When the registration lapses unless renewed.
    pub expires_at: DateTime<Utc>,
    /// One-way hash of the bearer credential. The raw credential is never
    /// persisted.
    pub token_hash: String,
}

impl StoredAgent {
    /// Whether the registration has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// The server-assigned agent id.
    pub agent_id: String,
    /// When the registration was created.
    pub registered_at: DateTime<Utc>,
    /// When it lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful card update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Renewal {
    /// The (unchanged) agent id.
    pub agent_id: String,
    /// The refreshed expiry.
    pub expires_at: DateTime<Utc>,
}

/// One page of discovery results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    /// Matching cards in lexicographic `agent_id` order.
    pub agents: Vec<AgentCard>,
    /// Continuation token; absent when this page is the last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A queued store-and-forward message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Server-assigned entry id, `rly_`-prefixed.
    pub relay_id: String,
    /// Conversation grouping key, copied from the message.
    pub conversation_id: String,
    /// Sending agent id.
    pub from: String,
    /// Receiving agent id.
    pub to: String,
    /// Message intent, copied for filtering without parsing the body.
    pub intent: String,
    /// The full message body, verbatim, signature included.
    pub message: Value,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has acknowledged delivery.
    pub delivered: bool,
}

/// Durable map of agent identities.
///
/// Same-key update/delete serialize the credential check and the mutation
/// under one lock, so two writers can never interleave between check and
/// write. Expiry is enforced at query time: an expired record is invisible
/// to `get`, `search`, and `resolve_token` without any active sweep.
pub trait IdentityStore: Send + Sync {
    /// Register a card, issuing a fresh agent id (any caller-supplied id is
    /// ignored) and binding the card to `hash(credential)`.
    fn register(&self, card: AgentCard, credential: &str) -> AgoraResult<Registration>;

    /// Fetch a live registration.
    fn get(&self, agent_id: &str) -> AgoraResult<Option<StoredAgent>>;

    /// Replace the card and refresh the expiry. The presented credential's
    /// hash must equal the stored one; a mismatch is an authorization
    /// error, never not-found. `rotate_credential` swaps the stored hash.
    fn update(
        &self,
        agent_id: &str,
        card: AgentCard,
        credential: &str,
        rotate_credential: Option<&str>,
    ) -> AgoraResult<Renewal>;

    /// Remove a registration after the same credential check as `update`.
    fn delete(&self, agent_id: &str, credential: &str) -> AgoraResult<()>;

    /// Filter live cards by capability, intent, and free text (logical AND
    /// across supplied filters), in stable lexicographic `agent_id` order,
    /// paginated by last-seen key.
    fn search(&self, params: &agora_types::SearchParams) -> AgoraResult<SearchPage>;

    /// Reverse lookup by credential hash, used to authenticate relay
    /// submissions without re-presenting the card.
    fn resolve_token(&self, credential: &str) -> AgoraResult<Option<String>>;
}

/// Per-recipient inbox of undelivered messages.
///
/// Intentionally at-least-once: a poller may fetch an entry, crash before
/// acknowledging, and receive it again. Consumers dedupe by message id.
pub trait RelayQueue: Send + Sync {
    /// Queue a message for a recipient. The directory layer has already
    /// authenticated the sender and resolved the recipient.
    fn enqueue(
        &self,
        conversation_id: &str,
        from: &str,
        to: &str,
        intent: &str,
        message: Value,
    ) -> AgoraResult<RelayEntry>;

    /// Undelivered entries addressed to `agent_id`, oldest first, optionally
    /// filtered to one conversation, capped at `limit`.
    fn poll(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> AgoraResult<Vec<RelayEntry>>;

    /// Mark delivered, only if the entry is addressed to `agent_id`.
    /// Returns `false` for unknown or already-delivered entries, never a
    /// destructive error, so acknowledging is idempotent.
    fn acknowledge(&self, relay_id: &str, agent_id: &str) -> AgoraResult<bool>;
}

/// One-way projection of a bearer credential.
pub fn hash_token(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two token hashes.
pub fn token_hash_matches(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Compute the expiry for a registration created or renewed at `now`.
pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(REGISTRATION_TTL_DAYS)
}

/// Encode a search cursor from the last agent id returned.
///
/// The encoding is opaque to callers; only the store interprets it.
pub fn encode_cursor(last_agent_id: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    URL_SAFE_NO_PAD.encode(last_agent_id.as_bytes())
}

/// Decode a search cursor back into the last-seen agent id.
pub fn decode_cursor(cursor: &str) -> AgoraResult<String> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| agora_types::AgoraError::InvalidMessage(format!("invalid cursor: {e}")))?;
    String::from_utf8(raw)
        .map_err(|e| agora_types::AgoraError::InvalidMessage(format!("invalid cursor: {e}")))
}

/// Whether a card matches the supplied discovery filters (AND semantics).
pub(crate) fn card_matches(card: &AgentCard, params: &agora_types::SearchParams) -> bool {
    if let Some(capability) = &params.capability {
        if !card.has_capability(capability) {
            return false;
        }
    }
    if let Some(intent) = &params.intent {
        if !card.handles_intent(intent) {
            return false;
        }
    }
    if let Some(text) = &params.free_text {
        let needle = text.to_lowercase();
        let in_name = card.name.to_lowercase().contains(&needle);
        let in_description = card
            .description
            .as_ref()
            .map(|d| d.to_lowercase().contains(&needle))
            .unwrap_or(false);
        if !in_name && !in_description {
            return false;
        }
    }
    true
}
