//! Structural validation of envelopes and queries.
//!
//! Validators are pure functions and report every violated rule
//! distinctly, so a caller can correct all of them in one round trip
//! instead of peeling failures one at a time.

use crate::card::AgentCard;
use crate::message::Message;
use crate::signing::decode_public_key;
use crate::{id, PROTOCOL_VERSION};
use serde::Deserialize;
use url::Url;

/// Default page size for discovery queries.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Maximum page size for discovery queries.
pub const MAX_PAGE_SIZE: usize = 100;

/// One violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The field that failed.
    pub field: String,
    /// What is wrong with it.
    pub problem: String,
}

impl Violation {
    fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// Aggregate of every rule an envelope violated.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The individual violations, one per rule.
    pub violations: Vec<Violation>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(Violation::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::error::AgoraError {
    fn from(err: ValidationError) -> Self {
        crate::error::AgoraError::InvalidMessage(err.to_string())
    }
}

fn finish(violations: Vec<Violation>) -> Result<(), ValidationError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

/// Validate an agent card before it is registered or updated.
pub fn validate_card(card: &AgentCard) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if card.protocol != PROTOCOL_VERSION {
        violations.push(Violation::new(
            "protocol",
            format!("unsupported version {:?}, expected {PROTOCOL_VERSION:?}", card.protocol),
        ));
    }
    if !id::has_prefix(&card.agent_id, id::AGENT_PREFIX) {
        violations.push(Violation::new(
            "agent_id",
            format!("must start with {:?}", id::AGENT_PREFIX),
        ));
    }
    if card.name.trim().is_empty() {
        violations.push(Violation::new("name", "must not be empty"));
    }
    match Url::parse(&card.endpoint) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => violations.push(Violation::new(
            "endpoint",
            format!("scheme {:?} is not http or https", url.scheme()),
        )),
        Err(e) => violations.push(Violation::new("endpoint", format!("not a valid URL: {e}"))),
    }
    if let Err(e) = decode_public_key(&card.public_key) {
        violations.push(Violation::new("public_key", e.to_string()));
    }
    if card.capabilities.is_empty() {
        violations.push(Violation::new("capabilities", "must not be empty"));
    } else if card.capabilities.iter().any(|c| c.trim().is_empty()) {
        violations.push(Violation::new("capabilities", "tags must not be blank"));
    }
    if card.intents.is_empty() {
        violations.push(Violation::new("intents", "must not be empty"));
    } else if card.intents.iter().any(|i| i.trim().is_empty()) {
        violations.push(Violation::new("intents", "entries must not be blank"));
    }

    finish(violations)
}

/// Validate a message envelope before it is signed, sent, or relayed.
pub fn validate_message(msg: &Message) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if msg.protocol != PROTOCOL_VERSION {
        violations.push(Violation::new(
            "protocol",
            format!("unsupported version {:?}, expected {PROTOCOL_VERSION:?}", msg.protocol),
        ));
    }
    if !id::has_prefix(&msg.message_id, id::MESSAGE_PREFIX) {
        violations.push(Violation::new(
            "message_id",
            format!("must start with {:?}", id::MESSAGE_PREFIX),
        ));
    }
    if !id::has_prefix(&msg.conversation_id, id::CONVERSATION_PREFIX) {
        violations.push(Violation::new(
            "conversation_id",
            format!("must start with {:?}", id::CONVERSATION_PREFIX),
        ));
    }
    if !id::has_prefix(&msg.from, id::AGENT_PREFIX) {
        violations.push(Violation::new(
            "from",
            format!("must start with {:?}", id::AGENT_PREFIX),
        ));
    }
    if !id::has_prefix(&msg.to, id::AGENT_PREFIX) {
        violations.push(Violation::new(
            "to",
            format!("must start with {:?}", id::AGENT_PREFIX),
        ));
    }
    if chrono::DateTime::parse_from_rfc3339(&msg.timestamp).is_err() {
        violations.push(Violation::new("timestamp", "not a valid ISO-8601 timestamp"));
    }
    if msg.intent.trim().is_empty() {
        violations.push(Violation::new("intent", "must not be empty"));
    }
    if msg.signature.is_empty() {
        violations.push(Violation::new("signature", "must not be empty"));
    }

    finish(violations)
}

/// Raw discovery query parameters, as deserialized from a query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    /// Require this capability tag.
    pub capability: Option<String>,
    /// Require this supported intent.
    pub intent: Option<String>,
    /// Case-insensitive substring match on name/description.
    #[serde(rename = "q")]
    pub free_text: Option<String>,
    /// Page size; defaults to [`DEFAULT_PAGE_SIZE`].
    pub limit: Option<u32>,
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
}

/// A validated discovery query with defaults applied.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Require this capability tag.
    pub capability: Option<String>,
    /// Require this supported intent.
    pub intent: Option<String>,
    /// Case-insensitive substring match on name/description.
    pub free_text: Option<String>,
    /// Page size, within `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
    /// Opaque continuation token.
    pub cursor: Option<String>,
}

/// Validate a discovery query, applying the default limit and rejecting
/// out-of-range values rather than clamping them.
pub fn validate_query(query: &SearchQuery) -> Result<SearchParams, ValidationError> {
    let mut violations = Vec::new();

    let limit = match query.limit {
        None => DEFAULT_PAGE_SIZE,
        Some(n) if (1..=MAX_PAGE_SIZE as u32).contains(&n) => n as usize,
        Some(n) => {
            violations.push(Violation::new(
                "limit",
                format!("{n} is out of range 1..={MAX_PAGE_SIZE}"),
            ));
            DEFAULT_PAGE_SIZE
        }
    };

    finish(violations)?;
    Ok(SearchParams {
        capability: query.capability.clone(),
        intent: query.intent.clone(),
        free_text: query.free_text.clone(),
        limit,
        cursor: query.cursor.clone(),
    })
}
