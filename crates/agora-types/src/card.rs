//! Agent identity cards.
//!
//! A card is the discovery document an agent publishes to the directory:
//! who it is, where to reach it, which public key verifies its messages,
//! and what it can do. Cards are not signed themselves; the directory binds
//! a card to its registering credential, and message authenticity comes
//! from per-message signatures against the card's published key.

use crate::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Identity document describing one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Wire protocol version.
    pub protocol: String,
    /// Globally unique identifier, `agt_`-prefixed. Immutable once assigned
    /// by the directory; an update may not change it.
    pub agent_id: String,
    /// Human-readable name, non-empty.
    pub name: String,
    /// What the agent does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Operator of the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// HTTP(S) URL where the agent accepts direct messages.
    pub endpoint: String,
    /// Base64url-encoded Ed25519 verifying key.
    pub public_key: String,
    /// Free-form capability tags, non-empty.
    pub capabilities: Vec<String>,
    /// Dot-namespaced intent strings the agent handles, non-empty.
    pub intents: Vec<String>,
    /// Advertised availability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<Availability>,
    /// Who may send to this agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_control: Option<AccessControl>,
    /// Arbitrary additional fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl AgentCard {
    /// Build a minimal card with a freshly generated agent id.
    ///
    /// The directory assigns the authoritative id at registration; the
    /// local one only has to be syntactically valid.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            agent_id: crate::id::agent_id(),
            name: name.into(),
            description: None,
            owner: None,
            endpoint: endpoint.into(),
            public_key: public_key.into(),
            capabilities: Vec::new(),
            intents: Vec::new(),
            availability: None,
            access_control: None,
            metadata: None,
        }
    }

    /// Whether the card advertises the given capability tag.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Whether the card advertises handling the given intent.
    pub fn handles_intent(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i == intent)
    }
}

/// Advertised availability of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Accepting messages.
    Online,
    /// Reachable but slow to respond.
    Busy,
    /// Not currently processing messages.
    Offline,
}

/// Admission policy for inbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Admission mode.
    pub mode: AccessMode,
    /// Agent ids admitted under `allowlist` mode, or pre-approved under
    /// `approval` mode.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Agent ids never admitted under `allowlist` mode.
    #[serde(default)]
    pub block: Vec<String>,
}

/// How a recipient treats senders it has no prior relationship with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Any sender is admitted.
    Open,
    /// Only allow-listed senders are admitted.
    Allowlist,
    /// Senders are admitted, but unrecognized ones get a deferred
    /// `pending_approval` reply instead of a substantive one.
    Approval,
}
