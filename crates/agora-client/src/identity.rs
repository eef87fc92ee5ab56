//! Local agent identity: keypair, card, and registration credential.

use agora_types::{id, AgentCard, AgoraResult, KeyPair, Message};
use serde_json::Value;

/// Everything an agent process holds about itself.
///
/// The private key and the raw bearer credential live only here; the
/// directory sees the public key (via the card) and a hash of the
/// credential.
pub struct LocalIdentity {
    keypair: KeyPair,
    /// The card as currently published (or about to be).
    pub card: AgentCard,
    credential: String,
}

impl LocalIdentity {
    /// Create a fresh identity with a generated keypair and credential.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        capabilities: Vec<String>,
        intents: Vec<String>,
    ) -> Self {
        let keypair = KeyPair::generate();
        let mut card = AgentCard::new(name, endpoint, keypair.public_key());
        card.capabilities = capabilities;
        card.intents = intents;
        Self {
            keypair,
            card,
            credential: id::generate_id(""),
        }
    }

    /// Rebuild an identity from persisted parts.
    pub fn from_parts(keypair: KeyPair, card: AgentCard, credential: String) -> Self {
        Self {
            keypair,
            card,
            credential,
        }
    }

    /// The bearer credential presented to the directory.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// This agent's id as currently known.
    pub fn agent_id(&self) -> &str {
        &self.card.agent_id
    }

    /// Adopt the id the directory assigned at registration. The directory
    /// ignores locally generated ids, so this must be called with the
    /// registration response before sending messages.
    pub fn adopt_agent_id(&mut self, agent_id: String) {
        self.card.agent_id = agent_id;
    }

    /// Compose and sign a message from this agent.
    ///
    /// `conversation` of `None` starts a new conversation.
    pub fn compose(
        &self,
        to: impl Into<String>,
        intent: impl Into<String>,
        payload: Value,
        conversation: Option<String>,
    ) -> AgoraResult<Message> {
        let mut message = Message::new(
            self.card.agent_id.clone(),
            to,
            intent,
            payload,
            conversation,
        );
        message.sign(&self.keypair)?;
        Ok(message)
    }
}
