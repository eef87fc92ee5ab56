//! In-memory backend for tests and single-process development.

use crate::{
    card_matches, decode_cursor, encode_cursor, expiry_from, hash_token, token_hash_matches,
    IdentityStore, Registration, RelayEntry, RelayQueue, Renewal, SearchPage, StoredAgent,
};
use agora_types::{id, AgentCard, AgoraError, AgoraResult, SearchParams};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// In-memory identity store and relay queue.
///
/// Agent records live in a `BTreeMap` so discovery pages iterate in the
/// stable lexicographic id order the cursor contract requires. Every
/// mutating operation holds the write guard across its whole
/// credential-check + mutation sequence, so same-key writers serialize.
#[derive(Debug, Default)]
pub struct MemStore {
    agents: RwLock<BTreeMap<String, StoredAgent>>,
    relay: RwLock<Vec<RelayEntry>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemStore {
    fn register(&self, mut card: AgentCard, credential: &str) -> AgoraResult<Registration> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());

        // The caller-supplied id is ignored; the store issues its own.
        let mut agent_id = id::agent_id();
        while agents.contains_key(&agent_id) {
            agent_id = id::agent_id();
        }
        card.agent_id = agent_id.clone();

        let now = Utc::now();
        let stored = StoredAgent {
            card,
            registered_at: now,
            expires_at: expiry_from(now),
            token_hash: hash_token(credential),
        };
        let registration = Registration {
            agent_id: agent_id.clone(),
            registered_at: stored.registered_at,
            expires_at: stored.expires_at,
        };
        agents.insert(agent_id.clone(), stored);
        info!(agent = %agent_id, "Registered agent");
        Ok(registration)
    }

    fn get(&self, agent_id: &str) -> AgoraResult<Option<StoredAgent>> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(agents
            .get(agent_id)
            .filter(|a| !a.is_expired(now))
            .cloned())
    }

    fn update(
        &self,
        agent_id: &str,
        mut card: AgentCard,
        credential: &str,
        rotate_credential: Option<&str>,
    ) -> AgoraResult<Renewal> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let stored = agents
            .get_mut(agent_id)
            .filter(|a| !a.is_expired(now))
            .ok_or_else(|| AgoraError::NotFound(agent_id.to_string()))?;

        if !token_hash_matches(&stored.token_hash, &hash_token(credential)) {
            return Err(AgoraError::Unauthorized(
                "credential does not match registration".to_string(),
            ));
        }

        // agent_id is immutable once assigned; the incoming card cannot
        // change it.
        card.agent_id = agent_id.to_string();
        stored.card = card;
        stored.expires_at = expiry_from(now);
        if let Some(new_credential) = rotate_credential {
            stored.token_hash = hash_token(new_credential);
        }
        info!(agent = %agent_id, "Renewed registration");
        Ok(Renewal {
            agent_id: agent_id.to_string(),
            expires_at: stored.expires_at,
        })
    }

    fn delete(&self, agent_id: &str, credential: &str) -> AgoraResult<()> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let stored = agents
            .get(agent_id)
            .filter(|a| !a.is_expired(now))
            .ok_or_else(|| AgoraError::NotFound(agent_id.to_string()))?;

        if !token_hash_matches(&stored.token_hash, &hash_token(credential)) {
            return Err(AgoraError::Unauthorized(
                "credential does not match registration".to_string(),
            ));
        }

        agents.remove(agent_id);
        info!(agent = %agent_id, "Deregistered agent");
        Ok(())
    }

    fn search(&self, params: &SearchParams) -> AgoraResult<SearchPage> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();

        let after = match &params.cursor {
            Some(cursor) => Some(decode_cursor(cursor)?),
            None => None,
        };

        let mut page = Vec::new();
        for (agent_id, stored) in agents.iter() {
            if let Some(last) = &after {
                if agent_id <= last {
                    continue;
                }
            }
            if stored.is_expired(now) || !card_matches(&stored.card, params) {
                continue;
            }
            page.push(stored.card.clone());
            if page.len() == params.limit {
                break;
            }
        }

        let cursor = if page.len() == params.limit {
            page.last().map(|c| encode_cursor(&c.agent_id))
        } else {
            None
        };
        Ok(SearchPage {
            agents: page,
            cursor,
        })
    }

    fn resolve_token(&self, credential: &str) -> AgoraResult<Option<String>> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let presented = hash_token(credential);
        let now = Utc::now();
        Ok(agents
            .values()
            .find(|a| !a.is_expired(now) && token_hash_matches(&a.token_hash, &presented))
            .map(|a| a.card.agent_id.clone()))
    }
}

impl RelayQueue for MemStore {
    fn enqueue(
        &self,
        conversation_id: &str,
        from: &str,
        to: &str,
        intent: &str,
        message: Value,
    ) -> AgoraResult<RelayEntry> {
        let mut relay = self.relay.write().unwrap_or_else(|e| e.into_inner());
        let entry = RelayEntry {
            relay_id: id::relay_id(),
            conversation_id: conversation_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            intent: intent.to_string(),
            message,
            created_at: Utc::now(),
            delivered: false,
        };
        relay.push(entry.clone());
        debug!(relay = %entry.relay_id, to = %to, "Queued message");
        Ok(entry)
    }

    fn poll(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> AgoraResult<Vec<RelayEntry>> {
        let relay = self.relay.read().unwrap_or_else(|e| e.into_inner());
        // Entries are appended in arrival order, so iteration is already
        // oldest-first.
        Ok(relay
            .iter()
            .filter(|e| {
                !e.delivered
                    && e.to == agent_id
                    && conversation_id.map(|c| e.conversation_id == c).unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn acknowledge(&self, relay_id: &str, agent_id: &str) -> AgoraResult<bool> {
        let mut relay = self.relay.write().unwrap_or_else(|e| e.into_inner());
        match relay
            .iter_mut()
            .find(|e| e.relay_id == relay_id && e.to == agent_id && !e.delivered)
        {
            Some(entry) => {
                entry.delivered = true;
                debug!(relay = %relay_id, "Acknowledged delivery");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
