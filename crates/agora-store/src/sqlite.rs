//! SQLite backend, the durable production store.
//!
//! A single connection behind a mutex: every operation, including the
//! credential-check + mutation pairs in `update` and `delete`, runs under
//! one lock acquisition, so same-key writers cannot interleave. Timestamps
//! are RFC 3339 text columns; expiry is evaluated in Rust at query time,
//! never by a background sweep.

use crate::{
    card_matches, decode_cursor, encode_cursor, expiry_from, hash_token, token_hash_matches,
    IdentityStore, Registration, RelayEntry, RelayQueue, Renewal, SearchPage, StoredAgent,
};
use agora_types::{id, AgentCard, AgoraError, AgoraResult, SearchParams};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agents (
    agent_id      TEXT PRIMARY KEY,
    card          TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    token_hash    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_token_hash ON agents(token_hash);

CREATE TABLE IF NOT EXISTS relay_entries (
    relay_id        TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender          TEXT NOT NULL,
    recipient       TEXT NOT NULL,
    intent          TEXT NOT NULL,
    message         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    delivered       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_relay_recipient ON relay_entries(recipient, delivered);
";

/// Durable identity store and relay queue backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> AgoraResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> AgoraResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> AgoraResult<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> AgoraResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AgoraError::Storage(e.to_string()))
    }
}

fn storage_err(e: rusqlite::Error) -> AgoraError {
    AgoraError::Storage(e.to_string())
}

fn parse_time(raw: &str) -> AgoraResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AgoraError::Storage(format!("corrupt timestamp {raw:?}: {e}")))
}

fn row_to_agent(card: &str, registered_at: &str, expires_at: &str, token_hash: String) -> AgoraResult<StoredAgent> {
    Ok(StoredAgent {
        card: serde_json::from_str(card).map_err(|e| AgoraError::Serialization(e.to_string()))?,
        registered_at: parse_time(registered_at)?,
        expires_at: parse_time(expires_at)?,
        token_hash,
    })
}

impl IdentityStore for SqliteStore {
    fn register(&self, mut card: AgentCard, credential: &str) -> AgoraResult<Registration> {
        let conn = self.lock()?;
        let now = Utc::now();
        let expires_at = expiry_from(now);
        let token_hash = hash_token(credential);

        // The caller-supplied id is ignored; retry on the (negligible)
        // chance of a collision with an existing row.
        loop {
            let agent_id = id::agent_id();
            card.agent_id = agent_id.clone();
            let card_json = serde_json::to_string(&card)
                .map_err(|e| AgoraError::Serialization(e.to_string()))?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO agents
                     (agent_id, card, registered_at, expires_at, token_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        agent_id,
                        card_json,
                        now.to_rfc3339(),
                        expires_at.to_rfc3339(),
                        token_hash,
                    ],
                )
                .map_err(storage_err)?;
            if inserted == 1 {
                info!(agent = %agent_id, "Registered agent");
                return Ok(Registration {
                    agent_id,
                    registered_at: now,
                    expires_at,
                });
            }
        }
    }

    fn get(&self, agent_id: &str) -> AgoraResult<Option<StoredAgent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT card, registered_at, expires_at, token_hash
                 FROM agents WHERE agent_id = ?1",
            )
            .map_err(storage_err)?;
        let result = stmt.query_row(rusqlite::params![agent_id], |row| {
            let card: String = row.get(0)?;
            let registered_at: String = row.get(1)?;
            let expires_at: String = row.get(2)?;
            let token_hash: String = row.get(3)?;
            Ok((card, registered_at, expires_at, token_hash))
        });
        match result {
            Ok((card, registered_at, expires_at, token_hash)) => {
                let stored = row_to_agent(&card, &registered_at, &expires_at, token_hash)?;
                if stored.is_expired(Utc::now()) {
                    Ok(None)
                } else {
                    Ok(Some(stored))
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn update(
        &self,
        agent_id: &str,
        mut card: AgentCard,
        credential: &str,
        rotate_credential: Option<&str>,
    ) -> AgoraResult<Renewal> {
        let conn = self.lock()?;
        let now = Utc::now();

        let result = conn.query_row(
            "SELECT expires_at, token_hash FROM agents WHERE agent_id = ?1",
            rusqlite::params![agent_id],
            |row| {
                let expires_at: String = row.get(0)?;
                let token_hash: String = row.get(1)?;
                Ok((expires_at, token_hash))
            },
        );
        let (expires_at, token_hash) = match result {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(AgoraError::NotFound(agent_id.to_string()))
            }
            Err(e) => return Err(storage_err(e)),
        };
        if parse_time(&expires_at)? <= now {
            return Err(AgoraError::NotFound(agent_id.to_string()));
        }
        if !token_hash_matches(&token_hash, &hash_token(credential)) {
            return Err(AgoraError::Unauthorized(
                "credential does not match registration".to_string(),
            ));
        }

        card.agent_id = agent_id.to_string();
        let card_json =
            serde_json::to_string(&card).map_err(|e| AgoraError::Serialization(e.to_string()))?;
        let new_expiry = expiry_from(now);
        let new_hash = match rotate_credential {
            Some(new_credential) => hash_token(new_credential),
            None => token_hash,
        };
        conn.execute(
            "UPDATE agents SET card = ?2, expires_at = ?3, token_hash = ?4 WHERE agent_id = ?1",
            rusqlite::params![agent_id, card_json, new_expiry.to_rfc3339(), new_hash],
        )
        .map_err(storage_err)?;
        info!(agent = %agent_id, "Renewed registration");
        Ok(Renewal {
            agent_id: agent_id.to_string(),
            expires_at: new_expiry,
        })
    }

    fn delete(&self, agent_id: &str, credential: &str) -> AgoraResult<()> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT expires_at, token_hash FROM agents WHERE agent_id = ?1",
            rusqlite::params![agent_id],
            |row| {
                let expires_at: String = row.get(0)?;
                let token_hash: String = row.get(1)?;
                Ok((expires_at, token_hash))
            },
        );
        let (expires_at, token_hash) = match result {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(AgoraError::NotFound(agent_id.to_string()))
            }
            Err(e) => return Err(storage_err(e)),
        };
        if parse_time(&expires_at)? <= Utc::now() {
            return Err(AgoraError::NotFound(agent_id.to_string()));
        }
        if !token_hash_matches(&token_hash, &hash_token(credential)) {
            return Err(AgoraError::Unauthorized(
                "credential does not match registration".to_string(),
            ));
        }

        conn.execute(
            "DELETE FROM agents WHERE agent_id = ?1",
            rusqlite::params![agent_id],
        )
        .map_err(storage_err)?;
        info!(agent = %agent_id, "Deregistered agent");
        Ok(())
    }

    fn search(&self, params: &SearchParams) -> AgoraResult<SearchPage> {
        let conn = self.lock()?;
        let after = match &params.cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => String::new(),
        };

        let mut stmt = conn
            .prepare(
                "SELECT card, registered_at, expires_at, token_hash
                 FROM agents WHERE agent_id > ?1 ORDER BY agent_id",
            )
            .map_err(storage_err)?;
        let mut rows = stmt.query(rusqlite::params![after]).map_err(storage_err)?;

        let now = Utc::now();
        let mut page = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let card: String = row.get(0).map_err(storage_err)?;
            let registered_at: String = row.get(1).map_err(storage_err)?;
            let expires_at: String = row.get(2).map_err(storage_err)?;
            let token_hash: String = row.get(3).map_err(storage_err)?;
            let stored = row_to_agent(&card, &registered_at, &expires_at, token_hash)?;
            if stored.is_expired(now) || !card_matches(&stored.card, params) {
                continue;
            }
            page.push(stored.card);
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
        let conn = self.lock()?;
        let presented = hash_token(credential);
        let result = conn.query_row(
            "SELECT agent_id, expires_at, token_hash FROM agents WHERE token_hash = ?1",
            rusqlite::params![presented],
            |row| {
                let agent_id: String = row.get(0)?;
                let expires_at: String = row.get(1)?;
                let token_hash: String = row.get(2)?;
                Ok((agent_id, expires_at, token_hash))
            },
        );
        match result {
            Ok((agent_id, expires_at, token_hash)) => {
                if parse_time(&expires_at)? <= Utc::now() {
                    return Ok(None);
                }
                // The index narrowed the row; the final equality check is
                // still constant-time.
                if token_hash_matches(&token_hash, &presented) {
                    Ok(Some(agent_id))
                } else {
                    Ok(None)
                }
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}

impl RelayQueue for SqliteStore {
    fn enqueue(
        &self,
        conversation_id: &str,
        from: &str,
        to: &str,
        intent: &str,
        message: Value,
    ) -> AgoraResult<RelayEntry> {
        let conn = self.lock()?;
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
        let message_json = serde_json::to_string(&entry.message)
            .map_err(|e| AgoraError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO relay_entries
             (relay_id, conversation_id, sender, recipient, intent, message, created_at, delivered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            rusqlite::params![
                entry.relay_id,
                entry.conversation_id,
                entry.from,
                entry.to,
                entry.intent,
                message_json,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        debug!(relay = %entry.relay_id, to = %to, "Queued message");
        Ok(entry)
    }

    fn poll(
        &self,
        agent_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> AgoraResult<Vec<RelayEntry>> {
        let conn = self.lock()?;
        // rowid preserves arrival order, which gives oldest-first.
        let mut stmt = conn
            .prepare(
                "SELECT relay_id, conversation_id, sender, recipient, intent, message, created_at
                 FROM relay_entries
                 WHERE recipient = ?1 AND delivered = 0
                   AND (?2 IS NULL OR conversation_id = ?2)
                 ORDER BY rowid
                 LIMIT ?3",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![agent_id, conversation_id, limit as i64],
                |row| {
                    let relay_id: String = row.get(0)?;
                    let conversation_id: String = row.get(1)?;
                    let sender: String = row.get(2)?;
                    let recipient: String = row.get(3)?;
                    let intent: String = row.get(4)?;
                    let message: String = row.get(5)?;
                    let created_at: String = row.get(6)?;
                    Ok((relay_id, conversation_id, sender, recipient, intent, message, created_at))
                },
            )
            .map_err(storage_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (relay_id, conversation_id, sender, recipient, intent, message, created_at) =
                row.map_err(storage_err)?;
            entries.push(RelayEntry {
                relay_id,
                conversation_id,
                from: sender,
                to: recipient,
                intent,
                message: serde_json::from_str(&message)
                    .map_err(|e| AgoraError::Serialization(e.to_string()))?,
                created_at: parse_time(&created_at)?,
                delivered: false,
            });
        }
        Ok(entries)
    }

    fn acknowledge(&self, relay_id: &str, agent_id: &str) -> AgoraResult<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE relay_entries SET delivered = 1
                 WHERE relay_id = ?1 AND recipient = ?2 AND delivered = 0",
                rusqlite::params![relay_id, agent_id],
            )
            .map_err(storage_err)?;
        if changed == 1 {
            debug!(relay = %relay_id, "Acknowledged delivery");
        }
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{registered_card, search_params};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.db");

        let agent_id = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .register(
                    registered_card("alice", &["scheduling"], &["meeting.schedule"]),
                    "token",
                )
                .unwrap()
                .agent_id
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let stored = reopened.get(&agent_id).unwrap().unwrap();
        assert_eq!(stored.card.name, "alice");
        assert_eq!(reopened.resolve_token("token").unwrap(), Some(agent_id));
    }

    #[test]
    fn test_register_get_search_delete() {
        let store = store();
        let registration = store
            .register(
                registered_card("alice", &["scheduling"], &["meeting.schedule"]),
                "token",
            )
            .unwrap();

        let page = store
            .search(&search_params(Some("scheduling"), None, None, 20, None))
            .unwrap();
        assert_eq!(page.agents.len(), 1);

        store.delete(&registration.agent_id, "token").unwrap();
        assert!(store.get(&registration.agent_id).unwrap().is_none());
        assert!(store
            .search(&search_params(Some("scheduling"), None, None, 20, None))
            .unwrap()
            .agents
            .is_empty());
    }

    #[test]
    fn test_update_wrong_token_distinct_from_missing() {
        let store = store();
        let registration = store
            .register(
                registered_card("alice", &["scheduling"], &["meeting.schedule"]),
                "token",
            )
            .unwrap();
        let card = registered_card("alice", &["scheduling"], &["meeting.schedule"]);

        let unauthorized = store
            .update(&registration.agent_id, card.clone(), "bad", None)
            .unwrap_err();
        assert!(matches!(unauthorized, AgoraError::Unauthorized(_)));

        let missing = store
            .update("agt_ffffffffffffffffffffffffffffffff", card, "token", None)
            .unwrap_err();
        assert!(matches!(missing, AgoraError::NotFound(_)));
    }

    #[test]
    fn test_pagination_matches_unpaginated_walk() {
        let store = store();
        for i in 0..3 {
            store
                .register(
                    registered_card(&format!("agent-{i}"), &["scheduling"], &["meeting.schedule"]),
                    &format!("token-{i}"),
                )
                .unwrap();
        }

        let all: Vec<String> = store
            .search(&search_params(Some("scheduling"), None, None, 20, None))
            .unwrap()
            .agents
            .iter()
            .map(|c| c.agent_id.clone())
            .collect();

        let mut walked = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .search(&search_params(Some("scheduling"), None, None, 1, cursor.as_deref()))
                .unwrap();
            walked.extend(page.agents.iter().map(|c| c.agent_id.clone()));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(walked, all);
    }

    #[test]
    fn test_expired_row_is_invisible_without_sweep() {
        let store = store();
        let registration = store
            .register(
                registered_card("alice", &["scheduling"], &["meeting.schedule"]),
                "token",
            )
            .unwrap();

        {
            let conn = store.conn.lock().unwrap();
            let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
            conn.execute(
                "UPDATE agents SET expires_at = ?1 WHERE agent_id = ?2",
                rusqlite::params![past, registration.agent_id],
            )
            .unwrap();
        }

        assert!(store.get(&registration.agent_id).unwrap().is_none());
        assert_eq!(store.resolve_token("token").unwrap(), None);
        assert!(store
            .search(&search_params(None, None, None, 20, None))
            .unwrap()
            .agents
            .is_empty());
        // A renewal attempt on an expired record is not-found, not a
        // credential failure.
        let card = registered_card("alice", &["scheduling"], &["meeting.schedule"]);
        assert!(matches!(
            store.update(&registration.agent_id, card, "token", None),
            Err(AgoraError::NotFound(_))
        ));
    }

    #[test]
    fn test_relay_lifecycle_on_sqlite() {
        let store = store();
        let entry = store
            .enqueue("conv_x", "agt_aa", "agt_bb", "task.request", json!({"n": 1}))
            .unwrap();

        let polled = store.poll("agt_bb", None, 10).unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].relay_id, entry.relay_id);
        assert_eq!(polled[0].message, json!({"n": 1}));

        let filtered = store.poll("agt_bb", Some("conv_other"), 10).unwrap();
        assert!(filtered.is_empty());

        assert!(store.acknowledge(&entry.relay_id, "agt_bb").unwrap());
        assert!(store.poll("agt_bb", None, 10).unwrap().is_empty());
        assert!(!store.acknowledge(&entry.relay_id, "agt_bb").unwrap());
    }

    #[test]
    fn test_relay_poll_is_oldest_first() {
        let store = store();
        for i in 0..3 {
            store
                .enqueue("conv_x", "agt_aa", "agt_bb", "task.request", json!({"i": i}))
                .unwrap();
        }
        let polled = store.poll("agt_bb", None, 2).unwrap();
        assert_eq!(polled.len(), 2);
        assert_eq!(polled[0].message["i"], 0);
        assert_eq!(polled[1].message["i"], 1);
    }

    #[test]
    fn test_credential_rotation_on_sqlite() {
        let store = store();
        let registration = store
            .register(
                registered_card("alice", &["scheduling"], &["meeting.schedule"]),
                "old",
            )
            .unwrap();
        let card = registered_card("alice", &["scheduling"], &["meeting.schedule"]);
        store
            .update(&registration.agent_id, card, "old", Some("new"))
            .unwrap();

        assert_eq!(store.resolve_token("old").unwrap(), None);
        assert_eq!(
            store.resolve_token("new").unwrap(),
            Some(registration.agent_id)
        );
    }
}
