//! Typed HTTP client for the directory and relay surface.
//!
//! Failure responses are decoded from the shared error-body shape back
//! into [`AgoraError`], so callers branch on taxonomy codes, not HTTP
//! status numbers.

use agora_types::{AgentCard, AgoraError, AgoraResult, ErrorBody, Message, SearchQuery};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Header that rotates the registration credential during an update.
const ROTATE_TOKEN_HEADER: &str = "x-agora-rotate-token";

/// Registration receipt from the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationReceipt {
    /// The server-assigned agent id; supersedes any locally generated one.
    pub agent_id: String,
    /// When the registration was created.
    pub registered_at: DateTime<Utc>,
    /// When it lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

/// Renewal receipt from an update.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalReceipt {
    /// The unchanged agent id.
    pub agent_id: String,
    /// The refreshed expiry.
    pub expires_at: DateTime<Utc>,
}

/// One page of discovery results.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResults {
    /// Matching cards.
    pub agents: Vec<AgentCard>,
    /// Continuation token; absent on the last page.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Receipt for a queued relay submission.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayReceipt {
    /// Server-assigned entry id.
    pub relay_id: String,
    /// Queue status, `"queued"` on success.
    pub status: String,
}

/// One polled relay entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PolledMessage {
    /// Entry id to acknowledge after processing.
    pub relay_id: String,
    /// The verbatim message body, signature included.
    pub message: Value,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PollBody {
    messages: Vec<PolledMessage>,
}

/// Client for one directory instance.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DirectoryClient {
    /// Create a client for the directory at `base_url`.
    pub fn new(base_url: impl Into<String>) -> AgoraResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgoraError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Register a card; returns the server-assigned identity.
    pub async fn register(
        &self,
        card: &AgentCard,
        credential: &str,
    ) -> AgoraResult<RegistrationReceipt> {
        let response = self
            .http
            .post(self.url("/v1/agents"))
            .bearer_auth(credential)
            .json(card)
            .send()
            .await
            .map_err(network_err)?;
        decode(response).await
    }

    /// Fetch one published card.
    pub async fn get_agent(&self, agent_id: &str) -> AgoraResult<AgentCard> {
        let response = self
            .http
            .get(self.url(&format!("/v1/agents/{agent_id}")))
            .send()
            .await
            .map_err(network_err)?;
        decode(response).await
    }

    /// Discover agents by capability, intent, and free text.
    pub async fn search(&self, query: &SearchQuery) -> AgoraResult<SearchResults> {
        let mut request = self.http.get(self.url("/v1/agents"));
        if let Some(capability) = &query.capability {
            request = request.query(&[("capability", capability)]);
        }
        if let Some(intent) = &query.intent {
            request = request.query(&[("intent", intent)]);
        }
        if let Some(free_text) = &query.free_text {
            request = request.query(&[("q", free_text)]);
        }
        if let Some(limit) = query.limit {
            request = request.query(&[("limit", &limit.to_string())]);
        }
        if let Some(cursor) = &query.cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await.map_err(network_err)?;
        decode(response).await
    }

    /// Replace the published card and renew the registration. A
    /// `rotate_credential` of `Some` swaps the stored credential.
    pub async fn update(
        &self,
        agent_id: &str,
        card: &AgentCard,
        credential: &str,
        rotate_credential: Option<&str>,
    ) -> AgoraResult<RenewalReceipt> {
        let mut request = self
            .http
            .put(self.url(&format!("/v1/agents/{agent_id}")))
            .bearer_auth(credential)
            .json(card);
        if let Some(new_credential) = rotate_credential {
            request = request.header(ROTATE_TOKEN_HEADER, new_credential);
        }
        let response = request.send().await.map_err(network_err)?;
        decode(response).await
    }

    /// Deregister an agent.
    pub async fn deregister(&self, agent_id: &str, credential: &str) -> AgoraResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/agents/{agent_id}")))
            .bearer_auth(credential)
            .send()
            .await
            .map_err(network_err)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(decode_error(response).await)
        }
    }

    /// Submit a signed message for store-and-forward delivery.
    pub async fn submit_relay(
        &self,
        message: &Message,
        credential: &str,
    ) -> AgoraResult<RelayReceipt> {
        let response = self
            .http
            .post(self.url("/v1/relay"))
            .bearer_auth(credential)
            .json(message)
            .send()
            .await
            .map_err(network_err)?;
        decode(response).await
    }

    /// Fetch undelivered messages for the authenticated agent.
    pub async fn poll_relay(
        &self,
        credential: &str,
        conversation: Option<&str>,
        limit: Option<u32>,
    ) -> AgoraResult<Vec<PolledMessage>> {
        let mut request = self.http.get(self.url("/v1/relay")).bearer_auth(credential);
        if let Some(conversation) = conversation {
            request = request.query(&[("conversation", conversation)]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", &limit.to_string())]);
        }
        let response = request.send().await.map_err(network_err)?;
        let body: PollBody = decode(response).await?;
        Ok(body.messages)
    }

    /// Acknowledge a relay entry after processing it.
    pub async fn acknowledge(&self, relay_id: &str, credential: &str) -> AgoraResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/v1/relay/{relay_id}/ack")))
            .bearer_auth(credential)
            .send()
            .await
            .map_err(network_err)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(decode_error(response).await)
        }
    }
}

fn network_err(e: reqwest::Error) -> AgoraError {
    AgoraError::Network(e.to_string())
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AgoraResult<T> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| AgoraError::Serialization(e.to_string()))
    } else {
        Err(decode_error(response).await)
    }
}

async fn decode_error(response: reqwest::Response) -> AgoraError {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.into_error(),
        Err(_) => AgoraError::Network(format!("unexpected response status {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = DirectoryClient::new("http://localhost:7420/").unwrap();
        assert_eq!(client.url("/v1/agents"), "http://localhost:7420/v1/agents");
    }

    #[test]
    fn test_poll_body_decodes() {
        let json = r#"{"messages":[{"relay_id":"rly_ff","message":{"x":1},"created_at":"2026-08-05T10:00:00Z"}]}"#;
        let body: PollBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].relay_id, "rly_ff");
        assert_eq!(body.messages[0].message["x"], 1);
    }
}
