//! HTTP handlers for the directory and relay surface.
//!
//! The handlers are thin: authenticate, validate, call the store, map
//! errors. Everything stateful lives behind the store traits.

use crate::auth::{authenticate_agent, require_bearer};
use crate::error::ApiError;
use crate::AppState;
use agora_types::validate::{validate_card, validate_message, validate_query, SearchQuery};
use agora_types::{resolve_admission, Admission, AgentCard, AgoraError, Message};
use agora_store::{Registration, Renewal, SearchPage};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `POST /v1/agents`: register a card under a bearer credential.
pub async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AgentCard>, JsonRejection>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let credential = require_bearer(&headers)?;
    let Json(card) = body.map_err(invalid_body)?;
    validate_card(&card).map_err(AgoraError::from)?;

    let registration = state.identity.register(card, &credential)?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// `GET /v1/agents`: discovery with cursor pagination.
pub async fn search_agents(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchPage>, ApiError> {
    let params = validate_query(&query).map_err(AgoraError::from)?;
    Ok(Json(state.identity.search(&params)?))
}

/// `GET /v1/agents/{id}`: fetch one published card.
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentCard>, ApiError> {
    let stored = state
        .identity
        .get(&agent_id)?
        .ok_or_else(|| AgoraError::NotFound(agent_id))?;
    Ok(Json(stored.card))
}

/// Header that rotates the registration credential during an update.
pub const ROTATE_TOKEN_HEADER: &str = "x-agora-rotate-token";

/// `PUT /v1/agents/{id}`: replace the card, renew the registration.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AgentCard>, JsonRejection>,
) -> Result<Json<Renewal>, ApiError> {
    let credential = require_bearer(&headers)?;
    let Json(card) = body.map_err(invalid_body)?;
    validate_card(&card).map_err(AgoraError::from)?;

    let rotate = headers
        .get(ROTATE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let renewal = state
        .identity
        .update(&agent_id, card, &credential, rotate)?;
    Ok(Json(renewal))
}

/// `DELETE /v1/agents/{id}`: deregister.
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let credential = require_bearer(&headers)?;
    state.identity.delete(&agent_id, &credential)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Response body for a queued relay submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayAccepted {
    /// Server-assigned entry id.
    pub relay_id: String,
    /// Always `"queued"`.
    pub status: String,
}

/// `POST /v1/relay`: submit a message for store-and-forward delivery.
///
/// The body is kept verbatim (signature included) so the recipient can
/// verify exactly the bytes-equivalent structure the sender signed; the
/// relay itself never verifies message signatures; that is an end-to-end
/// property between the agents.
pub async fn submit_relay(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<RelayAccepted>), ApiError> {
    let sender = authenticate_agent(&state, &headers)?;
    let Json(raw) = body.map_err(invalid_body)?;

    let message: Message = serde_json::from_value(raw.clone())
        .map_err(|e| AgoraError::InvalidMessage(e.to_string()))?;
    validate_message(&message).map_err(AgoraError::from)?;

    if message.from != sender {
        return Err(AgoraError::Unauthorized(format!(
            "message.from {:?} does not match the authenticated sender",
            message.from
        ))
        .into());
    }

    let recipient = state
        .identity
        .get(&message.to)?
        .ok_or_else(|| AgoraError::AgentUnavailable(message.to.clone()))?;

    // Admission is the recipient's policy; the relay enforces it on the
    // recipient's behalf. Pending-approval admission still queues; the
    // deferred reply is the receiving handler's concern.
    if resolve_admission(&recipient.card, &sender) == Admission::Rejected {
        return Err(AgoraError::OwnerRejected(format!(
            "{:?} does not accept messages from {sender:?}",
            message.to
        ))
        .into());
    }

    let entry = state.relay.enqueue(
        &message.conversation_id,
        &message.from,
        &message.to,
        &message.intent,
        raw,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(RelayAccepted {
            relay_id: entry.relay_id,
            status: "queued".to_string(),
        }),
    ))
}

/// Query parameters for relay polling.
#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    /// Restrict to one conversation.
    pub conversation: Option<String>,
    /// Page size; same defaults and bounds as discovery.
    pub limit: Option<u32>,
}

/// One queued message as returned to a poller.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Entry id to acknowledge after processing.
    pub relay_id: String,
    /// The verbatim message body, signature included.
    pub message: Value,
    /// When the entry was queued.
    pub created_at: DateTime<Utc>,
}

/// Response body for a relay poll.
#[derive(Debug, Serialize, Deserialize)]
pub struct PollResponse {
    /// Undelivered messages, oldest first.
    pub messages: Vec<QueuedMessage>,
}

/// `GET /v1/relay`: fetch undelivered messages for the authenticated agent.
pub async fn poll_relay(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, ApiError> {
    let agent_id = authenticate_agent(&state, &headers)?;
    let params = validate_query(&SearchQuery {
        limit: query.limit,
        ..Default::default()
    })
    .map_err(AgoraError::from)?;

    let entries = state
        .relay
        .poll(&agent_id, query.conversation.as_deref(), params.limit)?;
    let messages = entries
        .into_iter()
        .map(|e| QueuedMessage {
            relay_id: e.relay_id,
            message: e.message,
            created_at: e.created_at,
        })
        .collect();
    Ok(Json(PollResponse { messages }))
}

/// Response body for an acknowledgment.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    /// Always `"acknowledged"`.
    pub status: String,
}

/// `POST /v1/relay/{id}/ack`: mark a queued message delivered.
pub async fn acknowledge_relay(
    State(state): State<AppState>,
    Path(relay_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AckResponse>, ApiError> {
    let agent_id = authenticate_agent(&state, &headers)?;
    if state.relay.acknowledge(&relay_id, &agent_id)? {
        Ok(Json(AckResponse {
            status: "acknowledged".to_string(),
        }))
    } else {
        Err(AgoraError::NotFound(relay_id).into())
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    AgoraError::InvalidMessage(rejection.body_text()).into()
}
