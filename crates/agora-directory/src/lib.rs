//! Agora directory and relay HTTP service.
//!
//! Composes the identity store and relay queue behind the `/v1` REST
//! surface:
//!
//! - `POST /v1/agents` register, `GET /v1/agents` discover,
//!   `GET/PUT/DELETE /v1/agents/{id}` fetch/renew/deregister
//! - `POST /v1/relay` submit, `GET /v1/relay` poll,
//!   `POST /v1/relay/{id}/ack` acknowledge
//! - `GET /health`
//!
//! Each request is an isolated operation against the shared stores; no
//! handler holds a lock across an await. Sender authentication is bearer
//! token only; the server persists and compares credential hashes, never
//! raw credentials.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;

pub use config::{load_config, DirectoryConfig, StoreBackend};

use agora_store::{IdentityStore, MemStore, RelayQueue, SqliteStore};
use agora_types::AgoraResult;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Agent registrations.
    pub identity: Arc<dyn IdentityStore>,
    /// Store-and-forward queue.
    pub relay: Arc<dyn RelayQueue>,
}

impl AppState {
    /// State over the in-memory backend.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemStore::new());
        Self {
            identity: store.clone(),
            relay: store,
        }
    }

    /// State over a SQLite database at `path`.
    pub fn sqlite(path: &str) -> AgoraResult<Self> {
        let store = Arc::new(SqliteStore::open(path)?);
        Ok(Self {
            identity: store.clone(),
            relay: store,
        })
    }

    /// Build state for the configured backend.
    pub fn from_config(config: &DirectoryConfig) -> AgoraResult<Self> {
        match config.store {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::Sqlite => Self::sqlite(&config.db_path),
        }
    }
}

/// Build the full router with middleware.
pub fn router(state: AppState, rate_limit_per_minute: u32) -> Router {
    let limiter = rate_limit::create_rate_limiter(rate_limit_per_minute);
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/v1/agents",
            post(routes::register_agent).get(routes::search_agents),
        )
        .route(
            "/v1/agents/{id}",
            get(routes::get_agent)
                .put(routes::update_agent)
                .delete(routes::delete_agent),
        )
        .route(
            "/v1/relay",
            post(routes::submit_relay).get(routes::poll_relay),
        )
        .route("/v1/relay/{id}/ack", post(routes::acknowledge_relay))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            rate_limit::gcra_rate_limit,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    config: DirectoryConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let app = router(state, config.rate_limit_per_minute);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, store = ?config.store, "Directory listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_backend_selection() {
        let memory = DirectoryConfig {
            store: StoreBackend::Memory,
            ..Default::default()
        };
        assert!(AppState::from_config(&memory).is_ok());
    }
}
