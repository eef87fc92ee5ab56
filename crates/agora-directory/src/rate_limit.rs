//! Cost-aware rate limiting using GCRA (Generic Cell Rate Algorithm).
//!
//! Each API operation has a token cost: cheap reads cost little, writes
//! that allocate storage cost more. The keyed limiter budgets tokens per
//! minute per client IP.

use agora_types::{AgoraError, ErrorBody};
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::middleware::Next;
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Token cost of one operation.
pub fn operation_cost(method: &str, path: &str) -> NonZeroU32 {
    match (method, path) {
        (_, "/health") => NonZeroU32::new(1).unwrap(),
        ("GET", "/v1/agents") => NonZeroU32::new(2).unwrap(),
        ("GET", p) if p.starts_with("/v1/agents/") => NonZeroU32::new(1).unwrap(),
        ("POST", "/v1/agents") => NonZeroU32::new(20).unwrap(),
        ("PUT", p) if p.starts_with("/v1/agents/") => NonZeroU32::new(10).unwrap(),
        ("DELETE", p) if p.starts_with("/v1/agents/") => NonZeroU32::new(5).unwrap(),
        ("POST", "/v1/relay") => NonZeroU32::new(10).unwrap(),
        ("GET", "/v1/relay") => NonZeroU32::new(2).unwrap(),
        ("POST", p) if p.ends_with("/ack") => NonZeroU32::new(1).unwrap(),
        _ => NonZeroU32::new(5).unwrap(),
    }
}

pub type KeyedRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Build the per-IP limiter with a per-minute token budget.
pub fn create_rate_limiter(tokens_per_minute: u32) -> Arc<KeyedRateLimiter> {
    let quota = NonZeroU32::new(tokens_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_minute(quota)))
}

/// GCRA rate limiting middleware.
///
/// Extracts the client IP from `ConnectInfo`, computes the cost for the
/// requested operation, and checks the limiter. Exhausted budgets get a
/// 429 with the standard error body and a retry-after hint.
pub async fn gcra_rate_limit(
    axum::extract::State(limiter): axum::extract::State<Arc<KeyedRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let cost = operation_cost(&method, &path);

    // Not conformant, or cost beyond the whole burst capacity: both deny.
    if !matches!(limiter.check_key_n(&ip, cost), Ok(Ok(()))) {
        tracing::warn!(ip = %ip, cost = cost.get(), path = %path, "GCRA rate limit exceeded");
        let body = ErrorBody::from_error(&AgoraError::RateLimited);
        return Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("content-type", "application/json")
            .header("retry-after", "60")
            .body(Body::from(
                serde_json::to_string(&body).unwrap_or_default(),
            ))
            .unwrap_or_default();
    }

    next.run(request).await
}
