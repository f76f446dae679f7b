use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use common::store::Store;

use crate::chain::ChainClient;
use crate::error::TrackError;
use crate::service::{IngestService, TrackOutcome};
use crate::validate::TrackRequest;

/// Shared application state available to all handlers.
pub struct AppState<S, C> {
    pub service: IngestService<S, C>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Best-known address of the caller, resolved once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

pub fn router<S: Store, C: ChainClient>(state: Arc<AppState<S, C>>) -> Router {
    Router::new()
        .route("/track", post(track::<S, C>))
        .route("/api/health", get(health::<S, C>))
        .layer(middleware::from_fn(client_ip_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// First `X-Forwarded-For` hop, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

async fn client_ip_middleware(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(req.headers(), peer);
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackResponse {
    success: bool,
    event_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    duplicate: bool,
}

async fn track<S: Store, C: ChainClient>(
    State(state): State<Arc<AppState<S, C>>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(request): Json<TrackRequest>,
) -> Result<Json<TrackResponse>, TrackError> {
    let outcome = state.service.track(request, ip.as_deref()).await?;
    Ok(Json(TrackResponse {
        success: true,
        event_id: outcome.event_id().to_string(),
        duplicate: matches!(outcome, TrackOutcome::AlreadyProcessed { .. }),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health<S: Store, C: ChainClient>(
    State(state): State<Arc<AppState<S, C>>>,
) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}
