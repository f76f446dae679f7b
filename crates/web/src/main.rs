mod metrics;
mod models;
mod queries;

use anyhow::Result;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use common::store::{SqliteStore, Store};
use common::time::{self, Clock, SystemClock};
use common::types::{ActivityEntry, LeaderboardKind};
use metrics_exporter_prometheus::PrometheusHandle;
use models::{
    Cohort, CollectionSummary, DailySummary, FunnelView, Leaderboard, Period, StatsSummary,
    WalletSummary,
};
use queries::FunnelScope;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

pub struct AppState<S> {
    pub store: Arc<S>,
    pub clock: Arc<dyn Clock>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// `None` in tests; `/metrics` then answers 404.
    pub prometheus: Option<PrometheusHandle>,
}

type ApiResult<T> = Result<Json<T>, StatusCode>;

/// Log a failed store read and collapse it to a 500.
fn internal(err: &anyhow::Error) -> StatusCode {
    tracing::error!(error = %err, "store read failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn check_date(date: &str) -> Result<(), StatusCode> {
    time::parse_day(date)
        .map(|_day| ())
        .map_err(|_invalid| StatusCode::BAD_REQUEST)
}

#[derive(Debug, Default, Deserialize)]
struct LeaderboardParams {
    period: Option<String>,
    limit: Option<usize>,
}

async fn leaderboard<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(kind): Path<String>,
    Query(params): Query<LeaderboardParams>,
) -> ApiResult<Leaderboard> {
    let kind: LeaderboardKind = kind.parse().map_err(|_unknown| StatusCode::BAD_REQUEST)?;
    let period = Period::parse(params.period.as_deref()).ok_or(StatusCode::BAD_REQUEST)?;
    if period == Period::Week && !kind.has_weekly() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let week = time::week_key(state.clock.now());
    let limit = clamp_limit(params.limit, DEFAULT_LIMIT);

    queries::leaderboard(&*state.store, kind, period, &week, limit)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

async fn wallet<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(address): Path<String>,
) -> ApiResult<WalletSummary> {
    let address = address.to_lowercase();
    let week = time::week_key(state.clock.now());
    queries::wallet_summary(&*state.store, &address, &week)
        .await
        .map_err(|e| internal(&e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn collection<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(slug): Path<String>,
) -> ApiResult<CollectionSummary> {
    queries::collection_summary(&*state.store, &slug)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

async fn cohort<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
) -> ApiResult<Cohort> {
    check_date(&date)?;
    queries::cohort(&*state.store, &date)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

async fn daily<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
) -> ApiResult<DailySummary> {
    check_date(&date)?;
    queries::daily(&*state.store, &date)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

#[derive(Debug, Default, Deserialize)]
struct FunnelParams {
    collection: Option<String>,
    date: Option<String>,
}

/// `collection` wins over `date`; neither means the global funnel.
async fn funnel<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<FunnelParams>,
) -> ApiResult<FunnelView> {
    let scope = match (params.collection, params.date) {
        (Some(slug), _) => FunnelScope::Collection(slug),
        (None, Some(date)) => {
            check_date(&date)?;
            FunnelScope::Daily(date)
        }
        (None, None) => FunnelScope::Global,
    };
    queries::funnel(&*state.store, scope)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

#[derive(Debug, Default, Deserialize)]
struct ActivityParams {
    collection: Option<String>,
    limit: Option<usize>,
}

async fn activity<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ActivityParams>,
) -> ApiResult<Vec<ActivityEntry>> {
    let limit = clamp_limit(params.limit, queries::RECENT_LIMIT);
    queries::activity(&*state.store, params.collection.as_deref(), limit)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

async fn stats<S: Store>(State(state): State<Arc<AppState<S>>>) -> ApiResult<StatsSummary> {
    queries::global_stats(&*state.store)
        .await
        .map(Json)
        .map_err(|e| internal(&e))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}

async fn prometheus_metrics<S: Store>(State(state): State<Arc<AppState<S>>>) -> Response {
    let Some(handle) = state.prometheus.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    handle.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}

async fn count_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let response = next.run(request).await;
    metrics::record_request(&endpoint, response.status());
    response
}

pub fn create_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/api/leaderboard/{kind}", get(leaderboard::<S>))
        .route("/api/wallet/{address}", get(wallet::<S>))
        .route("/api/collection/{slug}", get(collection::<S>))
        .route("/api/cohorts/{date}", get(cohort::<S>))
        .route("/api/daily/{date}", get(daily::<S>))
        .route("/api/funnel", get(funnel::<S>))
        .route("/api/activity", get(activity::<S>))
        .route("/api/stats", get(stats::<S>))
        .route("/api/health", get(health::<S>))
        .route("/metrics", get(prometheus_metrics::<S>))
        .route_layer(middleware::from_fn(count_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("web", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SqliteStore::open(&config.database.path, Arc::clone(&clock)).await?);
    let prometheus = metrics::init_global()?;

    let web_port = config.web.as_ref().map_or(8090, |w| w.port);
    let web_host = config
        .web
        .as_ref()
        .map_or("0.0.0.0".to_string(), |w| w.host.clone());

    let state = Arc::new(AppState {
        store,
        clock,
        started_at: chrono::Utc::now(),
        prometheus: Some(prometheus),
    });

    let app = create_router(state);
    let addr: SocketAddr = format!("{web_host}:{web_port}").parse()?;
    tracing::info!(%addr, "read API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use common::keys;
    use common::store::Batch;
    use common::time::FixedClock;
    use tower::ServiceExt;

    const WALLET: &str = "0x00000000000000000000000000000000000000aa";
    const OTHER: &str = "0x00000000000000000000000000000000000000bb";

    async fn test_app() -> (Router, Arc<SqliteStore>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date("2025-01-01").unwrap());
        let store = Arc::new(SqliteStore::open_memory(Arc::clone(&clock)).await.unwrap());
        let state = Arc::new(AppState {
            store: Arc::clone(&store),
            clock,
            started_at: chrono::Utc::now(),
            prometheus: None,
        });
        (create_router(state), store)
    }

    async fn seed(store: &SqliteStore) {
        let mut batch = Batch::new();
        batch
            .zincr(keys::leaderboard(LeaderboardKind::Mints), WALLET, 3.0)
            .zincr(keys::leaderboard(LeaderboardKind::Mints), OTHER, 5.0)
            .zincr(
                keys::weekly_leaderboard("2025-W01", LeaderboardKind::Mints),
                WALLET,
                1.0,
            )
            .hincr(keys::wallet_profile(WALLET), "total_mints", 3)
            .hincr(keys::wallet_profile(WALLET), "total_points", 42)
            .lpush_capped(
                keys::journey(WALLET),
                r#"{"type":"mint_success","collection":"genesis","timestamp":1735732800000}"#,
                keys::JOURNEY_CAP,
            )
            .sadd(keys::cohort("2025-01-01"), OTHER)
            .sadd(keys::cohort("2025-01-01"), WALLET)
            .hincr(keys::daily_stats("2025-01-01"), "events", 4)
            .hincr(keys::daily_stats("2025-01-01"), "type:page_view", 4)
            .hincr(keys::hourly_stats("2025-01-01"), "12", 4)
            .hincr(keys::GLOBAL_FUNNEL, "page_view", 10)
            .hincr(keys::GLOBAL_FUNNEL, "wallet_connect", 4)
            .hincr(keys::collection_stats("genesis"), "mints", 2)
            .sadd(keys::collection_minters("genesis"), WALLET)
            .hincr(keys::GLOBAL_STATS, "total_events", 4)
            .sadd(keys::CONNECTED_WALLETS, WALLET)
            .lpush_capped(
                keys::GLOBAL_FEED,
                format!(
                    r#"{{"wallet":"{WALLET}","collection":"genesis","price":0.01,"gas":0.0,"timestamp":1}}"#
                ),
                keys::GLOBAL_FEED_CAP,
            );
        store.commit(batch).await.unwrap();
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 65536)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(get_req(uri)).await.unwrap();
        let status = response.status();
        if status != StatusCode::OK {
            return (status, serde_json::Value::Null);
        }
        (status, json_body(response).await)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _store) = test_app().await;
        let (status, json) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_leaderboard_orders_by_score() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app, "/api/leaderboard/mints").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["kind"], "mints");
        assert_eq!(json["period"], "all");
        let entries = json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["wallet"], OTHER);
        assert_eq!(entries[0]["rank"], 1);
        assert_eq!(entries[1]["wallet"], WALLET);
    }

    #[tokio::test]
    async fn test_weekly_leaderboard_uses_current_week() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app, "/api/leaderboard/mints?period=week").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["week"], "2025-W01");
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_rejects_bad_input() {
        let (app, _store) = test_app().await;
        let (status, _) = get_json(app.clone(), "/api/leaderboard/karma").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(app.clone(), "/api/leaderboard/volume?period=week").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(app, "/api/leaderboard/mints?period=month").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_leaderboard_limit_is_clamped() {
        let (app, store) = test_app().await;
        seed(&store).await;
        let (_, json) = get_json(app, "/api/leaderboard/mints?limit=1").await;
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);
        assert_eq!(clamp_limit(Some(0), DEFAULT_LIMIT), 1);
        assert_eq!(clamp_limit(Some(5000), DEFAULT_LIMIT), MAX_LIMIT);
        assert_eq!(clamp_limit(None, DEFAULT_LIMIT), DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn test_wallet_summary() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let uri = format!("/api/wallet/{}", WALLET.to_uppercase().replace("0X", "0x"));
        let (status, json) = get_json(app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["address"], WALLET);
        assert_eq!(json["profile"]["total_mints"], 3);
        assert_eq!(json["profile"]["total_points"], 42);
        assert_eq!(json["ranks"]["mints"], 2);
        assert!(json["ranks"]["volume"].is_null());
        assert_eq!(json["weekly_ranks"]["mints"], 1);
        assert_eq!(json["journey"][0]["type"], "mint_success");
    }

    #[tokio::test]
    async fn test_unknown_wallet_is_not_found() {
        let (app, _store) = test_app().await;
        let (status, _) = get_json(app, &format!("/api/wallet/{OTHER}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_collection_summary() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app, "/api/collection/genesis").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stats"]["mints"], 2);
        assert_eq!(json["unique_minters"], 1);
        assert_eq!(json["funnel"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_cohort_lists_members() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app.clone(), "/api/cohorts/2025-01-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["size"], 2);
        assert_eq!(json["wallets"][0], WALLET);

        let (status, _) = get_json(app, "/api/cohorts/yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_daily_summary() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app, "/api/daily/2025-01-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["totals"]["events"], 4.0);
        assert_eq!(json["by_type"]["page_view"], 4);
        let hourly = json["hourly"].as_array().unwrap();
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly[12]["events"], 4);
        assert_eq!(hourly[0]["events"], 0);
    }

    #[tokio::test]
    async fn test_global_funnel_conversion() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app.clone(), "/api/funnel").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scope"], "global");
        let stages = json["stages"].as_array().unwrap();
        assert_eq!(stages[0]["step"], "page_view");
        assert!(stages[0]["conversion_pct"].is_null());
        assert_eq!(stages[1]["conversion_pct"], 40.0);

        let (_, json) = get_json(app, "/api/funnel?collection=genesis").await;
        assert_eq!(json["scope"], "collection:genesis");
    }

    #[tokio::test]
    async fn test_activity_and_stats() {
        let (app, store) = test_app().await;
        seed(&store).await;

        let (status, json) = get_json(app.clone(), "/api/activity").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["collection"], "genesis");

        let (status, json) = get_json(app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_events"], 4);
        assert_eq!(json["connected_wallets"], 1);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_not_found() {
        let (app, _store) = test_app().await;
        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
