use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn describe() {
    describe_gauge!(
        "mintpulse_web_build_info",
        "Build info for the read API (value is always 1)."
    );
    describe_counter!(
        "mintpulse_web_requests_total",
        "Read API requests by endpoint and status class."
    );
}

/// Install the global Prometheus recorder once and return a handle for rendering `/metrics`.
///
/// Upkeep runs on each `/metrics` scrape.
pub fn init_global() -> Result<PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle.clone());
    }

    describe();
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|err| anyhow::anyhow!("installing prometheus recorder: {err}"))?;
    let handle = PROM_HANDLE.get_or_init(|| handle).clone();

    let git_sha = std::env::var("GIT_SHA").unwrap_or_else(|_unset| "unknown".to_string());
    metrics::gauge!(
        "mintpulse_web_build_info",
        "version" => env!("CARGO_PKG_VERSION"),
        "git_sha" => git_sha,
    )
    .set(1.0);

    Ok(handle)
}

/// Count one served request under its route pattern.
pub fn record_request(endpoint: &str, status: axum::http::StatusCode) {
    let class = match status.as_u16() {
        200..=299 => "2xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    metrics::counter!(
        "mintpulse_web_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => class,
    )
    .increment(1);
}
