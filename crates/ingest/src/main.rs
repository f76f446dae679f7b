use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::store::SqliteStore;
use common::time::{Clock, SystemClock};

mod api;
mod chain;
mod cleanup;
mod cli;
mod dispatch;
mod error;
mod idempotency;
mod metrics;
mod rate_limit;
mod scoring;
mod service;
#[cfg(test)]
mod test_support;
mod validate;
mod wallet_tracker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("ingest", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!("mintpulse ingest starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(SqliteStore::open(&config.database.path, Arc::clone(&clock)).await?);

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    if cmd != cli::Command::Run {
        let sweeper = cleanup::Sweeper::new(
            Arc::clone(&store),
            config.retention.clone(),
            config.cleanup.sweep_probability,
        );
        cli::run_command(&*store, &sweeper, &*clock, cmd).await?;
        return Ok(());
    }

    metrics::install_prometheus(config.observability.prometheus_port)?;
    metrics::describe();

    let chain_client = if config.chain.enabled {
        Some(chain::RpcChainClient::new(
            &config.chain.rpc_url,
            Duration::from_millis(config.chain.timeout_ms),
        )?)
    } else {
        tracing::warn!("chain verification disabled; mint events are accepted unchecked");
        None
    };

    let service = service::IngestService::new(store, chain_client, clock, &config);
    let state = Arc::new(api::AppState {
        service,
        started_at: chrono::Utc::now(),
    });
    let app = api::router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting ingest HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
