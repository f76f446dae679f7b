use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "mintpulse_events_total",
        "Tracked events by type and outcome (accepted, duplicate, or rejection reason)."
    );
    describe_counter!(
        "mintpulse_chain_verify_total",
        "Mint transaction checks by result (valid, fail_open, invalid)."
    );
    describe_counter!(
        "mintpulse_points_awarded_total",
        "Points granted to wallets, by reason."
    );
    describe_counter!(
        "mintpulse_sweep_deleted_keys_total",
        "Keys removed by retention sweeps."
    );
    describe_histogram!(
        "mintpulse_store_op_latency_ms",
        "Store call latency in milliseconds."
    );
    describe_counter!(
        "mintpulse_store_op_errors_total",
        "Store calls that returned an error."
    );
    describe_counter!(
        "tracing_error_events",
        "ERROR-level log events emitted by the process."
    );
}

/// Install the global recorder and spawn the `/metrics` listener on the current runtime.
pub fn install_prometheus(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::{FakeChain, WALLET};
    use crate::chain::ChainVerifier;
    use std::time::Duration;

    #[test]
    fn test_prometheus_handle_renders_metric_names() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        describe();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("mintpulse_events_total", "type" => "page_view", "outcome" => "accepted")
                .increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("mintpulse_events_total"));
        assert!(rendered.contains(r#"outcome="accepted""#));
    }

    #[test]
    fn test_chain_verification_is_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        metrics::with_local_recorder(&recorder, || {
            let verifier = ChainVerifier::new(Some(FakeChain::default()), Duration::from_secs(1));
            runtime.block_on(verifier.verify("0xdead", WALLET));
        });

        let rendered = handle.render();
        assert!(rendered.contains("mintpulse_chain_verify_total"));
        assert!(rendered.contains(r#"result="fail_open""#));
    }
}
