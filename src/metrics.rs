use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

/// Install the Prometheus recorder.
/// Returns a handle that renders the current metrics for scraping
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Initialize gateway metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_gateway_metrics() {
    // Radio side
    metrics::counter!("loragate.radio.received_total").absolute(0);
    metrics::counter!("loragate.radio.duplicate_total").absolute(0);
    metrics::counter!("loragate.radio.sent_total").absolute(0);
    metrics::counter!("loragate.radio.receive_error_total").absolute(0);
    metrics::counter!("loragate.radio.oversized_total").absolute(0);
    metrics::counter!("loragate.digipeat.sent_total").absolute(0);

    // APRS-IS session
    metrics::gauge!("loragate.aprs_is.connected").set(0.0);
    metrics::counter!("loragate.aprs_is.established_total").absolute(0);
    metrics::counter!("loragate.aprs_is.connection_failed_total").absolute(0);
    metrics::counter!("loragate.aprs_is.server_closed_total").absolute(0);
    metrics::counter!("loragate.aprs_is.inactivity_timeout_total").absolute(0);
    metrics::counter!("loragate.aprs_is.write_error_total").absolute(0);
    metrics::counter!("loragate.aprs_is.keepalive_sent_total").absolute(0);
    metrics::counter!("loragate.aprs_is.oversized_line_total").absolute(0);

    // APRS-IS traffic
    metrics::counter!("loragate.aprs_is.sent_total").absolute(0);
    metrics::counter!("loragate.aprs_is.received_total").absolute(0);
    metrics::counter!("loragate.aprs_is.server_line_total").absolute(0);
    metrics::counter!("loragate.beacon.sent_total").absolute(0);
    metrics::counter!("loragate.telemetry.sent_total").absolute(0);
}

/// Background task updating uptime every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Serve `/metrics` on the given port until the process exits
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let handle = init_metrics()?;

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}
