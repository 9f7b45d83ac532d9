use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tracing::Instrument;
use tracing::{error, info, warn};

use loragate::aprs_is::{Session, TcpConnector};
use loragate::beacon::{Periodic, Telemetry};
use loragate::config::GatewayConfig;
use loragate::gateway::{Gateway, TelemetrySchedule};
use loragate::radio::UdpRadio;
use loragate::relay::RelayEngine;

pub async fn handle_run(
    config_path: &Path,
    callsign: Option<String>,
    passcode: Option<String>,
) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    info!("Loading gateway config from {:?}", config_path);
    let mut config = GatewayConfig::load(config_path)?;
    if let Some(callsign) = callsign {
        config.station.callsign = callsign;
    }
    if passcode.is_some() {
        config.station.passcode = passcode;
    }
    config.validate()?;

    sentry::configure_scope(|scope| {
        scope.set_tag("callsign", &config.station.callsign);
    });

    // Initialize before the exporter starts so every series is present on first scrape
    loragate::metrics::initialize_gateway_metrics();

    if let Some(metrics_port) = config.metrics_port {
        info!("Starting metrics server on port {}", metrics_port);
        tokio::spawn(
            async move {
                if let Err(e) = loragate::metrics::start_metrics_server(metrics_port).await {
                    error!("Metrics server stopped: {:#}", e);
                }
            }
            .instrument(tracing::info_span!("metrics_server")),
        );
    }

    let radio = UdpRadio::bind(config.radio.listen, config.radio.modem)
        .await
        .with_context(|| format!("Failed to bind radio socket on {}", config.radio.listen))?;
    info!(
        "Radio listening on {}, modem at {}",
        config.radio.listen, config.radio.modem
    );

    let aprs_is = config.aprs_is_config();
    info!(
        "APRS-IS server {}:{} as {}",
        aprs_is.server, aprs_is.port, aprs_is.callsign
    );
    let session = Session::new(aprs_is, Box::new(TcpConnector));
    let engine = RelayEngine::new(config.relay_settings());

    let mut gateway = Gateway::new(Box::new(radio), session, engine, Instant::now())
        .with_status_interval(config.status_interval());

    if let Some((beacon, interval)) = config.station_beacon() {
        info!("Beaconing every {}s", interval.as_secs());
        gateway = gateway.with_beacon(beacon, interval);
    }

    if let Some(interval) = config.telemetry_interval() {
        match config.battery_monitor() {
            Some(battery) => {
                info!("Battery telemetry every {}s", interval.as_secs());
                gateway = gateway.with_telemetry(TelemetrySchedule {
                    telemetry: Telemetry::new(config.station.callsign.clone()),
                    battery,
                    timer: Periodic::new(interval),
                });
            }
            None => warn!("[telemetry] has neither sysfs_device nor fixed_volts, disabled"),
        }
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // Spawn signal handler task for both SIGINT and SIGTERM
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(err), _) | (_, Err(err)) => {
                        error!("Failed to register signal handlers: {}", err);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                }
                Err(err) => {
                    error!("Failed to listen for SIGINT signal: {}", err);
                    return;
                }
            }
        }

        let _ = shutdown_tx.send(());
    });

    let tick = config.tick_interval();
    gateway
        .run(tick, async {
            let _ = shutdown_rx.await;
        })
        .await;

    let stats = gateway.stats();
    info!(
        "Gateway stopped: rx={}, digi={}, to_is={}, to_rf={}",
        stats.radio_received, stats.digipeated, stats.sent_to_internet, stats.sent_to_radio
    );
    Ok(())
}
