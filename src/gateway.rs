//! The poll loop.
//!
//! [`Gateway::tick`] performs one iteration: poll the radio, relay what was
//! heard, repair the APRS-IS session, drain its inbound lines, then run any
//! periodic work that is due. [`Gateway::run`] calls it at a fixed cadence
//! until shutdown.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::aprs_is::Session;
use crate::battery::BatteryMonitor;
use crate::beacon::{Beacon, Periodic, Telemetry};
use crate::radio::Radio;
use crate::relay::{RelayEngine, RelayStats};

/// Upper bound on APRS-IS lines handled per tick
pub const MAX_LINES_PER_TICK: usize = 64;

/// Battery telemetry source and schedule
pub struct TelemetrySchedule {
    pub telemetry: Telemetry,
    pub battery: Box<dyn BatteryMonitor>,
    pub timer: Periodic,
}

pub struct Gateway {
    radio: Box<dyn Radio>,
    session: Session,
    engine: RelayEngine,
    beacon: Option<(Beacon, Periodic)>,
    telemetry: Option<TelemetrySchedule>,
    status: Periodic,
    started_at: Instant,
}

impl Gateway {
    pub fn new(radio: Box<dyn Radio>, session: Session, engine: RelayEngine, started_at: Instant) -> Self {
        Self {
            radio,
            session,
            engine,
            beacon: None,
            telemetry: None,
            status: Periodic::new(Duration::from_secs(30)),
            started_at,
        }
    }

    pub fn with_beacon(mut self, beacon: Beacon, interval: Duration) -> Self {
        self.beacon = Some((beacon, Periodic::new(interval)));
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySchedule) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status = Periodic::new(interval);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> RelayStats {
        self.engine.stats()
    }

    /// One poll-loop iteration at time `now`
    pub async fn tick(&mut self, now: Instant) {
        self.poll_radio(now).await;

        let was_established = self.session.is_established();
        self.session.maintain(now).await;
        if self.session.is_established() && !was_established {
            // Fresh session: announce ourselves right away
            if let Some((_, timer)) = self.beacon.as_mut() {
                timer.reset();
            }
        }

        self.drain_internet(now).await;
        self.run_periodic(now).await;
    }

    async fn poll_radio(&mut self, now: Instant) {
        match self.radio.try_receive().await {
            Ok(Some(raw)) => {
                self.engine
                    .relay_radio_frame(&raw, now, self.radio.as_mut(), &mut self.session)
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Radio receive failed: {}", e);
                metrics::counter!("loragate.radio.receive_error_total").increment(1);
            }
        }
    }

    async fn drain_internet(&mut self, now: Instant) {
        for _ in 0..MAX_LINES_PER_TICK {
            let Some(line) = self.session.poll_line(now).await else {
                break;
            };
            self.engine
                .relay_internet_line(&line, self.radio.as_mut())
                .await;
        }
    }

    async fn run_periodic(&mut self, now: Instant) {
        let uptime = now.saturating_duration_since(self.started_at);

        if self.session.is_established() {
            if let Some((beacon, timer)) = self.beacon.as_mut()
                && timer.is_due(now)
            {
                let line = beacon.line();
                match self.session.send_line(&line, now).await {
                    Ok(()) => {
                        info!("Beacon sent: {}", line.trim_end());
                        metrics::counter!("loragate.beacon.sent_total").increment(1);
                    }
                    Err(e) => warn!("Failed to send beacon: {}", e),
                }
                timer.mark(now);
            }

            if let Some(schedule) = self.telemetry.as_mut()
                && schedule.timer.is_due(now)
            {
                schedule.timer.mark(now);
                match schedule.battery.read_volts() {
                    Some(volts) => {
                        let line = schedule.telemetry.next_line(volts);
                        match self.session.send_line(&line, now).await {
                            Ok(()) => {
                                info!("Telemetry sent: {}", line.trim_end());
                                metrics::counter!("loragate.telemetry.sent_total").increment(1);
                            }
                            Err(e) => warn!("Failed to send telemetry: {}", e),
                        }
                    }
                    None => warn!("No battery reading, skipping telemetry"),
                }
            }

            self.session.keepalive(now, uptime).await;
        }

        if self.status.is_due(now) {
            self.status.mark(now);
            let stats = self.engine.stats();
            info!(
                "Status: aprs_is={}, uptime={}s, rx={}, dup={}, digi={}, to_is={}, from_is={}, to_rf={}",
                self.session.state().as_str(),
                uptime.as_secs(),
                stats.radio_received,
                stats.duplicates,
                stats.digipeated,
                stats.sent_to_internet,
                stats.received_from_internet,
                stats.sent_to_radio
            );
        }
    }

    /// Tick at `cadence` until `shutdown` resolves, then close the session
    pub async fn run<F>(&mut self, cadence: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Gateway running as {} (tick every {}ms)",
            self.engine.own_callsign(),
            cadence.as_millis()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping gateway");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }

        self.session.teardown();
    }
}
