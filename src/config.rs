use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aprs_is::{AprsIsConfig, AprsIsConfigBuilder, DEFAULT_CLIENT_ID};
use crate::battery::{BatteryMonitor, FixedBattery, SysfsBattery};
use crate::beacon::Beacon;
use crate::relay::RelaySettings;

/// Station identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub callsign: String,
    /// APRS-IS passcode; omitted means receive-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
}

/// APRS-IS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AprsIsSection {
    #[serde(default = "default_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_server() -> String {
    "noam.aprs2.net".to_string()
}

fn default_port() -> u16 {
    14580
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_reconnect_interval() -> u64 {
    30
}

fn default_inactivity_timeout() -> u64 {
    120
}

fn default_ping_interval() -> u64 {
    60
}

impl Default for AprsIsSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            filter: None,
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            reconnect_interval_secs: default_reconnect_interval(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

/// UDP bridge to the LoRa modem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSection {
    #[serde(default = "default_radio_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_radio_modem")]
    pub modem: SocketAddr,
}

fn default_radio_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10001))
}

fn default_radio_modem() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10002))
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            listen: default_radio_listen(),
            modem: default_radio_modem(),
        }
    }
}

/// Position beacon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconSection {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "default_beacon_interval")]
    pub interval_secs: u64,
}

fn default_beacon_interval() -> u64 {
    120
}

/// Battery telemetry; `sysfs_device` wins over `fixed_volts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default = "default_telemetry_interval")]
    pub interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysfs_device: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_volts: Option<f64>,
}

fn default_telemetry_interval() -> u64 {
    600
}

/// Forwarding switches and duplicate filter tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_true")]
    pub digipeat: bool,
    #[serde(default = "default_true")]
    pub internet_to_radio: bool,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// Poll loop cadence
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// How often to log a status line
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_dedup_capacity() -> usize {
    crate::dedup::DEFAULT_CAPACITY
}

fn default_dedup_window() -> u64 {
    crate::dedup::DEFAULT_WINDOW.as_secs()
}

fn default_tick_ms() -> u64 {
    100
}

fn default_status_interval() -> u64 {
    30
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            digipeat: true,
            internet_to_radio: true,
            dedup_capacity: default_dedup_capacity(),
            dedup_window_secs: default_dedup_window(),
            tick_ms: default_tick_ms(),
            status_interval_secs: default_status_interval(),
        }
    }
}

/// Top-level gateway configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub station: StationConfig,
    #[serde(default)]
    pub aprs_is: AprsIsSection,
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon: Option<BeaconSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySection>,
    #[serde(default)]
    pub relay: RelaySection,
    /// Prometheus exporter port; no exporter when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl GatewayConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        let callsign = self.station.callsign.trim();
        if callsign.is_empty() {
            bail!("station.callsign must not be empty");
        }
        if callsign.contains(['>', ',', ':', '*', ' ']) {
            bail!("station.callsign {:?} contains a reserved character", callsign);
        }
        if let Some(beacon) = &self.beacon {
            if !(-90.0..=90.0).contains(&beacon.latitude) {
                bail!("beacon.latitude {} is out of range", beacon.latitude);
            }
            if !(-180.0..=180.0).contains(&beacon.longitude) {
                bail!("beacon.longitude {} is out of range", beacon.longitude);
            }
            if beacon.interval_secs == 0 {
                bail!("beacon.interval_secs must be positive");
            }
        }
        if let Some(telemetry) = &self.telemetry
            && telemetry.interval_secs == 0
        {
            bail!("telemetry.interval_secs must be positive");
        }
        if self.relay.tick_ms == 0 {
            bail!("relay.tick_ms must be positive");
        }
        if self.relay.dedup_capacity == 0 {
            bail!("relay.dedup_capacity must be positive");
        }
        if self.aprs_is.ping_interval_secs == 0 || self.aprs_is.reconnect_interval_secs == 0 {
            bail!("aprs_is intervals must be positive");
        }
        Ok(())
    }

    /// Session configuration for the APRS-IS side
    pub fn aprs_is_config(&self) -> AprsIsConfig {
        let section = &self.aprs_is;
        AprsIsConfigBuilder::new()
            .server(section.server.clone())
            .port(section.port)
            .callsign(self.station.callsign.clone())
            .passcode(self.station.passcode.clone())
            .filter(section.filter.clone())
            .client_id(section.client_id.clone())
            .connect_timeout(Duration::from_secs(section.connect_timeout_secs))
            .auth_timeout(Duration::from_secs(section.auth_timeout_secs))
            .reconnect_interval(Duration::from_secs(section.reconnect_interval_secs))
            .inactivity_timeout(Duration::from_secs(section.inactivity_timeout_secs))
            .ping_interval(Duration::from_secs(section.ping_interval_secs))
            .build()
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            own_callsign: self.station.callsign.clone(),
            digipeat: self.relay.digipeat,
            internet_to_radio: self.relay.internet_to_radio,
            dedup_capacity: self.relay.dedup_capacity,
            dedup_window: Duration::from_secs(self.relay.dedup_window_secs),
        }
    }

    /// Position beacon for this station, with its interval
    pub fn station_beacon(&self) -> Option<(Beacon, Duration)> {
        self.beacon.as_ref().map(|section| {
            let beacon = Beacon {
                callsign: self.station.callsign.clone(),
                latitude: section.latitude,
                longitude: section.longitude,
                comment: section.comment.clone(),
            };
            (beacon, Duration::from_secs(section.interval_secs))
        })
    }

    /// Voltage source for telemetry; `None` when no source is configured
    pub fn battery_monitor(&self) -> Option<Box<dyn BatteryMonitor>> {
        let section = self.telemetry.as_ref()?;
        match (&section.sysfs_device, section.fixed_volts) {
            (Some(device), _) => Some(Box::new(SysfsBattery::new(device))),
            (None, Some(volts)) => Some(Box::new(FixedBattery(volts))),
            (None, None) => None,
        }
    }

    pub fn telemetry_interval(&self) -> Option<Duration> {
        self.telemetry
            .as_ref()
            .map(|section| Duration::from_secs(section.interval_secs))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.relay.tick_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.relay.status_interval_secs)
    }
}

/// Resolve the gateway config file path.
///
/// Priority:
/// 1. `LORAGATE_CONFIG` env var
/// 2. `/etc/loragate/gateway.toml` (production)
/// 3. `./gateway.toml` (development)
pub fn gateway_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LORAGATE_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("LORAGATE_ENV").as_deref() {
        Ok("production") => PathBuf::from("/etc/loragate/gateway.toml"),
        _ => PathBuf::from("./gateway.toml"),
    }
}
