//! Battery voltage sources for telemetry.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Something that can report the supply voltage
pub trait BatteryMonitor: Send {
    /// Current voltage in volts, or `None` when no reading is available
    fn read_volts(&mut self) -> Option<f64>;
}

/// Constant voltage from configuration
#[derive(Debug, Clone, Copy)]
pub struct FixedBattery(pub f64);

impl BatteryMonitor for FixedBattery {
    fn read_volts(&mut self) -> Option<f64> {
        Some(self.0)
    }
}

/// Linux power-supply class device (`/sys/class/power_supply/<name>`)
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    voltage_now: PathBuf,
}

impl SysfsBattery {
    pub fn new(device_dir: impl AsRef<Path>) -> Self {
        Self {
            voltage_now: device_dir.as_ref().join("voltage_now"),
        }
    }
}

impl BatteryMonitor for SysfsBattery {
    fn read_volts(&mut self) -> Option<f64> {
        // voltage_now is reported in microvolts
        match std::fs::read_to_string(&self.voltage_now) {
            Ok(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .map(|microvolts| microvolts / 1_000_000.0),
            Err(e) => {
                debug!("Failed to read {:?}: {}", self.voltage_now, e);
                None
            }
        }
    }
}
