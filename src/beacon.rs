//! Station beacon and battery telemetry lines sent to APRS-IS.

use std::time::{Duration, Instant};

/// Highest telemetry sequence number before wrapping to 0
pub const TELEMETRY_SEQ_MAX: u16 = 999;

/// Fixed-interval timer driven by the caller's clock
#[derive(Debug, Clone)]
pub struct Periodic {
    interval: Duration,
    last: Option<Instant>,
}

impl Periodic {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Never fired, or a full interval has passed since the last firing
    pub fn is_due(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Forget the last firing so the next check is due immediately
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// `DDMM.MMN` / `DDDMM.MME`: degrees, then minutes rounded to hundredths
fn format_coordinate(value: f64, degree_width: usize, positive: char, negative: char) -> String {
    let hemisphere = if value >= 0.0 { positive } else { negative };
    let hundredths = (value.abs() * 6000.0).round() as u64;
    let degrees = hundredths / 6000;
    let minutes = hundredths % 6000;
    format!(
        "{:0width$}{:02}.{:02}{}",
        degrees,
        minutes / 100,
        minutes % 100,
        hemisphere,
        width = degree_width
    )
}

pub fn format_latitude(lat: f64) -> String {
    format_coordinate(lat, 2, 'N', 'S')
}

pub fn format_longitude(lon: f64) -> String {
    format_coordinate(lon, 3, 'E', 'W')
}

/// Fixed station position and comment
#[derive(Debug, Clone)]
pub struct Beacon {
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub comment: String,
}

impl Beacon {
    /// Position report with the iGate symbol (`/` table, `&`)
    pub fn line(&self) -> String {
        format!(
            "{}>APRS,TCPIP:={}/{}&{}\n",
            self.callsign,
            format_latitude(self.latitude),
            format_longitude(self.longitude),
            self.comment
        )
    }
}

/// Battery telemetry with a wrapping sequence number
#[derive(Debug, Clone)]
pub struct Telemetry {
    callsign: String,
    sequence: u16,
}

impl Telemetry {
    pub fn new(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            sequence: 0,
        }
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Telemetry line for `volts`; advances the sequence
    pub fn next_line(&mut self, volts: f64) -> String {
        let value = encode_volts(volts);
        let line = format!(
            "{}>APRS,TCPIP*:T#{:03},{:03},000,000,000,000,Battery\n",
            self.callsign, self.sequence, value
        );
        self.sequence = if self.sequence >= TELEMETRY_SEQ_MAX {
            0
        } else {
            self.sequence + 1
        };
        line
    }
}

/// Hundredths of a volt, clamped to the three-digit analog field
pub fn encode_volts(volts: f64) -> u16 {
    if !volts.is_finite() || volts <= 0.0 {
        return 0;
    }
    (volts * 100.0).round().min(999.0) as u16
}
