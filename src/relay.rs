//! Forwarding decisions between the radio and APRS-IS.
//!
//! Three directions are handled here: radio to APRS-IS (gating), radio to radio
//! (digipeating) and APRS-IS to radio. The engine owns the duplicate filter and
//! the traffic counters; I/O goes through the [`Radio`] and [`Session`] handed
//! in by the poll loop.

use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::aprs_is::Session;
use crate::dedup::DuplicateSuppressor;
use crate::digipeat;
use crate::frame::{self, Frame, same_callsign};
use crate::radio::Radio;

/// Traffic counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Non-empty frames heard on radio
    pub radio_received: u64,
    /// Radio frames dropped as duplicates
    pub duplicates: u64,
    /// Frames repeated on radio
    pub digipeated: u64,
    /// Radio frames gated to APRS-IS
    pub sent_to_internet: u64,
    /// Non-comment lines received from APRS-IS
    pub received_from_internet: u64,
    /// APRS-IS lines transmitted on radio
    pub sent_to_radio: u64,
    /// `#` lines received from APRS-IS
    pub server_lines: u64,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub own_callsign: String,
    /// Repeat eligible radio frames
    pub digipeat: bool,
    /// Transmit APRS-IS lines on radio
    pub internet_to_radio: bool,
    pub dedup_capacity: usize,
    pub dedup_window: Duration,
}

impl RelaySettings {
    pub fn new(own_callsign: impl Into<String>) -> Self {
        Self {
            own_callsign: own_callsign.into(),
            digipeat: true,
            internet_to_radio: true,
            dedup_capacity: crate::dedup::DEFAULT_CAPACITY,
            dedup_window: crate::dedup::DEFAULT_WINDOW,
        }
    }
}

/// What happened to one radio frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioDisposition {
    pub duplicate: bool,
    /// Rewritten frame sent back out on radio, rendered for display
    pub digipeated: Option<String>,
    /// Original frame forwarded to APRS-IS
    pub gated: bool,
}

pub struct RelayEngine {
    settings: RelaySettings,
    dedup: DuplicateSuppressor,
    stats: RelayStats,
}

impl RelayEngine {
    pub fn new(settings: RelaySettings) -> Self {
        let dedup = DuplicateSuppressor::new(settings.dedup_capacity, settings.dedup_window);
        Self {
            settings,
            dedup,
            stats: RelayStats::default(),
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn own_callsign(&self) -> &str {
        &self.settings.own_callsign
    }

    /// Handle one frame heard on radio: digipeat it and/or gate it to APRS-IS
    pub async fn relay_radio_frame(
        &mut self,
        raw: &[u8],
        now: Instant,
        radio: &mut dyn Radio,
        session: &mut Session,
    ) -> RadioDisposition {
        let mut disposition = RadioDisposition::default();

        // Bytes are forwarded as heard; the text form is for parsing and logs
        let line = frame::trim_line_end(raw);
        if line.is_empty() {
            return disposition;
        }
        let text = String::from_utf8_lossy(line);

        self.stats.radio_received += 1;
        metrics::counter!("loragate.radio.received_total").increment(1);

        if self.dedup.is_duplicate(raw, now) {
            debug!("Duplicate radio frame dropped: {}", text);
            self.stats.duplicates += 1;
            metrics::counter!("loragate.radio.duplicate_total").increment(1);
            disposition.duplicate = true;
            return disposition;
        }

        info!("LoRa RX: {}", text);
        let parsed = Frame::parse(&text);
        let own = self.settings.own_callsign.as_str();

        if self.settings.digipeat && !same_callsign(&parsed.source, own) {
            match digipeat::rewrite(&parsed, own) {
                Ok(repeated) => {
                    let out = match frame::raw_info(line) {
                        Some(info) => repeated.encode_with_info(info),
                        None => repeated.to_string().into_bytes(),
                    };
                    match radio.transmit(&out).await {
                        Ok(()) => {
                            let shown = String::from_utf8_lossy(&out).into_owned();
                            info!("Digipeated: {}", shown);
                            self.stats.digipeated += 1;
                            metrics::counter!("loragate.digipeat.sent_total").increment(1);
                            disposition.digipeated = Some(shown);
                        }
                        Err(e) => warn!("Failed to transmit digipeated frame: {}", e),
                    }
                }
                Err(skip) => {
                    trace!("Not digipeating ({}): {}", skip.as_str(), text);
                }
            }
        }

        if !same_callsign(&parsed.destination, own) && session.is_established() {
            match session.send_raw(line, now).await {
                Ok(()) => {
                    debug!("Gated to APRS-IS: {}", text);
                    self.stats.sent_to_internet += 1;
                    metrics::counter!("loragate.aprs_is.sent_total").increment(1);
                    disposition.gated = true;
                }
                Err(e) => warn!("Failed to gate frame to APRS-IS: {}", e),
            }
        }

        disposition
    }

    /// Handle one line from APRS-IS; returns true when it went out on radio
    pub async fn relay_internet_line(&mut self, line: &str, radio: &mut dyn Radio) -> bool {
        if line.trim().is_empty() {
            return false;
        }

        if line.starts_with('#') {
            self.stats.server_lines += 1;
            metrics::counter!("loragate.aprs_is.server_line_total").increment(1);
            debug!("APRS-IS: {}", line);
            return false;
        }

        self.stats.received_from_internet += 1;
        metrics::counter!("loragate.aprs_is.received_total").increment(1);

        if !self.settings.internet_to_radio {
            trace!("Internet to radio disabled, dropping: {}", line);
            return false;
        }

        match radio.transmit(line.as_bytes()).await {
            Ok(()) => {
                info!("LoRa TX from APRS-IS: {}", line);
                self.stats.sent_to_radio += 1;
                metrics::counter!("loragate.radio.sent_total").increment(1);
                true
            }
            Err(e) => {
                warn!("Failed to transmit APRS-IS line on radio: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aprs_is::{AprsIsConfigBuilder, Session};
    use crate::test_utils::{MemoryConnector, MemoryRadio, MemoryServer};

    const OWN: &str = "TI0TEC-7";
    const HEARD: &str = "N0CALL>APRS,WIDE1-1:!4903.50N/07201.75W>test";

    async fn established_session(server: &MemoryServer) -> Session {
        server.accept_logins();
        let config = AprsIsConfigBuilder::new()
            .callsign(OWN)
            .auth_timeout(Duration::from_millis(100))
            .build();
        let mut session = Session::new(config, Box::new(MemoryConnector::new(server.clone())));
        session.connect(Instant::now()).await.unwrap();
        session
    }

    fn offline_session() -> Session {
        Session::new(
            AprsIsConfigBuilder::new().callsign(OWN).build(),
            Box::new(MemoryConnector::new(MemoryServer::new())),
        )
    }

    #[tokio::test]
    async fn test_heard_frame_is_digipeated_and_gated() {
        let server = MemoryServer::new();
        let mut session = established_session(&server).await;
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        let disposition = engine
            .relay_radio_frame(HEARD.as_bytes(), Instant::now(), &mut radio, &mut session)
            .await;

        assert_eq!(
            disposition.digipeated.as_deref(),
            Some("N0CALL>APRS,TI0TEC-7*,WIDE1-0:!4903.50N/07201.75W>test")
        );
        assert!(disposition.gated);
        assert_eq!(radio.transmitted().len(), 1);
        assert_eq!(server.written_frames(), vec![format!("{}\n", HEARD)]);

        let stats = engine.stats();
        assert_eq!(stats.radio_received, 1);
        assert_eq!(stats.digipeated, 1);
        assert_eq!(stats.sent_to_internet, 1);
    }

    #[tokio::test]
    async fn test_non_utf8_payload_forwarded_byte_for_byte() {
        let server = MemoryServer::new();
        let mut session = established_session(&server).await;
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));
        let heard: &[u8] = b"N0CALL>APRS,WIDE1-1:!\xb0test";

        let disposition = engine
            .relay_radio_frame(heard, Instant::now(), &mut radio, &mut session)
            .await;

        assert!(disposition.gated);
        assert_eq!(
            radio.transmitted_bytes(),
            vec![b"N0CALL>APRS,TI0TEC-7*,WIDE1-0:!\xb0test".to_vec()]
        );
        let gated: Vec<_> = server
            .written_bytes()
            .into_iter()
            .filter(|bytes| bytes.starts_with(b"N0CALL>"))
            .collect();
        assert_eq!(gated, vec![b"N0CALL>APRS,WIDE1-1:!\xb0test\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped() {
        let server = MemoryServer::new();
        let mut session = established_session(&server).await;
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));
        let t0 = Instant::now();

        engine
            .relay_radio_frame(HEARD.as_bytes(), t0, &mut radio, &mut session)
            .await;
        let second = engine
            .relay_radio_frame(HEARD.as_bytes(), t0 + Duration::from_secs(3), &mut radio, &mut session)
            .await;

        assert!(second.duplicate);
        assert_eq!(engine.stats().duplicates, 1);
        assert_eq!(radio.transmitted().len(), 1);
        assert_eq!(server.written_frames().len(), 1);
    }

    #[tokio::test]
    async fn test_not_gated_while_disconnected() {
        let mut session = offline_session();
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        let disposition = engine
            .relay_radio_frame(HEARD.as_bytes(), Instant::now(), &mut radio, &mut session)
            .await;

        // Digipeating does not depend on the internet side
        assert!(disposition.digipeated.is_some());
        assert!(!disposition.gated);
        assert_eq!(engine.stats().sent_to_internet, 0);
    }

    #[tokio::test]
    async fn test_frames_addressed_to_us_are_not_gated() {
        let server = MemoryServer::new();
        let mut session = established_session(&server).await;
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        let disposition = engine
            .relay_radio_frame(
                b"N0CALL>TI0TEC-7,WIDE1-1:hello",
                Instant::now(),
                &mut radio,
                &mut session,
            )
            .await;

        assert!(!disposition.gated);
        assert!(disposition.digipeated.is_some());
        assert!(server.written_frames().is_empty());
    }

    #[tokio::test]
    async fn test_own_frames_gated_but_not_repeated() {
        let server = MemoryServer::new();
        let mut session = established_session(&server).await;
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        let disposition = engine
            .relay_radio_frame(
                b"TI0TEC-7>APRS,WIDE2-2:my own beacon",
                Instant::now(),
                &mut radio,
                &mut session,
            )
            .await;

        assert_eq!(disposition.digipeated, None);
        assert!(disposition.gated);
        assert!(radio.transmitted().is_empty());
    }

    #[tokio::test]
    async fn test_digipeat_can_be_disabled() {
        let mut session = offline_session();
        let mut radio = MemoryRadio::new();
        let mut settings = RelaySettings::new(OWN);
        settings.digipeat = false;
        let mut engine = RelayEngine::new(settings);

        let disposition = engine
            .relay_radio_frame(HEARD.as_bytes(), Instant::now(), &mut radio, &mut session)
            .await;

        assert_eq!(disposition.digipeated, None);
        assert!(radio.transmitted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_radio_payload_ignored() {
        let mut session = offline_session();
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        engine
            .relay_radio_frame(b"\r\n", Instant::now(), &mut radio, &mut session)
            .await;
        assert_eq!(engine.stats(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_internet_line_goes_to_radio_verbatim() {
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));
        let line = "KB1ABC>APRS,TCPIP*,qAC,T2TEST::TI0TEC-7 :hello{1";

        assert!(engine.relay_internet_line(line, &mut radio).await);

        assert_eq!(radio.transmitted(), vec![line.to_string()]);
        let stats = engine.stats();
        assert_eq!(stats.received_from_internet, 1);
        assert_eq!(stats.sent_to_radio, 1);
        assert_eq!(stats.digipeated, 0);
    }

    #[tokio::test]
    async fn test_server_lines_are_not_transmitted() {
        let mut radio = MemoryRadio::new();
        let mut engine = RelayEngine::new(RelaySettings::new(OWN));

        assert!(!engine.relay_internet_line("# aprsc 2.1.19 keepalive", &mut radio).await);
        assert!(!engine.relay_internet_line("", &mut radio).await);

        assert!(radio.transmitted().is_empty());
        assert_eq!(engine.stats().server_lines, 1);
        assert_eq!(engine.stats().sent_to_radio, 0);
    }

    #[tokio::test]
    async fn test_internet_to_radio_can_be_disabled() {
        let mut radio = MemoryRadio::new();
        let mut settings = RelaySettings::new(OWN);
        settings.internet_to_radio = false;
        let mut engine = RelayEngine::new(settings);

        assert!(!engine.relay_internet_line("KB1ABC>APRS:hi", &mut radio).await);
        assert!(radio.transmitted().is_empty());
        assert_eq!(engine.stats().received_from_internet, 1);
    }
}
