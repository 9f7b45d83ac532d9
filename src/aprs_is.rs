//! APRS-IS session: connect, login, keepalive and liveness checks.
//!
//! The session is driven from the gateway's poll loop. Only the connect and the
//! login wait block, and both are bounded by timeouts; everything else is a
//! non-blocking check against the `now` passed in by the caller.

use async_trait::async_trait;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Software name and version announced in the login line
pub const DEFAULT_CLIENT_ID: &str = concat!("loragate ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {server}: {source}")]
    Connect { server: String, source: io::Error },

    #[error("{phase} timed out after {after:?}")]
    Timeout {
        phase: &'static str,
        after: Duration,
    },

    #[error("login not accepted by server")]
    AuthRejected,

    #[error("session is not established")]
    NotConnected,

    #[error("connection closed by server")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Established,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Established => "established",
        }
    }
}

/// Result of a bounded line read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, without its terminator
    Line(String),
    /// No complete line arrived within the wait
    Pending,
    /// The remote end closed the stream
    Closed,
}

/// Line-oriented text stream to an APRS-IS server
#[async_trait]
pub trait LineStream: Send {
    /// Write `bytes` exactly as given (the caller supplies the terminator)
    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait at most `wait` for a complete line; `Duration::ZERO` never blocks
    async fn read_line(&mut self, wait: Duration) -> io::Result<ReadOutcome>;

    /// Remote address, for logging
    fn peer(&self) -> String;
}

/// Opens [`LineStream`]s
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &str, port: u16) -> Result<Box<dyn LineStream>, SessionError>;
}

/// Configuration for the APRS-IS session
#[derive(Debug, Clone)]
pub struct AprsIsConfig {
    /// APRS-IS server hostname
    pub server: String,
    /// APRS-IS server port
    pub port: u16,
    /// Callsign for authentication
    pub callsign: String,
    /// Passcode; `-1` (receive only) is sent when absent
    pub passcode: Option<String>,
    /// Server-side filter, e.g. `r/9.86/-83.91/50`
    pub filter: Option<String>,
    /// `vers` field of the login line
    pub client_id: String,
    pub connect_timeout: Duration,
    /// How long to wait for the login response
    pub auth_timeout: Duration,
    /// Minimum time between connection attempts
    pub reconnect_interval: Duration,
    /// Drop the session after this long without inbound traffic
    pub inactivity_timeout: Duration,
    /// Send a ping after this long without outbound traffic
    pub ping_interval: Duration,
}

impl Default for AprsIsConfig {
    fn default() -> Self {
        Self {
            server: "noam.aprs2.net".to_string(),
            port: 14580,
            callsign: "N0CALL".to_string(),
            passcode: None,
            filter: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(60),
        }
    }
}

/// Builder pattern for creating APRS-IS session configurations
pub struct AprsIsConfigBuilder {
    config: AprsIsConfig,
}

impl AprsIsConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AprsIsConfig::default(),
        }
    }

    pub fn server<S: Into<String>>(mut self, server: S) -> Self {
        self.config.server = server.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn callsign<S: Into<String>>(mut self, callsign: S) -> Self {
        self.config.callsign = callsign.into();
        self
    }

    pub fn passcode<S: Into<String>>(mut self, passcode: Option<S>) -> Self {
        self.config.passcode = passcode.map(|p| p.into());
        self
    }

    pub fn filter<S: Into<String>>(mut self, filter: Option<S>) -> Self {
        self.config.filter = filter.map(|f| f.into());
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.config.inactivity_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn build(self) -> AprsIsConfig {
        self.config
    }
}

impl Default for AprsIsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the login line for APRS-IS authentication
pub fn build_login_command(config: &AprsIsConfig) -> String {
    let mut login_cmd = format!("user {} pass ", config.callsign);

    // -1 is read-only access
    match &config.passcode {
        Some(pass) => login_cmd.push_str(pass),
        None => login_cmd.push_str("-1"),
    }

    // Add version info
    login_cmd.push_str(" vers ");
    login_cmd.push_str(&config.client_id);

    // Add filter if specified
    if let Some(filter) = &config.filter {
        login_cmd.push_str(" filter ");
        login_cmd.push_str(filter);
    }

    login_cmd.push('\n');
    login_cmd
}

/// Keepalive line carrying our uptime
pub fn build_ping_line(client_id: &str, uptime: Duration) -> String {
    format!("# Ping {} {}\n", client_id, uptime.as_millis())
}

/// Server response that completes the login
fn is_login_response(line: &str) -> bool {
    line.starts_with('#')
        && (line.contains("logresp") || line.contains("verified") || line.contains("logged in"))
}

/// `line` with exactly one `\n` terminator
fn terminated(line: &[u8]) -> Vec<u8> {
    let mut bytes = crate::frame::trim_line_end(line).to_vec();
    bytes.push(b'\n');
    bytes
}

/// The internet side of the gateway
pub struct Session {
    config: AprsIsConfig,
    connector: Box<dyn Connector>,
    state: SessionState,
    stream: Option<Box<dyn LineStream>>,
    last_traffic_at: Option<Instant>,
    last_sent_at: Option<Instant>,
    last_ping_at: Option<Instant>,
    last_attempt_at: Option<Instant>,
    established_at: Option<Instant>,
    attempts: u64,
}

impl Session {
    pub fn new(config: AprsIsConfig, connector: Box<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: SessionState::Disconnected,
            stream: None,
            last_traffic_at: None,
            last_sent_at: None,
            last_ping_at: None,
            last_attempt_at: None,
            established_at: None,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &AprsIsConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn last_traffic_at(&self) -> Option<Instant> {
        self.last_traffic_at
    }

    pub fn last_ping_at(&self) -> Option<Instant> {
        self.last_ping_at
    }

    pub fn established_at(&self) -> Option<Instant> {
        self.established_at
    }

    /// Connection attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// True while disconnected and the reconnect interval has elapsed
    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.state == SessionState::Disconnected
            && self.last_attempt_at.is_none_or(|at| {
                now.saturating_duration_since(at) >= self.config.reconnect_interval
            })
    }

    /// True when an established session has seen no inbound traffic for too long
    pub fn is_stale(&self, now: Instant) -> bool {
        self.is_established()
            && self.last_traffic_at.is_some_and(|at| {
                now.saturating_duration_since(at) > self.config.inactivity_timeout
            })
    }

    /// Health check and reconnect, called once per tick
    pub async fn maintain(&mut self, now: Instant) {
        // Drop a connection that has gone silent
        if self.is_stale(now) {
            error!(
                "No traffic from APRS-IS for more than {}s, dropping connection",
                self.config.inactivity_timeout.as_secs()
            );
            metrics::counter!("loragate.aprs_is.inactivity_timeout_total").increment(1);
            self.teardown();
        }

        // Reconnect once the interval since the last attempt has passed
        if self.reconnect_due(now) {
            if let Err(e) = self.connect(now).await {
                warn!(
                    "APRS-IS connection attempt failed: {} (next attempt in {}s)",
                    e,
                    self.config.reconnect_interval.as_secs()
                );
                metrics::counter!("loragate.aprs_is.connection_failed_total").increment(1);
            }
        }
    }

    /// Connect and log in, replacing any existing stream.
    ///
    /// On failure the session is left `Disconnected` and the attempt counts
    /// toward the reconnect interval.
    #[tracing::instrument(skip(self, now), fields(server = %self.config.server, port = %self.config.port))]
    pub async fn connect(&mut self, now: Instant) -> Result<(), SessionError> {
        self.teardown();
        self.last_attempt_at = Some(now);
        self.attempts += 1;

        if self.attempts == 1 {
            info!("Connecting to APRS-IS at {}:{}", self.config.server, self.config.port);
        } else {
            info!(
                "Reconnecting to APRS-IS at {}:{} (attempt {})",
                self.config.server, self.config.port, self.attempts
            );
        }

        match self.open_and_login().await {
            Ok(stream) => {
                info!("APRS-IS session established with {}", stream.peer());
                self.stream = Some(stream);
                self.state = SessionState::Established;
                self.established_at = Some(now);
                self.last_traffic_at = Some(now);
                self.last_sent_at = Some(now);
                self.last_ping_at = None;
                metrics::counter!("loragate.aprs_is.established_total").increment(1);
                metrics::gauge!("loragate.aprs_is.connected").set(1.0);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open_and_login(&mut self) -> Result<Box<dyn LineStream>, SessionError> {
        self.state = SessionState::Connecting;

        // Connect with timeout
        let connect_timeout = self.config.connect_timeout;
        let mut stream = timeout(
            connect_timeout,
            self.connector.connect(&self.config.server, self.config.port),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            phase: "connect",
            after: connect_timeout,
        })??;

        // Send login command
        self.state = SessionState::Authenticating;
        let login_cmd = build_login_command(&self.config);
        info!(
            "Sending login for {} (filter: {})",
            self.config.callsign,
            self.config.filter.as_deref().unwrap_or("none")
        );
        stream.write_bytes(login_cmd.as_bytes()).await?;

        // The whole wait is one timeout, so no clock is read here
        let auth_timeout = self.config.auth_timeout;
        match timeout(auth_timeout, Self::await_login_response(stream.as_mut(), auth_timeout)).await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("No login response within {}s", auth_timeout.as_secs());
                Err(SessionError::AuthRejected)
            }
        }
    }

    /// Read server lines until one completes the login
    async fn await_login_response(
        stream: &mut dyn LineStream,
        wait: Duration,
    ) -> Result<(), SessionError> {
        loop {
            match stream.read_line(wait).await? {
                ReadOutcome::Line(line) => {
                    if is_login_response(&line) {
                        if line.contains("unverified") {
                            warn!("Login unverified, uploads will be dropped by the server: {}", line);
                        } else {
                            info!("Login accepted: {}", line);
                        }
                        return Ok(());
                    }
                    // Server banner or other chatter before the logresp
                    debug!("Server: {}", line);
                }
                ReadOutcome::Pending => continue,
                ReadOutcome::Closed => return Err(SessionError::Closed),
            }
        }
    }

    /// Close the stream and return to `Disconnected`
    pub fn teardown(&mut self) {
        if self.stream.take().is_some() {
            info!("Closing APRS-IS connection");
            metrics::gauge!("loragate.aprs_is.connected").set(0.0);
        }
        self.state = SessionState::Disconnected;
        self.established_at = None;
    }

    /// Send one line (a terminator is added when missing)
    pub async fn send_line(&mut self, line: &str, now: Instant) -> Result<(), SessionError> {
        self.send_raw(line.as_bytes(), now).await
    }

    /// Send one line given as bytes, exactly as received from the radio
    pub async fn send_raw(&mut self, line: &[u8], now: Instant) -> Result<(), SessionError> {
        if !self.is_established() {
            return Err(SessionError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        match stream.write_bytes(&terminated(line)).await {
            Ok(()) => {
                trace!("Sent: {}", String::from_utf8_lossy(line).trim_end());
                self.last_sent_at = Some(now);
                Ok(())
            }
            Err(e) => {
                error!("APRS-IS write failed: {}", e);
                metrics::counter!("loragate.aprs_is.write_error_total").increment(1);
                self.teardown();
                Err(e.into())
            }
        }
    }

    /// Next complete inbound line, without waiting
    pub async fn poll_line(&mut self, now: Instant) -> Option<String> {
        let stream = self.stream.as_mut()?;

        match stream.read_line(Duration::ZERO).await {
            Ok(ReadOutcome::Line(line)) => {
                // Server comments count as traffic too
                self.last_traffic_at = Some(now);
                Some(line)
            }
            Ok(ReadOutcome::Pending) => None,
            Ok(ReadOutcome::Closed) => {
                let duration = self
                    .established_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                error!(
                    "APRS-IS connection closed by server after {:.1}s",
                    duration.as_secs_f64()
                );
                metrics::counter!("loragate.aprs_is.server_closed_total").increment(1);
                self.teardown();
                None
            }
            Err(e) => {
                error!("APRS-IS read failed: {}", e);
                self.teardown();
                None
            }
        }
    }

    /// True when nothing has been sent for a full ping interval
    pub fn ping_due(&self, now: Instant) -> bool {
        if !self.is_established() {
            return false;
        }
        let last_activity = match (self.last_sent_at, self.last_ping_at) {
            (Some(sent), Some(ping)) => Some(sent.max(ping)),
            (sent, ping) => sent.or(ping),
        };
        last_activity
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.ping_interval)
    }

    /// Send a keepalive ping when the connection has been idle.
    /// Returns true when a ping went out.
    pub async fn keepalive(&mut self, now: Instant, uptime: Duration) -> bool {
        if !self.ping_due(now) {
            return false;
        }

        // Send keepalive if needed
        let ping = build_ping_line(&self.config.client_id, uptime);
        match self.send_line(&ping, now).await {
            Ok(()) => {
                self.last_ping_at = Some(now);
                metrics::counter!("loragate.aprs_is.keepalive_sent_total").increment(1);
                trace!("Sent keepalive to APRS-IS");
                true
            }
            Err(e) => {
                warn!("Failed to send keepalive: {}", e);
                false
            }
        }
    }
}

/// TCP connector with IPv4 preference and shuffled address order
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, server: &str, port: u16) -> Result<Box<dyn LineStream>, SessionError> {
        // Resolve DNS to get all addresses
        let server_address = format!("{}:{}", server, port);
        let all_addrs: Vec<_> = tokio::net::lookup_host(&server_address)
            .await
            .map_err(|source| SessionError::Connect {
                server: server_address.clone(),
                source,
            })?
            .collect();

        if all_addrs.is_empty() {
            return Err(SessionError::Connect {
                server: server_address,
                source: io::Error::new(io::ErrorKind::NotFound, "DNS returned no addresses"),
            });
        }

        // Prefer IPv4 addresses
        let ipv4_addrs: Vec<_> = all_addrs.iter().filter(|a| a.is_ipv4()).cloned().collect();
        let mut addrs = if ipv4_addrs.is_empty() {
            warn!(
                "No IPv4 addresses found for {}, falling back to all addresses",
                server_address
            );
            all_addrs
        } else {
            debug!(
                "DNS resolved {} to {} IPv4 address(es)",
                server_address,
                ipv4_addrs.len()
            );
            ipv4_addrs
        };

        // Shuffle and try addresses
        {
            use rand::seq::SliceRandom;
            let mut rng = rand::rng();
            addrs.shuffle(&mut rng);
        }

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to APRS-IS server at {}", addr);
                    return Ok(Box::new(TcpLineStream::new(stream, addr.to_string())));
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::Connect {
            server: server_address,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no address")),
        })
    }
}

/// Longest APRS-IS line we keep, terminator excluded
pub const MAX_LINE_LEN: usize = 512;

/// What one read pass ended with
enum Fill {
    /// `pending` holds a complete `\n`-terminated line
    Line,
    /// The server closed the stream
    Eof,
}

/// [`LineStream`] over a TCP socket
pub struct TcpLineStream {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Bytes of a line still being received
    pending: Vec<u8>,
    /// Dropping the rest of an oversized line up to its terminator
    discarding: bool,
    peer: String,
}

impl TcpLineStream {
    pub fn new(stream: TcpStream, peer: String) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
            discarding: false,
            peer,
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(crate::frame::trim_line_end(&self.pending)).into_owned();
        self.pending.clear();
        line
    }

    fn drop_oversized(&mut self) {
        warn!(
            "Dropping APRS-IS line longer than {} bytes from {}",
            MAX_LINE_LEN, self.peer
        );
        metrics::counter!("loragate.aprs_is.oversized_line_total").increment(1);
        self.pending.clear();
    }

    /// Read until `pending` holds one complete line or the stream ends.
    ///
    /// Bytes move from the reader into `pending` with no await in between,
    /// so cancelling this future (the read timeout) never loses data.
    async fn fill_line(&mut self) -> io::Result<Fill> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(Fill::Eof);
            }

            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };
            let used = chunk.len();
            if !self.discarding {
                self.pending.extend_from_slice(chunk);
            }
            self.reader.consume(used);

            if complete {
                // Tail of a line that was already dropped
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                if crate::frame::trim_line_end(&self.pending).len() > MAX_LINE_LEN {
                    self.drop_oversized();
                    continue;
                }
                return Ok(Fill::Line);
            }

            if !self.discarding && self.pending.len() > MAX_LINE_LEN + 2 {
                self.drop_oversized();
                self.discarding = true;
            }
        }
    }
}

#[async_trait]
impl LineStream for TcpLineStream {
    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    async fn read_line(&mut self, wait: Duration) -> io::Result<ReadOutcome> {
        let read = timeout(wait, self.fill_line()).await;
        match read {
            // Partial bytes stay in `pending` for the next call
            Err(_) => Ok(ReadOutcome::Pending),
            Ok(Ok(Fill::Line)) => Ok(ReadOutcome::Line(self.take_line())),
            Ok(Ok(Fill::Eof)) => {
                // Only terminated lines count; a fragment cut off by the close is dropped
                if !self.pending.is_empty() {
                    debug!(
                        "Discarding {} bytes of unterminated line from {}",
                        self.pending.len(),
                        self.peer
                    );
                    self.pending.clear();
                }
                Ok(ReadOutcome::Closed)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryConnector, MemoryServer};

    fn test_config() -> AprsIsConfig {
        AprsIsConfigBuilder::new()
            .server("test.aprs.net")
            .callsign("TI0TEC-7")
            .passcode(Some("12345"))
            .filter(Some("r/9.86/-83.91/50"))
            .client_id("loragate 0.1.0")
            .auth_timeout(Duration::from_millis(100))
            .reconnect_interval(Duration::from_secs(30))
            .inactivity_timeout(Duration::from_secs(120))
            .ping_interval(Duration::from_secs(60))
            .build()
    }

    fn session_with(server: &MemoryServer) -> Session {
        Session::new(test_config(), Box::new(MemoryConnector::new(server.clone())))
    }

    #[test]
    fn test_config_builder() {
        let config = test_config();

        assert_eq!(config.server, "test.aprs.net");
        assert_eq!(config.port, 14580);
        assert_eq!(config.callsign, "TI0TEC-7");
        assert_eq!(config.passcode, Some("12345".to_string()));
        assert_eq!(config.filter, Some("r/9.86/-83.91/50".to_string()));
        assert_eq!(config.auth_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_login_command_with_passcode_and_filter() {
        assert_eq!(
            build_login_command(&test_config()),
            "user TI0TEC-7 pass 12345 vers loragate 0.1.0 filter r/9.86/-83.91/50\n"
        );
    }

    #[test]
    fn test_login_command_without_passcode() {
        let config = AprsIsConfigBuilder::new()
            .callsign("N0CALL")
            .client_id("loragate 0.1.0")
            .build();

        assert_eq!(
            build_login_command(&config),
            "user N0CALL pass -1 vers loragate 0.1.0\n"
        );
    }

    #[test]
    fn test_ping_line() {
        assert_eq!(
            build_ping_line("loragate 0.1.0", Duration::from_millis(123_456)),
            "# Ping loragate 0.1.0 123456\n"
        );
    }

    #[test]
    fn test_login_response_detection() {
        assert!(is_login_response("# logresp TI0TEC-7 verified, server T2CR"));
        assert!(is_login_response("# logresp N0CALL unverified, server T2CR"));
        assert!(!is_login_response("# aprsc 2.1.19-g730c5c0 22 Sep 2025 23:10:51 GMT T2CR"));
        assert!(!is_login_response("N0CALL>APRS:verified"));
    }

    #[tokio::test]
    async fn test_connect_establishes_session() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let now = Instant::now();

        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect(now).await.unwrap();

        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.last_traffic_at(), Some(now));
        assert_eq!(
            server.written(),
            vec!["user TI0TEC-7 pass 12345 vers loragate 0.1.0 filter r/9.86/-83.91/50\n"]
        );
    }

    #[tokio::test]
    async fn test_banner_before_login_response_is_skipped() {
        let server = MemoryServer::new();
        server.push_line("# aprsc 2.1.19-g730c5c0 22 Sep 2025 23:10:51 GMT T2CR 1.2.3.4:14580");
        server.accept_logins();
        let mut session = session_with(&server);

        session.connect(Instant::now()).await.unwrap();
        assert!(session.is_established());
    }

    #[tokio::test]
    async fn test_missing_login_response_abandons_attempt() {
        let server = MemoryServer::new();
        server.push_line("# aprsc 2.1.19 banner only");
        let mut session = session_with(&server);

        let result = session.connect(Instant::now()).await;

        assert!(matches!(result, Err(SessionError::AuthRejected)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connection_stays_disconnected() {
        let server = MemoryServer::new();
        server.refuse_connections();
        let mut session = session_with(&server);

        let result = session.connect(Instant::now()).await;

        assert!(matches!(result, Err(SessionError::Connect { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_interval() {
        let server = MemoryServer::new();
        server.refuse_connections();
        let mut session = session_with(&server);
        let t0 = Instant::now();

        assert!(session.reconnect_due(t0));
        session.maintain(t0).await;
        assert_eq!(session.attempts(), 1);

        session.maintain(t0 + Duration::from_secs(10)).await;
        assert_eq!(session.attempts(), 1);

        server.accept_connections();
        server.accept_logins();
        session.maintain(t0 + Duration::from_secs(30)).await;
        assert_eq!(session.attempts(), 2);
        assert!(session.is_established());
    }

    #[tokio::test]
    async fn test_inactivity_tears_down_and_reconnects_later() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let t0 = Instant::now();
        session.connect(t0).await.unwrap();

        session.maintain(t0 + Duration::from_secs(60)).await;
        assert!(session.is_established());

        // Health check fails, and the last attempt was long enough ago to retry at once
        let stale = t0 + Duration::from_secs(121);
        assert!(session.is_stale(stale));
        session.maintain(stale).await;
        assert_eq!(session.attempts(), 2);
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn test_inbound_lines_refresh_traffic() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let t0 = Instant::now();
        session.connect(t0).await.unwrap();

        server.push_line("# aprsc keepalive");
        let later = t0 + Duration::from_secs(100);
        assert_eq!(session.poll_line(later).await.as_deref(), Some("# aprsc keepalive"));
        assert_eq!(session.poll_line(later).await, None);
        assert_eq!(session.last_traffic_at(), Some(later));
        assert!(!session.is_stale(t0 + Duration::from_secs(200)));
    }

    #[tokio::test]
    async fn test_server_close_disconnects() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let t0 = Instant::now();
        session.connect(t0).await.unwrap();

        server.close();
        assert_eq!(session.poll_line(t0).await, None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.send_line("x", t0).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_line_adds_terminator() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let t0 = Instant::now();
        session.connect(t0).await.unwrap();

        session.send_line("N0CALL>APRS:test", t0).await.unwrap();
        session.send_line("N0CALL>APRS:test2\r\n", t0).await.unwrap();

        let written = server.written();
        assert_eq!(written[1], "N0CALL>APRS:test\n");
        assert_eq!(written[2], "N0CALL>APRS:test2\n");
    }

    #[tokio::test]
    async fn test_ping_only_when_idle() {
        let server = MemoryServer::new();
        server.accept_logins();
        let mut session = session_with(&server);
        let t0 = Instant::now();
        session.connect(t0).await.unwrap();

        assert!(!session.keepalive(t0 + Duration::from_secs(30), Duration::from_secs(30)).await);

        // Outbound traffic postpones the ping
        session.send_line("N0CALL>APRS:x", t0 + Duration::from_secs(40)).await.unwrap();
        assert!(!session.keepalive(t0 + Duration::from_secs(70), Duration::from_secs(70)).await);

        assert!(session.keepalive(t0 + Duration::from_secs(100), Duration::from_secs(100)).await);
        assert_eq!(session.last_ping_at(), Some(t0 + Duration::from_secs(100)));
        assert_eq!(
            server.written().last().map(String::as_str),
            Some("# Ping loragate 0.1.0 100000\n")
        );
    }

    #[tokio::test]
    async fn test_no_ping_when_disconnected() {
        let server = MemoryServer::new();
        let mut session = session_with(&server);

        assert!(!session.keepalive(Instant::now(), Duration::ZERO).await);
        assert!(server.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_wait_bounded_by_configured_timeout() {
        let server = MemoryServer::new();
        let mut session = Session::new(
            AprsIsConfigBuilder::new()
                .callsign("TI0TEC-7")
                .auth_timeout(Duration::from_secs(5))
                .build(),
            Box::new(MemoryConnector::new(server.clone())),
        );

        // Paused clock: the timeout elapses without real waiting
        let started = tokio::time::Instant::now();
        let result = session.connect(Instant::now()).await;

        assert!(matches!(result, Err(SessionError::AuthRejected)));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    async fn tcp_pair() -> (TcpLineStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TcpLineStream::new(client, addr.to_string()), server)
    }

    async fn read_until_ready(stream: &mut TcpLineStream) -> ReadOutcome {
        loop {
            match stream.read_line(Duration::from_millis(200)).await.unwrap() {
                ReadOutcome::Pending => continue,
                outcome => return outcome,
            }
        }
    }

    #[tokio::test]
    async fn test_tcp_stream_yields_complete_lines() {
        let (mut stream, mut server) = tcp_pair().await;

        server.write_all(b"# aprsc 2.1.19\r\nK1ABC>APRS:hel").await.unwrap();
        assert_eq!(
            read_until_ready(&mut stream).await,
            ReadOutcome::Line("# aprsc 2.1.19".to_string())
        );
        assert_eq!(
            stream.read_line(Duration::from_millis(20)).await.unwrap(),
            ReadOutcome::Pending
        );

        server.write_all(b"lo\n").await.unwrap();
        assert_eq!(
            read_until_ready(&mut stream).await,
            ReadOutcome::Line("K1ABC>APRS:hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_tcp_stream_drops_fragment_at_close() {
        let (mut stream, mut server) = tcp_pair().await;

        server.write_all(b"K1ABC>APRS:trunc").await.unwrap();
        server.shutdown().await.unwrap();
        drop(server);

        assert_eq!(read_until_ready(&mut stream).await, ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn test_tcp_stream_drops_oversized_lines() {
        let (mut stream, mut server) = tcp_pair().await;

        let mut oversized = vec![b'A'; MAX_LINE_LEN * 3];
        oversized.push(b'\n');
        server.write_all(&oversized).await.unwrap();
        server.write_all(b"K1ABC>APRS:after\n").await.unwrap();

        assert_eq!(
            read_until_ready(&mut stream).await,
            ReadOutcome::Line("K1ABC>APRS:after".to_string())
        );
        assert!(stream.pending.is_empty());
        assert!(!stream.discarding);
    }

    #[tokio::test]
    async fn test_tcp_stream_keeps_line_at_length_limit() {
        let (mut stream, mut server) = tcp_pair().await;

        let mut line = vec![b'B'; MAX_LINE_LEN];
        line.extend_from_slice(b"\r\n");
        server.write_all(&line).await.unwrap();

        assert_eq!(
            read_until_ready(&mut stream).await,
            ReadOutcome::Line("B".repeat(MAX_LINE_LEN))
        );
    }
}
