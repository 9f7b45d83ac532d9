//! In-memory radio and APRS-IS doubles for tests.
//!
//! Each double is a cheap `Clone` handle over shared state, so a test can keep
//! one handle for assertions while the gateway owns another.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::aprs_is::{Connector, LineStream, ReadOutcome, SessionError};
use crate::radio::Radio;

/// Longest a memory stream sleeps while waiting for a line
const POLL_STEP: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct ServerState {
    inbound: VecDeque<String>,
    written: Vec<Vec<u8>>,
    closed: bool,
    refuse: bool,
    auto_login: bool,
    connections: usize,
}

/// Scripted APRS-IS server
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a line for the client to read
    pub fn push_line(&self, line: &str) {
        self.lock().inbound.push_back(line.to_string());
    }

    /// Answer every login line with a verified `logresp`
    pub fn accept_logins(&self) {
        self.lock().auto_login = true;
    }

    pub fn refuse_connections(&self) {
        self.lock().refuse = true;
    }

    pub fn accept_connections(&self) {
        self.lock().refuse = false;
    }

    /// Close the current connection from the server side
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Everything the client wrote as text, one entry per write
    pub fn written(&self) -> Vec<String> {
        self.lock()
            .written
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Everything the client wrote, byte for byte
    pub fn written_bytes(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Written entries that are not login or ping lines
    pub fn written_frames(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .filter(|text| !text.starts_with("user ") && !text.starts_with('#'))
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }
}

/// [`Connector`] handing out streams attached to a [`MemoryServer`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, server: &str, port: u16) -> Result<Box<dyn LineStream>, SessionError> {
        let mut state = self.server.lock();
        if state.refuse {
            return Err(SessionError::Connect {
                server: format!("{}:{}", server, port),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        state.closed = false;
        state.connections += 1;
        drop(state);

        Ok(Box::new(MemoryStream {
            server: self.server.clone(),
            peer: format!("{}:{}", server, port),
        }))
    }
}

struct MemoryStream {
    server: MemoryServer,
    peer: String,
}

impl MemoryStream {
    fn next_outcome(&self) -> Option<ReadOutcome> {
        let mut state = self.server.lock();
        if let Some(line) = state.inbound.pop_front() {
            return Some(ReadOutcome::Line(line));
        }
        if state.closed {
            return Some(ReadOutcome::Closed);
        }
        None
    }
}

#[async_trait]
impl LineStream for MemoryStream {
    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.server.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        }
        state.written.push(bytes.to_vec());
        let text = String::from_utf8_lossy(bytes);
        if state.auto_login && text.starts_with("user ") {
            let callsign = text.split_whitespace().nth(1).unwrap_or("N0CALL").to_string();
            state
                .inbound
                .push_back(format!("# logresp {} verified, server T2TEST", callsign));
        }
        Ok(())
    }

    async fn read_line(&mut self, wait: Duration) -> io::Result<ReadOutcome> {
        if let Some(outcome) = self.next_outcome() {
            return Ok(outcome);
        }
        if wait.is_zero() {
            return Ok(ReadOutcome::Pending);
        }
        tokio::time::sleep(wait.min(POLL_STEP)).await;
        Ok(self.next_outcome().unwrap_or(ReadOutcome::Pending))
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[derive(Debug, Default)]
struct RadioState {
    inbound: VecDeque<Vec<u8>>,
    transmitted: Vec<Vec<u8>>,
}

/// Radio that records transmissions and replays queued receptions
#[derive(Debug, Clone, Default)]
pub struct MemoryRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a frame as if heard over the air
    pub fn hear(&self, frame: &str) {
        self.lock().inbound.push_back(frame.as_bytes().to_vec());
    }

    /// Transmitted frames, byte for byte
    pub fn transmitted_bytes(&self) -> Vec<Vec<u8>> {
        self.lock().transmitted.clone()
    }

    /// Transmitted frames as text
    pub fn transmitted(&self) -> Vec<String> {
        self.lock()
            .transmitted
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }
}

#[async_trait]
impl Radio for MemoryRadio {
    async fn try_receive(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock().inbound.pop_front())
    }

    async fn transmit(&mut self, frame: &[u8]) -> io::Result<()> {
        self.lock().transmitted.push(frame.to_vec());
        Ok(())
    }
}
