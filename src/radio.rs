//! Radio side of the gateway.
//!
//! The LoRa modem itself lives outside this process. Frames reach us as UDP
//! datagrams from the modem bridge, one datagram per frame, and frames to
//! transmit go back the same way.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

/// Largest LoRa APRS payload we accept
pub const MAX_FRAME_LEN: usize = 512;

/// Receive buffer large enough for any UDP datagram, so oversized frames
/// are seen whole and rejected instead of truncated
const RECV_BUF_LEN: usize = 65536;

/// Byte-oriented frame radio: one call is one frame
#[async_trait]
pub trait Radio: Send {
    /// Next received frame, or `None` when nothing has arrived; never waits
    async fn try_receive(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Queue one frame for transmission
    async fn transmit(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// UDP bridge to an external LoRa modem process
pub struct UdpRadio {
    socket: UdpSocket,
    modem: SocketAddr,
    buf: Vec<u8>,
}

impl UdpRadio {
    /// Bind the local socket. Failure here is fatal for the gateway.
    pub async fn bind(listen: SocketAddr, modem: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        info!(
            "Radio bridge listening on {} (modem at {})",
            socket.local_addr()?,
            modem
        );
        Ok(Self {
            socket,
            modem,
            buf: vec![0u8; RECV_BUF_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Radio for UdpRadio {
    async fn try_receive(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.socket.try_recv_from(&mut self.buf) {
            Ok((len, from)) => {
                if from != self.modem {
                    debug!("Radio frame from unexpected address {}", from);
                }
                if len > MAX_FRAME_LEN {
                    warn!(
                        "Dropping radio frame of {} bytes from {} (limit {})",
                        len, from, MAX_FRAME_LEN
                    );
                    metrics::counter!("loragate.radio.oversized_total").increment(1);
                    return Ok(None);
                }
                trace!("Radio datagram of {} bytes from {}", len, from);
                Ok(Some(self.buf[..len].to_vec()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn transmit(&mut self, frame: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(frame, self.modem).await?;
        if sent != frame.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short radio write: {} of {} bytes", sent, frame.len()),
            ));
        }
        Ok(())
    }
}
