//! Implementation of Transport trait for stdlib UDP socket

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fdm_bridge_shared::{FDM_ADDR, FDM_PORT_IN};

use super::{Datagram, Transport};
use crate::error::{BindError, SendError};

/// Standard MTU; servo packets are much smaller
const RXBUF_LEN: usize = 1522;

/// UDP socket listening for servo packets.
///
/// Port 0 binds an ephemeral port, which is useful for tests.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct UdpTransport {
    pub fdm_addr: String,
    pub fdm_port_in: u16,

    #[serde(skip)]
    socket: Option<UdpSocket>,
    #[serde(skip)]
    rxbuf: Vec<u8>,
    #[serde(skip)]
    last_received_addr: Option<SocketAddr>,

    // Current blocking mode of the socket, `None` for nonblocking
    #[serde(skip)]
    wait: Option<Duration>,
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(FDM_ADDR, FDM_PORT_IN)
    }
}

impl UdpTransport {
    pub fn new(fdm_addr: &str, fdm_port_in: u16) -> Self {
        Self {
            fdm_addr: fdm_addr.to_owned(),
            fdm_port_in,
            socket: None,
            rxbuf: vec![0; RXBUF_LEN],
            last_received_addr: None,
            wait: None,
        }
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.fdm_addr, self.fdm_port_in)
    }

    /// Switch between polling and bounded waits only when the mode changes
    fn set_wait(sock: &UdpSocket, current: &mut Option<Duration>, timeout: Duration) -> bool {
        let wanted = (!timeout.is_zero()).then_some(timeout);
        if *current == wanted {
            return true;
        }
        let result = match wanted {
            None => sock.set_nonblocking(true),
            Some(t) => sock
                .set_nonblocking(false)
                .and_then(|_| sock.set_read_timeout(Some(t))),
        };
        match result {
            Ok(()) => {
                *current = wanted;
                true
            }
            Err(e) => {
                debug!("Unable to set UDP socket receive timeout: {e}");
                false
            }
        }
    }
}

#[typetag::serde]
impl Transport for UdpTransport {
    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn open(&mut self) -> Result<(), BindError> {
        // Clear previous state, if there was one
        self.close();

        let addr = self.bind_addr();
        let socket = UdpSocket::bind(&addr).map_err(|source| BindError::Io {
            addr: addr.clone(),
            source,
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| BindError::Nonblocking {
                addr: addr.clone(),
                source,
            })?;

        if self.rxbuf.len() < RXBUF_LEN {
            self.rxbuf = vec![0; RXBUF_LEN];
        }
        self.wait = None;
        self.socket = Some(socket);
        info!("Flight dynamics model @ {addr} (bound)");
        Ok(())
    }

    fn close(&mut self) {
        // Drop inner socket, releasing port
        self.socket = None;
        self.rxbuf.fill(0);
        self.last_received_addr = None;
        self.wait = None;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    fn recv(&mut self, timeout: Duration) -> Option<Datagram> {
        let sock = self.socket.as_ref()?;
        if !Self::set_wait(sock, &mut self.wait, timeout) {
            return None;
        }

        let (size, peer) = sock.recv_from(&mut self.rxbuf).ok()?;
        self.last_received_addr = Some(peer);

        Some(Datagram {
            payload: self.rxbuf[..size].to_vec(),
            peer,
            time: Instant::now(),
        })
    }

    fn send_to(&mut self, msg: &[u8], peer: SocketAddr) -> Result<usize, SendError> {
        let sock = self.socket.as_ref().ok_or(SendError::NotOpen)?;
        sock.send_to(msg, peer)
            .map_err(|source| SendError::Io { peer, source })
    }

    fn last_peer(&self) -> Option<SocketAddr> {
        self.last_received_addr
    }
}
