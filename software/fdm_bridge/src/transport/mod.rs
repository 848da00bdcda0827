//! Datagram interface between the session and the flight controller.

pub mod memory;
pub mod udp;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{BindError, SendError};

pub use memory::{MemoryPeer, MemoryTransport};
pub use udp::UdpTransport;

/// One received datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,

    /// Sender, used as the destination for state replies
    pub peer: SocketAddr,

    /// When the datagram was read off the transport
    pub time: Instant,
}

/// Connectionless, packetized transport to the flight controller.
///
/// Implementations are selected in configuration by their `type` tag.
#[typetag::serde(tag = "type")]
pub trait Transport: Send + Sync + core::fmt::Debug {
    /// Check whether the transport is already open
    fn is_open(&self) -> bool;

    /// Do any required stateful one-time setup, releasing any previous binding
    fn open(&mut self) -> Result<(), BindError>;

    /// Clear state and release the port
    fn close(&mut self);

    /// Address the transport is listening on, once open
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Receive a datagram, waiting at most `timeout`.
    /// A zero timeout only returns what is already queued.
    fn recv(&mut self, timeout: Duration) -> Option<Datagram>;

    /// Send a datagram to a specific peer
    fn send_to(&mut self, msg: &[u8], peer: SocketAddr) -> Result<usize, SendError>;

    /// Sender of the most recently received datagram
    fn last_peer(&self) -> Option<SocketAddr>;

    /// Discard queued datagrams older than the newest one.
    ///
    /// Starting from `latest`, reads without waiting until the queue is empty or
    /// `max_iterations` reads have been made, and returns the newest datagram
    /// along with how many were superseded.
    fn drain_to_latest(
        &mut self,
        latest: Datagram,
        max_iterations: usize,
    ) -> (Datagram, usize) {
        let mut latest = latest;
        let mut drained = 0;
        for _ in 0..max_iterations {
            match self.recv(Duration::ZERO) {
                Some(next) => {
                    latest = next;
                    drained += 1;
                }
                None => break,
            }
        }
        (latest, drained)
    }
}
