//! In-process transport for driving a session without sockets.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Datagram, Transport};
use crate::error::{BindError, SendError};

#[derive(Debug, Default)]
struct Queues {
    inbound: VecDeque<(SocketAddr, Vec<u8>)>,
    outbound: VecDeque<(SocketAddr, Vec<u8>)>,
    open: bool,
}

/// Transport backed by a pair of in-memory queues.
///
/// The other end of the queues is a [`MemoryPeer`], which plays the flight controller.
/// Receives never wait; an empty queue returns immediately.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MemoryTransport {
    /// Address reported by `local_addr`
    pub local: Option<SocketAddr>,

    #[serde(skip)]
    queues: Arc<Mutex<Queues>>,
    #[serde(skip)]
    last_received_addr: Option<SocketAddr>,
}

impl MemoryTransport {
    /// A transport and the peer that talks to it
    pub fn pair() -> (Self, MemoryPeer) {
        let transport = Self::default();
        let peer = MemoryPeer {
            queues: transport.queues.clone(),
        };
        (transport, peer)
    }
}

#[typetag::serde]
impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
    }

    fn open(&mut self) -> Result<(), BindError> {
        self.close();
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open = true;
        info!("Opened in-memory transport");
        Ok(())
    }

    fn close(&mut self) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.open = false;
        queues.inbound.clear();
        self.last_received_addr = None;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn recv(&mut self, _timeout: Duration) -> Option<Datagram> {
        let (peer, payload) = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            if !queues.open {
                return None;
            }
            queues.inbound.pop_front()?
        };
        self.last_received_addr = Some(peer);
        Some(Datagram {
            payload,
            peer,
            time: Instant::now(),
        })
    }

    fn send_to(&mut self, msg: &[u8], peer: SocketAddr) -> Result<usize, SendError> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if !queues.open {
            return Err(SendError::NotOpen);
        }
        queues.outbound.push_back((peer, msg.to_vec()));
        Ok(msg.len())
    }

    fn last_peer(&self) -> Option<SocketAddr> {
        self.last_received_addr
    }
}

/// Flight controller end of a [`MemoryTransport`]
#[derive(Clone, Debug)]
pub struct MemoryPeer {
    queues: Arc<Mutex<Queues>>,
}

impl MemoryPeer {
    /// Queue a datagram from `from`; dropped if the transport is closed
    pub fn send(&self, from: SocketAddr, msg: &[u8]) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if queues.open {
            queues.inbound.push_back((from, msg.to_vec()));
        }
    }

    /// Oldest datagram sent by the transport
    pub fn recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outbound
            .pop_front()
    }

    /// Everything sent by the transport so far
    pub fn recv_all(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outbound
            .drain(..)
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9003".parse().unwrap()
    }

    #[test]
    fn passes_datagrams_both_ways() {
        let (mut t, peer) = MemoryTransport::pair();
        peer.send(addr(), b"dropped while closed");
        t.open().unwrap();
        assert!(t.recv(Duration::ZERO).is_none());

        peer.send(addr(), b"abc");
        let dgram = t.recv(Duration::ZERO).unwrap();
        assert_eq!(dgram.payload, b"abc");
        assert_eq!(t.last_peer(), Some(addr()));

        t.send_to(b"reply", addr()).unwrap();
        assert_eq!(peer.recv(), Some((addr(), b"reply".to_vec())));
        assert!(peer.recv_all().is_empty());
    }

    #[test]
    fn drain_keeps_newest() {
        let (mut t, peer) = MemoryTransport::pair();
        t.open().unwrap();
        for i in 0..10_u8 {
            peer.send(addr(), &[i]);
        }
        let first = t.recv(Duration::ZERO).unwrap();
        let (latest, drained) = t.drain_to_latest(first, 3);
        assert_eq!(latest.payload, vec![3]);
        assert_eq!(drained, 3);
    }

    #[test]
    fn close_is_seen_by_peer() {
        let (mut t, peer) = MemoryTransport::pair();
        t.open().unwrap();
        assert!(peer.is_open());
        t.close();
        assert!(!peer.is_open());
        assert!(matches!(t.send_to(b"x", addr()), Err(SendError::NotOpen)));
    }
}
