//! Per-peer primitives shared by both engines.
//!
//! - [`Link`] — the shared socket plus the one remote endpoint a session
//!   talks to.
//! - [`Inbox`] — FIFO of fully delivered payloads waiting for `receive`.
//! - [`Stats`] — lock-free counters describing a session's traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::packet::Packet;
use crate::socket::{Socket, SocketError};

/// Lock a std mutex, ignoring poisoning.
///
/// Session state is only ever mutated through short non-panicking critical
/// sections, so a poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The socket a session sends on, bound to one remote endpoint.
#[derive(Debug, Clone)]
pub struct Link {
    socket: Arc<Socket>,
    peer: SocketAddr,
}

impl Link {
    pub fn new(socket: Arc<Socket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), SocketError> {
        self.socket.send_to(packet, self.peer).await
    }

    /// Send and log failures instead of surfacing them.
    ///
    /// Transport-level errors are recovered by retransmission, never
    /// reported to the application.
    pub async fn send_lossy(&self, packet: &Packet) {
        if let Err(e) = self.send(packet).await {
            log::debug!("send {:?} to {} failed: {e}", packet.kind(), self.peer);
        }
    }
}

/// Completed inbound payloads, in delivery order.
#[derive(Debug)]
pub struct Inbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Default for Inbox {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Inbox {
    pub fn deliver(&self, payload: Vec<u8>) {
        // The receiver lives as long as `self`; the send cannot fail.
        let _ = self.tx.send(payload);
    }

    /// Wait for the next payload.  Concurrent callers are served in turn.
    pub async fn next(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }
}

/// Traffic counters for one session.
#[derive(Debug, Default)]
pub struct Stats {
    windows_sent: AtomicU64,
    windows_in_flight: AtomicUsize,
    max_windows_in_flight: AtomicUsize,
    retransmissions: AtomicU64,
    retransmit_rounds: AtomicU64,
    delivered: AtomicU64,
    stale_packets: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Windows started (each stop-and-wait send counts as a window of one).
    pub windows_sent: u64,
    pub windows_in_flight: usize,
    /// High-water mark of `windows_in_flight`.
    pub max_windows_in_flight: usize,
    /// Individual packets sent again after their first transmission.
    pub retransmissions: u64,
    /// Timer firings that resent at least one packet.
    pub retransmit_rounds: u64,
    /// Payloads handed to the inbox.
    pub delivered: u64,
    /// Previous-epoch data packets that were re-acknowledged.
    pub stale_packets: u64,
}

impl Stats {
    pub fn window_opened(&self) {
        self.windows_sent.fetch_add(1, Ordering::Relaxed);
        let now = self.windows_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_windows_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn window_closed(&self) {
        self.windows_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn retransmitted(&self, packets: usize) {
        self.retransmissions
            .fetch_add(packets as u64, Ordering::Relaxed);
        self.retransmit_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self, payloads: usize) {
        self.delivered.fetch_add(payloads as u64, Ordering::Relaxed);
    }

    pub fn stale(&self) {
        self.stale_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            windows_sent: self.windows_sent.load(Ordering::Relaxed),
            windows_in_flight: self.windows_in_flight.load(Ordering::SeqCst),
            max_windows_in_flight: self.max_windows_in_flight.load(Ordering::SeqCst),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            retransmit_rounds: self.retransmit_rounds.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            stale_packets: self.stale_packets.load(Ordering::Relaxed),
        }
    }
}
