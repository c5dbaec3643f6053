//! Selective-repeat send-side state machine.
//!
//! Three pieces of per-session state live here:
//! - [`Outbound`] — the bounded queue applications enqueue into, plus the
//!   window-cycle state ([`SenderState`]) that gates it.
//! - [`Window`] — one closed batch of numbered packets sharing an epoch.
//! - [`AckTracker`] — which numbers of the in-flight window the peer has
//!   acknowledged, and the epoch the next window will use.
//!
//! # Protocol contract
//!
//! - At most one window is in flight per session; the next one forms only
//!   after every number of the current one is acknowledged.
//! - Numbers within a window are dense, 1..=N in enqueue order.
//! - Acks are **selective**: each names one number, and only the slot of the
//!   current send epoch counts.  Acks in the other slot belong to the
//!   previous window and are ignored.
//!
//! This module only manages state; all socket I/O and timing is the
//! caller's responsibility.

use std::collections::{BTreeSet, VecDeque};

use crate::packet::{Kind, Packet};
use crate::state::{Epoch, SenderState};

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Bounded outbound queue of one session.
#[derive(Debug)]
pub struct Outbound {
    queue: VecDeque<Vec<u8>>,
    capacity: usize,
    /// Cleared while a window is mid-formation.
    accepting: bool,
    state: SenderState,
}

impl Outbound {
    pub fn new(capacity: u8) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity as usize),
            capacity: capacity.max(1) as usize,
            accepting: true,
            state: SenderState::Idle,
        }
    }

    /// `true` while producers must wait.
    pub fn is_backpressured(&self) -> bool {
        self.queue.len() >= self.capacity || !self.accepting
    }

    /// Enqueue `payload` unless backpressured, in which case it is handed
    /// back unchanged.
    ///
    /// Returns `Ok(true)` when the session was idle: it has just moved to
    /// [`SenderState::Collecting`] and the caller must schedule a window.
    pub fn try_push(&mut self, payload: Vec<u8>) -> Result<bool, Vec<u8>> {
        if self.is_backpressured() {
            return Err(payload);
        }
        self.queue.push_back(payload);
        if self.state.is_idle() {
            self.state = SenderState::Collecting;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Close acceptance and cut a window from everything queued so far.
    ///
    /// Numbers are assigned 1..=N in enqueue order, N capped at the queue
    /// capacity.
    pub fn close_window(&mut self, epoch: Epoch) -> Window {
        debug_assert_eq!(self.state, SenderState::Collecting);
        self.accepting = false;
        self.state = SenderState::InFlight;
        let take = self.queue.len().min(self.capacity);
        Window::form(epoch, self.queue.drain(..take))
    }

    /// First transmissions are done; let producers enqueue again.
    pub fn reopen(&mut self) {
        self.accepting = true;
        self.state = SenderState::Draining;
    }

    /// The window is fully acknowledged.
    ///
    /// Returns `true` when more messages are already waiting; the session
    /// then stays scheduled ([`SenderState::Collecting`]) and the caller must
    /// start the next window.
    pub fn finish_window(&mut self) -> bool {
        self.accepting = true;
        if self.queue.is_empty() {
            self.state = SenderState::Idle;
            false
        } else {
            self.state = SenderState::Collecting;
            true
        }
    }

    /// Nothing queued and no window in flight.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && self.state.is_idle()
    }

    #[cfg(test)]
    fn state(&self) -> SenderState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// One batch of numbered data packets sent in a single epoch.
#[derive(Debug, Clone)]
pub struct Window {
    pub epoch: Epoch,
    /// `packets[i]` carries sequence number `i + 1`.
    packets: Vec<Packet>,
}

impl Window {
    /// Number `payloads` 1..=N within `epoch`.
    ///
    /// At most 254 payloads fit a window; callers cap the batch first.
    pub fn form(epoch: Epoch, payloads: impl ExactSizeIterator<Item = Vec<u8>>) -> Self {
        let size = payloads.len() as u8;
        let packets = payloads
            .zip(1..=size)
            .map(|(payload, seq)| Packet::data(epoch, seq, size, payload))
            .collect();
        Self { epoch, packets }
    }

    pub fn size(&self) -> u8 {
        self.packets.len() as u8
    }

    /// The packet numbered `seq`, if it belongs to this window.
    pub fn packet(&self, seq: u8) -> Option<&Packet> {
        (seq as usize)
            .checked_sub(1)
            .and_then(|i| self.packets.get(i))
    }

    /// `(seq, packet)` pairs in ascending order.
    pub fn numbered(&self) -> impl Iterator<Item = (u8, &Packet)> {
        (1..=self.size()).zip(self.packets.iter())
    }
}

// ---------------------------------------------------------------------------
// AckTracker
// ---------------------------------------------------------------------------

/// Acknowledgement bookkeeping for the in-flight window.
#[derive(Debug, Default)]
pub struct AckTracker {
    /// Epoch of the in-flight window, or of the next one when idle.
    epoch: Epoch,
    /// Size of the in-flight window; 0 when none.
    window: u8,
    acked: BTreeSet<u8>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Start tracking a window of `size` packets.
    pub fn open(&mut self, size: u8) {
        self.window = size;
        self.acked.clear();
    }

    /// Record the acknowledgement carried by `packet`.
    ///
    /// Returns how many numbers were newly acknowledged (0 or 1).  Acks for
    /// the other epoch, for numbers outside the window, for an already acked
    /// number, or arriving while no window is open have no effect.
    pub fn on_ack(&mut self, packet: &Packet) -> usize {
        if packet.kind() != Kind::Ack || self.window == 0 {
            return 0;
        }
        let seq = packet.seq(self.epoch);
        if seq == 0 || seq > self.window {
            return 0;
        }
        usize::from(self.acked.insert(seq))
    }

    pub fn is_acked(&self, seq: u8) -> bool {
        self.acked.contains(&seq)
    }

    /// `true` when a window is open and every number in it is acknowledged.
    #[cfg(test)]
    fn all_acked(&self) -> bool {
        self.window > 0 && self.acked.len() == self.window as usize
    }

    /// Retire the window: forget its acks and flip to the next epoch.
    pub fn close(&mut self) {
        self.window = 0;
        self.acked.clear();
        self.epoch.flip();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
