//! Selective-repeat receive-side state machine.
//!
//! [`SrReceiver`] reassembles one window at a time:
//!
//! - The window size is learned from the first data packet of an epoch.
//! - Every accepted packet is stored under its number (a retransmission just
//!   overwrites the same entry) and answered with an ack for that number.
//! - When the last missing number arrives the window is drained in numeric
//!   order, the map is cleared and the receive epoch flips, all in the same
//!   call.  A packet of the next epoch can therefore never meet a stale map.
//! - A packet whose current-epoch slot is empty but whose other slot is set
//!   is a retransmission from the window just completed.  It is re-acked in
//!   the previous epoch's slot and otherwise ignored, which unsticks a sender
//!   whose original ack was lost.
//!
//! Like [`crate::sr_sender`], this module performs no I/O.

use std::collections::BTreeMap;

use crate::packet::{Kind, Packet};
use crate::state::Epoch;

/// Outcome of feeding one datagram to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A packet of the current window.  `completed` holds the whole window,
    /// in order, when this packet was the last one missing.
    Fresh {
        ack: Packet,
        completed: Option<Vec<Vec<u8>>>,
    },
    /// A retransmission from the previous window.
    Stale { ack: Packet },
    /// Not a selective-repeat data packet, or out of the window's range.
    Dropped,
}

#[derive(Debug, Default)]
pub struct SrReceiver {
    epoch: Epoch,
    /// Size of the window being reassembled, once known.
    window: Option<u8>,
    pending: BTreeMap<u8, Vec<u8>>,
}

impl SrReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch of the window currently being reassembled.
    #[cfg(test)]
    fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Numbers of the current window received so far.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn on_data(&mut self, packet: Packet) -> Received {
        if packet.kind() != Kind::Data {
            return Received::Dropped;
        }

        let seq = packet.seq(self.epoch);
        if seq == 0 {
            let previous = self.epoch.other();
            let stale = packet.seq(previous);
            if stale == 0 {
                return Received::Dropped;
            }
            return Received::Stale {
                ack: Packet::ack(previous, stale, packet.header.window),
            };
        }

        let window = match self.window {
            Some(window) => window,
            None if packet.header.window == 0 => return Received::Dropped,
            None => *self.window.insert(packet.header.window),
        };
        if seq > window {
            return Received::Dropped;
        }

        self.pending.insert(seq, packet.payload);
        let ack = Packet::ack(self.epoch, seq, window);

        let completed = if self.pending.len() == window as usize {
            let payloads: Vec<Vec<u8>> = std::mem::take(&mut self.pending).into_values().collect();
            self.window = None;
            self.epoch.flip();
            Some(payloads)
        } else {
            None
        };

        Received::Fresh { ack, completed }
    }
}
