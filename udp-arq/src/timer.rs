//! Retransmission timing.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! acknowledgement arrives within a bounded time.  This module provides:
//! - [`TimerConfig`] — the fixed intervals both engines run on.  There is no
//!   RTT estimation and no back-off: a packet is retried at a constant rate
//!   until it is acknowledged.
//! - [`RetransmitSchedule`] — per-packet deadlines for one in-flight
//!   selective-repeat window.  One schedule replaces a watcher task per
//!   packet while keeping every packet's retry clock independent.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// How long a freshly scheduled window keeps collecting messages.
    pub debounce: Duration,
    /// Selective repeat: wait after the first send before the first retry.
    pub sr_grace: Duration,
    /// Selective repeat: interval between subsequent retries.
    pub sr_retry: Duration,
    /// Stop-and-wait: wait for a confirmation before the first retry.
    pub saw_grace: Duration,
    /// Stop-and-wait: interval between subsequent retries.
    pub saw_retry: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            sr_grace: Duration::from_millis(500),
            sr_retry: Duration::from_millis(500),
            saw_grace: Duration::from_secs(1),
            saw_retry: Duration::from_millis(500),
        }
    }
}

impl TimerConfig {
    /// Every interval scaled down for loopback tests.
    pub fn fast() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            sr_grace: Duration::from_millis(50),
            sr_retry: Duration::from_millis(50),
            saw_grace: Duration::from_millis(100),
            saw_retry: Duration::from_millis(50),
        }
    }
}

/// Outstanding retransmission deadlines, keyed by sequence number.
#[derive(Debug)]
pub struct RetransmitSchedule {
    retry: Duration,
    deadlines: BTreeMap<u8, Instant>,
}

impl RetransmitSchedule {
    pub fn new(retry: Duration) -> Self {
        Self {
            retry,
            deadlines: BTreeMap::new(),
        }
    }

    /// Start supervising `seq`; its first retry is due at `deadline`.
    pub fn arm(&mut self, seq: u8, deadline: Instant) {
        self.deadlines.insert(seq, deadline);
    }

    /// Drop every entry for which `acked` returns `true`.
    pub fn retain_unacked(&mut self, mut acked: impl FnMut(u8) -> bool) {
        self.deadlines.retain(|&seq, _| !acked(seq));
    }

    /// Earliest pending deadline, or `None` when nothing is outstanding.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Sequence numbers whose deadline has passed at `now`, in ascending
    /// order.  Each returned entry is re-armed one retry interval from `now`.
    pub fn due(&mut self, now: Instant) -> Vec<u8> {
        let retry = self.retry;
        self.deadlines
            .iter_mut()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(&seq, deadline)| {
                *deadline = now + retry;
                seq
            })
            .collect()
    }
}
