//! Finite-state-machine types shared by the reliability engines.
//!
//! Two pieces of state drive the selective-repeat engine:
//! - [`Epoch`] — the single alternating bit that tells consecutive windows
//!   apart, so that sequence numbers 1..N can be reused without ambiguity.
//! - [`SenderState`] — where one session's outbound side sits in its window
//!   cycle.
//!
//! Transitions are driven from [`crate::selective_repeat`]; this module only
//! defines the types.

use std::fmt;

/// One-bit window generation.
///
/// Each window is sent entirely within one epoch.  Both peers start in
/// [`Epoch::Zero`] and flip once per fully acknowledged (sender) or fully
/// reassembled (receiver) window, so they stay in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Epoch {
    #[default]
    Zero,
    One,
}

impl Epoch {
    /// Index of this epoch's sequence slot in the packet header.
    pub fn index(self) -> usize {
        match self {
            Epoch::Zero => 0,
            Epoch::One => 1,
        }
    }

    /// The epoch of the previous (and next) window.
    pub fn other(self) -> Self {
        match self {
            Epoch::Zero => Epoch::One,
            Epoch::One => Epoch::Zero,
        }
    }

    pub fn flip(&mut self) {
        *self = self.other();
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Outbound window cycle of one session.
///
/// ```text
///   Idle ──enqueue──▶ Collecting ──debounce elapsed──▶ InFlight
///    ▲                                                    │
///    │                                      first sends   │
///    │                                      returned      ▼
///    └──────────── every number acknowledged ──────── Draining
/// ```
///
/// Everything except `Idle` counts as "a window in flight": no second window
/// may start for the same session until the cycle returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing queued and nothing outstanding.
    #[default]
    Idle,
    /// A window has been scheduled; messages keep accumulating during the
    /// debounce interval.
    Collecting,
    /// The window is closed to new messages and its first transmissions are
    /// going out.
    InFlight,
    /// The queue accepts messages again; the window waits for its last acks.
    Draining,
}

impl SenderState {
    pub fn is_idle(self) -> bool {
        self == SenderState::Idle
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
