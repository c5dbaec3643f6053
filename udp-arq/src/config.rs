//! Transport configuration.
//!
//! A [`Config`] is handed to a client or server at construction time and
//! copied into every session it creates.  Defaults suit a real network;
//! tests usually swap in [`TimerConfig::fast`] and a [`SimulatorConfig`].

use crate::simulator::SimulatorConfig;
use crate::timer::TimerConfig;

/// Largest window, and largest outbound queue, one session may hold.
///
/// Sequence numbers run 1..=window and must fit in a header byte with 0
/// reserved for "empty slot".
pub const MAX_WINDOW: u8 = 254;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub timers: TimerConfig,
    /// Window / queue capacity, clamped to `1..=MAX_WINDOW`.
    pub max_window: u8,
    /// Fault model applied to every datagram this side sends.
    pub simulator: Option<SimulatorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timers: TimerConfig::default(),
            max_window: MAX_WINDOW,
            simulator: None,
        }
    }
}

impl Config {
    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_max_window(mut self, max_window: u8) -> Self {
        self.max_window = max_window;
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Effective window capacity.
    pub fn window_cap(&self) -> u8 {
        self.max_window.clamp(1, MAX_WINDOW)
    }
}
