//! Optional network simulator for deterministic testing.
//!
//! Real networks drop and duplicate datagrams.  To exercise the reliability
//! mechanisms without depending on actual network conditions, a
//! [`crate::socket::Socket`] can be bound with a [`Simulator`] that decides
//! the fate of every outgoing datagram:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Duplication      | Send a datagram twice with `duplicate_rate`.     |
//!
//! Faults are applied on the sending side only, so giving both peers a
//! simulator makes the channel lossy in both directions.  The RNG is seeded,
//! which keeps a failing test reproducible.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::session::lock;

/// Configuration for the fault-injection model.
///
/// Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram that survived is sent twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }
}

/// What happens to one outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Duplicate,
}

impl Fate {
    /// How many copies go on the wire.
    pub fn copies(self) -> usize {
        match self {
            Fate::Drop => 0,
            Fate::Deliver => 1,
            Fate::Duplicate => 2,
        }
    }
}

/// A seeded fault model shared by every task sending on one socket.
#[derive(Debug)]
pub struct Simulator {
    pub config: SimulatorConfig,
    rng: Mutex<StdRng>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Roll the dice for the next datagram.
    pub fn fate(&self) -> Fate {
        let mut rng = lock(&self.rng);
        if rng.random_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            Fate::Drop
        } else if rng.random_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            Fate::Duplicate
        } else {
            Fate::Deliver
        }
    }
}
