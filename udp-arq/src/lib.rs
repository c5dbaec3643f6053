//! `udp-arq` — reliable, ordered, message-oriented delivery over UDP.
//!
//! # Architecture
//!
//! ```text
//!  Application ── send / receive ──┐          ┌── listen ── Application
//!                                  ▼          ▼
//!                        ┌──────────────┐  ┌───────────────────────────┐
//!                        │    Client    │  │ Server (Registry of peers) │
//!                        └──────┬───────┘  └────────────┬──────────────┘
//!                               │ one Engine per peer   │
//!                 ┌─────────────┴───────────┬───────────┴───┐
//!                 │ StopAndWait             │ SelectiveRepeat│
//!                 │ (one packet, confirm)   │ (windows of ≤254, per-packet
//!                 │                         │  retransmit, 1-bit epoch)
//!                 └─────────────┬───────────┴───────────────┘
//!                               │ Packet (4-byte header + payload)
//!                        ┌──────▼──────┐
//!                        │   Socket    │  (tokio UdpSocket + optional Simulator)
//!                        └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]           — wire format (serialise / deserialise)
//! - [`connection`]       — `Transport` / `Listener` contract, `Engine` trait, errors
//! - [`client`]           — point-to-point adapter
//! - [`server`]           — multiplexing server and peer registry
//! - [`selective_repeat`] — windowed engine and its window scheduler
//! - [`sr_sender`]        — outbound queue, window formation, ack bookkeeping
//! - [`sr_receiver`]      — window reassembly and stale-packet detection
//! - [`stop_and_wait`]    — single-outstanding-packet engine
//! - [`session`]          — per-peer link, inbox and counters
//! - [`state`]            — epoch and sender-cycle types
//! - [`timer`]            — retransmission intervals and deadlines
//! - [`config`]           — tunables
//! - [`simulator`]        — optional lossy network layer for testing
//! - [`socket`]           — async UDP socket abstraction
//! - [`transfer`]         — file transfer built on the public contract

pub mod client;
pub mod config;
pub mod connection;
pub mod packet;
pub mod selective_repeat;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod stop_and_wait;
pub mod timer;
pub mod transfer;

pub use client::{Client, SelectiveRepeatClient, StopAndWaitClient};
pub use config::{Config, MAX_WINDOW};
pub use connection::{ConnError, Engine, Listener, Protocol, Transport};
pub use server::{PeerHandle, SelectiveRepeatServer, Server, StopAndWaitServer};
pub use session::StatsSnapshot;
pub use simulator::SimulatorConfig;
pub use timer::TimerConfig;
