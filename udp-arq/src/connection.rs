//! Transport capability contract.
//!
//! Applications talk to either reliability strategy through two object-safe
//! traits:
//!
//! ```text
//!   Listener (server)                    Transport (one peering)
//!   ├── bind(addr)                       ├── connect(addr)
//!   └── listen() ──── new peer ────────▶ ├── send(bytes)
//!                                        ├── receive() -> bytes
//!                                        └── transfer_completed()
//! ```
//!
//! Both are implemented generically by [`crate::client::Client`] and
//! [`crate::server::Server`] over an [`Engine`]: the per-peer reliability
//! logic ([`crate::stop_and_wait::StopAndWait`] or
//! [`crate::selective_repeat::SelectiveRepeat`]).  [`Protocol`] picks one at
//! runtime.
//!
//! Transport-level trouble (loss, duplication, malformed datagrams) is
//! recovered internally and never reaches the caller.  [`ConnError`] only
//! reports misuse, such as sending before connecting.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

use crate::client::{SelectiveRepeatClient, StopAndWaitClient};
use crate::config::Config;
use crate::packet::Packet;
use crate::server::{SelectiveRepeatServer, StopAndWaitServer};
use crate::session::{Link, StatsSnapshot};
use crate::socket::SocketError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("server is not bound")]
    NotBound,
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Socket(#[from] SocketError),
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// A reliable, message-oriented channel to one remote peer.
///
/// Every `send` is received by exactly one `receive` on the other side,
/// unsplit and unmerged, in send order.
#[async_trait]
pub trait Transport: Send + Sync {
    fn connected(&self) -> bool;

    /// `true` when nothing handed to `send` is still waiting for
    /// acknowledgement.
    fn transfer_completed(&self) -> bool;

    /// Bind a local socket and start talking to `addr`.
    ///
    /// Idempotent: once connected, further calls return `Ok(())` without
    /// effect.
    async fn connect(&self, addr: SocketAddr) -> Result<(), ConnError>;

    /// Enqueue one message.  Suspends while the session is backpressured.
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnError>;

    /// Wait for the next delivered message.
    async fn receive(&self) -> Result<Vec<u8>, ConnError>;

    /// Wait until [`Transport::transfer_completed`] holds.
    async fn flush(&self) -> Result<(), ConnError>;

    fn stats(&self) -> StatsSnapshot;
}

/// The accepting side: one shared socket, one [`Transport`] per peer.
#[async_trait]
pub trait Listener: Send + Sync {
    fn connected(&self) -> bool;

    /// Bind the shared socket.  Idempotent like [`Transport::connect`].
    async fn bind(&self, addr: SocketAddr) -> Result<(), ConnError>;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Wait until a datagram arrives from a peer never seen before and return
    /// a handle bound to it.
    async fn listen(&self) -> Result<Box<dyn Transport>, ConnError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-peer reliability logic plugged into a client or server.
///
/// An engine value is a cheap handle to one session; clones share state.
/// The owning adapter feeds it every datagram from its peer through
/// [`Engine::on_packet`] and forwards application calls to it.
#[async_trait]
pub trait Engine: Clone + Send + Sync + 'static {
    /// State shared by every session of one client or server.
    type Shared: Send + Sync + 'static;

    /// Short name used in log lines.
    const NAME: &'static str;

    /// Build the shared state.  Called once per bind or connect, inside the
    /// runtime.
    fn shared(config: &Config) -> Self::Shared;

    /// Create the session for one peer.
    fn open(link: Link, config: &Config, shared: &Self::Shared) -> Self;

    /// Handle one datagram received from this session's peer.
    async fn on_packet(&self, packet: Packet);

    async fn send(&self, payload: Vec<u8>);

    /// `None` once the session can no longer deliver anything.
    async fn receive(&self) -> Option<Vec<u8>>;

    /// Resolves once everything sent so far is acknowledged.
    async fn flush(&self);

    fn transfer_completed(&self) -> bool;

    fn stats(&self) -> StatsSnapshot;
}

// ---------------------------------------------------------------------------
// Protocol selection
// ---------------------------------------------------------------------------

/// Runtime choice of reliability strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    StopAndWait,
    #[default]
    SelectiveRepeat,
}

impl Protocol {
    pub fn client(self, config: Config) -> Box<dyn Transport> {
        match self {
            Protocol::StopAndWait => Box::new(StopAndWaitClient::new(config)),
            Protocol::SelectiveRepeat => Box::new(SelectiveRepeatClient::new(config)),
        }
    }

    pub fn server(self, config: Config) -> Box<dyn Listener> {
        match self {
            Protocol::StopAndWait => Box::new(StopAndWaitServer::new(config)),
            Protocol::SelectiveRepeat => Box::new(SelectiveRepeatServer::new(config)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::StopAndWait => "stop-and-wait",
            Protocol::SelectiveRepeat => "selective-repeat",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown protocol `{0}` (expected stop-and-wait or selective-repeat)")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop-and-wait" | "stopandwait" | "saw" => Ok(Protocol::StopAndWait),
            "selective-repeat" | "selectiverepeat" | "sr" => Ok(Protocol::SelectiveRepeat),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}
