//! Multiplexing server.
//!
//! # Architecture
//!
//! ```text
//!                     ┌───────────────────────── Server ────────────────────┐
//!  UDP ─▶ Socket ─▶ dispatch ─▶ Registry (addr → engine) ──new peer──▶ arrivals
//!                       │             │                                    │
//!                       └─on_packet──▶ engine of that peer              listen()
//!                                                                          │
//!                                                    PeerHandle ◀──────────┘
//! ```
//!
//! One socket serves every peer.  The dispatcher looks up the source address
//! of each datagram in the [`Registry`], creating a session the first time an
//! address is seen, and hands the datagram to that session's engine.  New
//! sessions are announced to [`Listener::listen`] in order of first contact.
//! Malformed datagrams are dropped before lookup and never create a session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::{ConnError, Engine, Listener, Transport};
use crate::selective_repeat::SelectiveRepeat;
use crate::session::{lock, Link, StatsSnapshot};
use crate::socket::{Socket, SocketError};
use crate::stop_and_wait::StopAndWait;

pub type StopAndWaitServer = Server<StopAndWait>;
pub type SelectiveRepeatServer = Server<SelectiveRepeat>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Sessions of one server, keyed by remote endpoint.
#[derive(Debug)]
pub struct Registry<E> {
    peers: Mutex<HashMap<SocketAddr, E>>,
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Clone> Registry<E> {
    /// The session for `peer`, opening it with `open` if absent.
    ///
    /// The flag is `true` when this call created the session.
    pub fn get_or_open(&self, peer: SocketAddr, open: impl FnOnce() -> E) -> (E, bool) {
        let mut peers = lock(&self.peers);
        if let Some(engine) = peers.get(&peer) {
            return (engine.clone(), false);
        }
        let engine = open();
        peers.insert(peer, engine.clone());
        (engine, true)
    }

    pub fn len(&self) -> usize {
        lock(&self.peers).len()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Server<E: Engine> {
    config: Config,
    bound: OnceCell<Bound<E>>,
}

#[derive(Debug)]
struct Bound<E> {
    local_addr: SocketAddr,
    registry: Arc<Registry<E>>,
    arrivals: AsyncMutex<mpsc::UnboundedReceiver<PeerHandle<E>>>,
    dispatcher: JoinHandle<()>,
}

impl<E: Engine> Server<E> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            bound: OnceCell::new(),
        }
    }

    /// Number of peers seen so far.
    pub fn peer_count(&self) -> usize {
        self.bound.get().map_or(0, |b| b.registry.len())
    }

    /// Wait for the next new peer.
    pub async fn accept(&self) -> Result<PeerHandle<E>, ConnError> {
        let bound = self.bound.get().ok_or(ConnError::NotBound)?;
        let mut arrivals = bound.arrivals.lock().await;
        arrivals.recv().await.ok_or(ConnError::Closed)
    }

    async fn open(&self, addr: SocketAddr) -> Result<Bound<E>, ConnError> {
        let socket = Arc::new(Socket::bind_with(addr, self.config.simulator.clone()).await?);
        let local_addr = socket.local_addr;
        let registry = Arc::new(Registry::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch(
            socket,
            Arc::clone(&registry),
            self.config.clone(),
            E::shared(&self.config),
            tx,
        ));

        log::info!("[server] {} listening on {local_addr}", E::NAME);
        Ok(Bound {
            local_addr,
            registry,
            arrivals: AsyncMutex::new(rx),
            dispatcher,
        })
    }
}

impl<E: Engine> Drop for Server<E> {
    fn drop(&mut self) {
        if let Some(bound) = self.bound.get() {
            bound.dispatcher.abort();
        }
    }
}

async fn dispatch<E: Engine>(
    socket: Arc<Socket>,
    registry: Arc<Registry<E>>,
    config: Config,
    shared: E::Shared,
    arrivals: mpsc::UnboundedSender<PeerHandle<E>>,
) {
    loop {
        let (packet, from) = match socket.recv_from().await {
            Ok(received) => received,
            Err(SocketError::Packet(e)) => {
                log::trace!("[server] dropped malformed datagram: {e}");
                continue;
            }
            Err(SocketError::Io(e)) => {
                log::debug!("[server] receive failed: {e}");
                continue;
            }
        };

        let (engine, created) = registry.get_or_open(from, || {
            E::open(Link::new(Arc::clone(&socket), from), &config, &shared)
        });
        if created {
            log::info!("[server] new {} peer {from}", E::NAME);
            let handle = PeerHandle {
                engine: engine.clone(),
                peer: from,
            };
            if arrivals.send(handle).is_err() {
                log::debug!("[server] nobody listening for {from}");
            }
        }
        engine.on_packet(packet).await;
    }
}

#[async_trait]
impl<E: Engine> Listener for Server<E> {
    fn connected(&self) -> bool {
        self.bound.initialized()
    }

    async fn bind(&self, addr: SocketAddr) -> Result<(), ConnError> {
        self.bound.get_or_try_init(|| self.open(addr)).await?;
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().map(|b| b.local_addr)
    }

    async fn listen(&self) -> Result<Box<dyn Transport>, ConnError> {
        Ok(Box::new(self.accept().await?))
    }
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

/// Server-side [`Transport`] bound to one peer.
#[derive(Debug, Clone)]
pub struct PeerHandle<E> {
    engine: E,
    peer: SocketAddr,
}

impl<E> PeerHandle<E> {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl<E: Engine> Transport for PeerHandle<E> {
    fn connected(&self) -> bool {
        true
    }

    fn transfer_completed(&self) -> bool {
        self.engine.transfer_completed()
    }

    /// Already bound to its peer; nothing to do.
    async fn connect(&self, _addr: SocketAddr) -> Result<(), ConnError> {
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnError> {
        self.engine.send(payload).await;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, ConnError> {
        self.engine.receive().await.ok_or(ConnError::Closed)
    }

    async fn flush(&self) -> Result<(), ConnError> {
        self.engine.flush().await;
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    use super::*;

    #[test]
    fn registry_opens_each_peer_once() {
        let registry = Registry::default();
        let a: SocketAddr = "10.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:1".parse().unwrap();

        assert_eq!(registry.get_or_open(a, || 1), (1, true));
        assert_eq!(registry.get_or_open(a, || 2), (1, false));
        assert_eq!(registry.get_or_open(b, || 3), (3, true));
        assert_eq!(registry.get_or_open(b, || 4), (3, false));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn bind_is_idempotent() {
        let server = StopAndWaitServer::new(Config::default());
        server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(server.connected());
        assert_eq!(server.local_addr(), addr);
    }

    #[tokio::test]
    async fn malformed_datagram_creates_no_session() {
        let server = SelectiveRepeatServer::new(Config::default());
        server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&[0, 1], addr).await.unwrap();
        raw.send_to(&[7, 0, 0, 0], addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.peer_count(), 0);

        raw.send_to(&[0, 0, 0, 0, b'!'], addr).await.unwrap();
        let peer = timeout(Duration::from_secs(5), server.accept())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer.peer(), raw.local_addr().unwrap());
        assert_eq!(server.peer_count(), 1);
    }
}
