//! Point-to-point client adapter.
//!
//! A [`Client`] binds an ephemeral local socket on [`Transport::connect`],
//! opens one engine session for the fixed remote endpoint and spawns a
//! dispatcher task that feeds it every datagram from that endpoint.
//! Datagrams from anyone else, and malformed ones, are discarded.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::{ConnError, Engine, Transport};
use crate::selective_repeat::SelectiveRepeat;
use crate::session::{Link, StatsSnapshot};
use crate::socket::{Socket, SocketError};
use crate::stop_and_wait::StopAndWait;

pub type StopAndWaitClient = Client<StopAndWait>;
pub type SelectiveRepeatClient = Client<SelectiveRepeat>;

#[derive(Debug)]
pub struct Client<E: Engine> {
    config: Config,
    bound: OnceCell<Bound<E>>,
}

#[derive(Debug)]
struct Bound<E> {
    engine: E,
    local_addr: SocketAddr,
    peer: SocketAddr,
    dispatcher: JoinHandle<()>,
}

impl<E: Engine> Client<E> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            bound: OnceCell::new(),
        }
    }

    /// Local socket address, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().map(|b| b.local_addr)
    }

    #[cfg(test)]
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.bound.get().map(|b| b.peer)
    }

    fn engine(&self) -> Result<&E, ConnError> {
        self.bound
            .get()
            .map(|b| &b.engine)
            .ok_or(ConnError::NotConnected)
    }

    async fn open(&self, peer: SocketAddr) -> Result<Bound<E>, ConnError> {
        let any: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = Arc::new(Socket::bind_with(any, self.config.simulator.clone()).await?);
        let local_addr = socket.local_addr;

        let shared = E::shared(&self.config);
        let engine = E::open(Link::new(Arc::clone(&socket), peer), &self.config, &shared);
        let dispatcher = tokio::spawn(dispatch(socket, peer, engine.clone()));

        log::info!("[client] {} session {local_addr} -> {peer}", E::NAME);
        Ok(Bound {
            engine,
            local_addr,
            peer,
            dispatcher,
        })
    }
}

impl<E: Engine> Drop for Client<E> {
    fn drop(&mut self) {
        if let Some(bound) = self.bound.get() {
            bound.dispatcher.abort();
        }
    }
}

/// Feed every datagram from `peer` to `engine`, forever.
async fn dispatch<E: Engine>(socket: Arc<Socket>, peer: SocketAddr, engine: E) {
    loop {
        match socket.recv_from().await {
            Ok((packet, from)) if from == peer => engine.on_packet(packet).await,
            Ok((_, from)) => log::trace!("[client] ignoring datagram from stranger {from}"),
            Err(SocketError::Packet(e)) => log::trace!("[client] dropped malformed datagram: {e}"),
            Err(SocketError::Io(e)) => log::debug!("[client] receive failed: {e}"),
        }
    }
}

#[async_trait]
impl<E: Engine> Transport for Client<E> {
    fn connected(&self) -> bool {
        self.bound.initialized()
    }

    fn transfer_completed(&self) -> bool {
        self.bound
            .get()
            .map_or(true, |b| b.engine.transfer_completed())
    }

    async fn connect(&self, addr: SocketAddr) -> Result<(), ConnError> {
        let bound = self.bound.get_or_try_init(|| self.open(addr)).await?;
        if bound.peer != addr {
            log::debug!(
                "[client] already connected to {}; ignoring connect to {addr}",
                bound.peer
            );
        }
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnError> {
        self.engine()?.send(payload).await;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, ConnError> {
        self.engine()?.receive().await.ok_or(ConnError::Closed)
    }

    async fn flush(&self) -> Result<(), ConnError> {
        self.engine()?.flush().await;
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.bound
            .get()
            .map(|b| b.engine.stats())
            .unwrap_or_default()
    }
}
