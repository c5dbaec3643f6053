//! Stop-and-wait engine: one message in flight, one confirmation.
//!
//! # Contract
//! - At most **one** data packet is outstanding per session.  Concurrent
//!   `send` callers queue on an async lock and go out one at a time.
//! - Data packets carry no sequence number (both slots zero).  The sender
//!   resends the same packet until any confirmation arrives: a wait of
//!   `saw_grace` after the first send, then `saw_retry` between resends,
//!   forever.
//! - The receiver hands every data packet to the application and answers it
//!   with a Confirm.  Nothing is deduplicated, so a lost Confirm makes the
//!   peer deliver that message twice; a late duplicate Confirm may likewise
//!   confirm the next message early.  Both follow from the unnumbered wire
//!   format.
//! - Either an Ack or a Confirm datagram counts as a confirmation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;

use crate::config::Config;
use crate::connection::Engine;
use crate::packet::{Kind, Packet};
use crate::session::{Inbox, Link, Stats, StatsSnapshot};
use crate::timer::TimerConfig;

/// Handle to one stop-and-wait session.
#[derive(Debug, Clone)]
pub struct StopAndWait {
    inner: Arc<Session>,
}

#[derive(Debug)]
struct Session {
    link: Link,
    timers: TimerConfig,
    /// Bumped on every confirmation received.
    confirms: watch::Sender<u64>,
    /// Held for the whole life of one outstanding message.
    outstanding: AsyncMutex<()>,
    inbox: Inbox,
    stats: Stats,
}

impl StopAndWait {
    pub fn new(link: Link, config: &Config) -> Self {
        let (confirms, _) = watch::channel(0);
        Self {
            inner: Arc::new(Session {
                link,
                timers: config.timers,
                confirms,
                outstanding: AsyncMutex::new(()),
                inbox: Inbox::default(),
                stats: Stats::default(),
            }),
        }
    }
}

#[async_trait]
impl Engine for StopAndWait {
    type Shared = ();

    const NAME: &'static str = "stop-and-wait";

    fn shared(_config: &Config) -> Self::Shared {}

    fn open(link: Link, config: &Config, _shared: &()) -> Self {
        Self::new(link, config)
    }

    async fn on_packet(&self, packet: Packet) {
        let s = &*self.inner;
        match packet.kind() {
            Kind::Data => {
                log::trace!("[saw] {}: data len={}", s.link.peer(), packet.payload.len());
                s.stats.delivered(1);
                s.inbox.deliver(packet.payload);
                s.link.send_lossy(&Packet::confirm()).await;
            }
            Kind::Ack | Kind::Confirm => {
                s.confirms.send_modify(|n| *n = n.wrapping_add(1));
            }
        }
    }

    async fn send(&self, payload: Vec<u8>) {
        let s = &*self.inner;
        let _turn = s.outstanding.lock().await;

        // A fresh subscription treats every earlier confirmation as seen.
        let mut confirmed = s.confirms.subscribe();
        let packet = Packet::single(payload);

        s.stats.window_opened();
        s.link.send_lossy(&packet).await;

        let mut wait = s.timers.saw_grace;
        loop {
            match timeout(wait, confirmed.changed()).await {
                Ok(_) => break,
                Err(_) => {
                    log::debug!(
                        "[saw] {}: no confirm after {wait:?}; resending",
                        s.link.peer()
                    );
                    s.stats.retransmitted(1);
                    s.link.send_lossy(&packet).await;
                    wait = s.timers.saw_retry;
                }
            }
        }
        s.stats.window_closed();
    }

    async fn receive(&self) -> Option<Vec<u8>> {
        self.inner.inbox.next().await
    }

    async fn flush(&self) {
        // The lock is fair: this waits out every send queued before it.
        drop(self.inner.outstanding.lock().await);
    }

    fn transfer_completed(&self) -> bool {
        self.inner.outstanding.try_lock().is_ok()
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}
