//! Selective-repeat engine: windowed, per-packet retransmission.
//!
//! # Architecture
//!
//! ```text
//!  send() ──▶ Outbound queue ──ready──▶ WindowScheduler ──spawn──▶ run_window
//!   ▲  (waits on `space`)                 (one per client/server)    │
//!   │                                                                ▼
//!   └────────── reopen / finish ◀──── AckTracker ◀── on_packet(Ack)  Link
//!
//!  on_packet(Data) ──▶ SrReceiver ──completed window──▶ Inbox ──▶ receive()
//!                          └──────── Ack / stale re-ack ──────▶ Link
//! ```
//!
//! A window's life:
//!
//! 1. The first message enqueued into an idle session sends the session to
//!    the [`WindowScheduler`], which starts one `run_window` task for it.
//! 2. After the debounce interval the queue is cut into a window, numbered
//!    1..=N in the current epoch, and every packet is sent once.
//! 3. Producers may enqueue again.  The window task sleeps until either an
//!    ack arrives or the earliest per-packet retry deadline passes; only the
//!    packets still unacknowledged at their own deadline are resent.
//! 4. Once every number is acked the epoch flips and, if messages piled up
//!    meanwhile, the session is rescheduled right away.
//!
//! Only one `run_window` task exists per session at a time: the Idle →
//! Collecting transition in [`Outbound::try_push`] happens under the queue
//! lock, and a session only leaves Idle through it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::Config;
use crate::connection::Engine;
use crate::packet::{Kind, Packet};
use crate::session::{lock, Inbox, Link, Stats, StatsSnapshot};
use crate::sr_receiver::{Received, SrReceiver};
use crate::sr_sender::{AckTracker, Outbound};
use crate::timer::{RetransmitSchedule, TimerConfig};

// ---------------------------------------------------------------------------
// WindowScheduler
// ---------------------------------------------------------------------------

/// Starts window tasks for sessions that have work, in the order they
/// became ready.
///
/// One scheduler serves every session of a client or server, so busy peers
/// are started round-robin rather than in registry order.
#[derive(Debug, Clone)]
pub struct WindowScheduler {
    ready: mpsc::UnboundedSender<SelectiveRepeat>,
}

impl WindowScheduler {
    /// Spawn the scheduling task.  Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (ready, mut rx) = mpsc::unbounded_channel::<SelectiveRepeat>();
        tokio::spawn(async move {
            while let Some(session) = rx.recv().await {
                tokio::spawn(session.run_window());
            }
            log::trace!("[sr] scheduler stopped");
        });
        Self { ready }
    }

    fn schedule(&self, session: SelectiveRepeat) {
        if self.ready.send(session).is_err() {
            log::warn!("[sr] scheduler is gone; window not started");
        }
    }
}

// ---------------------------------------------------------------------------
// SelectiveRepeat
// ---------------------------------------------------------------------------

/// Handle to one selective-repeat session.
#[derive(Debug, Clone)]
pub struct SelectiveRepeat {
    inner: Arc<Session>,
}

#[derive(Debug)]
struct Session {
    link: Link,
    timers: TimerConfig,
    scheduler: WindowScheduler,

    outbound: Mutex<Outbound>,
    /// Woken whenever the outbound queue may accept again.
    space: Notify,
    acks: Mutex<AckTracker>,
    /// Woken whenever a new number of the in-flight window is acked.
    ack_arrived: Notify,

    receiver: Mutex<SrReceiver>,
    inbox: Inbox,
    stats: Stats,
}

impl SelectiveRepeat {
    pub fn new(link: Link, config: &Config, scheduler: WindowScheduler) -> Self {
        Self {
            inner: Arc::new(Session {
                link,
                timers: config.timers,
                scheduler,
                outbound: Mutex::new(Outbound::new(config.window_cap())),
                space: Notify::new(),
                acks: Mutex::new(AckTracker::new()),
                ack_arrived: Notify::new(),
                receiver: Mutex::new(SrReceiver::new()),
                inbox: Inbox::default(),
                stats: Stats::default(),
            }),
        }
    }

    /// Form, send and supervise one window until it is fully acknowledged.
    async fn run_window(self) {
        let s = &*self.inner;
        let peer = s.link.peer();

        sleep(s.timers.debounce).await;

        let epoch = lock(&s.acks).epoch();
        let window = lock(&s.outbound).close_window(epoch);
        lock(&s.acks).open(window.size());
        s.stats.window_opened();
        log::debug!(
            "[sr] {peer}: window epoch={epoch} size={}",
            window.size()
        );

        let mut schedule = RetransmitSchedule::new(s.timers.sr_retry);
        let first_retry = Instant::now() + s.timers.sr_grace;
        for (seq, packet) in window.numbered() {
            s.link.send_lossy(packet).await;
            schedule.arm(seq, first_retry);
        }

        lock(&s.outbound).reopen();
        s.space.notify_waiters();

        loop {
            let arrived = s.ack_arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            {
                let acks = lock(&s.acks);
                schedule.retain_unacked(|seq| acks.is_acked(seq));
            }
            let Some(deadline) = schedule.next_deadline() else {
                break;
            };

            tokio::select! {
                _ = &mut arrived => {}
                _ = sleep_until(deadline) => {
                    let due = schedule.due(Instant::now());
                    if due.is_empty() {
                        continue;
                    }
                    log::debug!(
                        "[sr] {peer}: retransmitting {} of {} (epoch={epoch})",
                        due.len(),
                        window.size()
                    );
                    s.stats.retransmitted(due.len());
                    for seq in due {
                        if let Some(packet) = window.packet(seq) {
                            s.link.send_lossy(packet).await;
                        }
                    }
                }
            }
        }

        lock(&s.acks).close();
        s.stats.window_closed();
        let more = lock(&s.outbound).finish_window();
        s.space.notify_waiters();
        log::debug!("[sr] {peer}: window epoch={epoch} acknowledged");

        if more {
            s.scheduler.schedule(self.clone());
        }
    }

    fn on_ack(&self, packet: &Packet) {
        let s = &*self.inner;
        let newly = lock(&s.acks).on_ack(packet);
        if newly > 0 {
            s.ack_arrived.notify_waiters();
        } else {
            log::trace!("[sr] {}: ignored ack {:?}", s.link.peer(), packet.header.slots);
        }
    }

    async fn on_data(&self, packet: Packet) {
        let s = &*self.inner;
        let outcome = lock(&s.receiver).on_data(packet);
        match outcome {
            Received::Fresh { ack, completed } => {
                if let Some(window) = completed {
                    log::debug!(
                        "[sr] {}: delivered window of {}",
                        s.link.peer(),
                        window.len()
                    );
                    s.stats.delivered(window.len());
                    for payload in window {
                        s.inbox.deliver(payload);
                    }
                }
                s.link.send_lossy(&ack).await;
            }
            Received::Stale { ack } => {
                log::trace!("[sr] {}: re-acking stale {:?}", s.link.peer(), ack.header.slots);
                s.stats.stale();
                s.link.send_lossy(&ack).await;
            }
            Received::Dropped => {
                log::trace!("[sr] {}: dropped unusable data packet", s.link.peer());
            }
        }
    }
}

#[async_trait]
impl Engine for SelectiveRepeat {
    type Shared = WindowScheduler;

    const NAME: &'static str = "selective-repeat";

    fn shared(_config: &Config) -> WindowScheduler {
        WindowScheduler::spawn()
    }

    fn open(link: Link, config: &Config, shared: &WindowScheduler) -> Self {
        Self::new(link, config, shared.clone())
    }

    async fn on_packet(&self, packet: Packet) {
        match packet.kind() {
            Kind::Data => self.on_data(packet).await,
            Kind::Ack => self.on_ack(&packet),
            Kind::Confirm => {
                log::trace!("[sr] {}: ignoring confirm", self.inner.link.peer());
            }
        }
    }

    async fn send(&self, payload: Vec<u8>) {
        let s = &*self.inner;
        let mut payload = payload;
        loop {
            let space = s.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            let pushed = lock(&s.outbound).try_push(payload);
            match pushed {
                Ok(true) => {
                    s.scheduler.schedule(self.clone());
                    return;
                }
                Ok(false) => return,
                Err(back) => {
                    payload = back;
                    space.await;
                }
            }
        }
    }

    async fn receive(&self) -> Option<Vec<u8>> {
        self.inner.inbox.next().await
    }

    async fn flush(&self) {
        let s = &*self.inner;
        loop {
            let space = s.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            if lock(&s.outbound).is_drained() {
                return;
            }
            space.await;
        }
    }

    fn transfer_completed(&self) -> bool {
        lock(&self.inner.outbound).is_drained()
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}
