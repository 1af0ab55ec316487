//! Live/steady mode controller.
//!
//! A single task owns the mode. Range requests land in a one-element slot
//! where a newer request replaces an unread one, so a burst of requests
//! collapses into the most recent. A live request starts a session that runs
//! a cycle every tick until it expires, then reverts to the steady range with
//! one final cycle. Each session carries an id; timer events from a session
//! that has since been replaced are dropped.

use crate::config::LiveConfig;
use crate::cycle::CycleRunner;
use mwp_query::{InvalidRangeError, RangeToken};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info};

/// What the controller is currently doing.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeState {
    /// Waiting for requests; `steady` is the range reverted to after live.
    Idle { steady: RangeToken },
    Live {
        session: u64,
        since: Instant,
        expires_at: Instant,
    },
    Stopped,
}

impl ModeState {
    pub fn is_live(&self) -> bool {
        matches!(self, ModeState::Live { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    Range(RangeToken),
    Shutdown,
}

/// Holding slot of size one. A new signal overwrites one not yet taken,
/// except that a pending shutdown is never overwritten.
#[derive(Debug, Default)]
pub struct SignalSlot {
    pending: Mutex<Option<ControlSignal>>,
    notify: Notify,
}

impl SignalSlot {
    /// Stores `signal`, returning the unread signal it replaced.
    pub fn offer(&self, signal: ControlSignal) -> Option<ControlSignal> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*pending, Some(ControlSignal::Shutdown)) {
            return Some(signal);
        }
        let replaced = pending.replace(signal);
        drop(pending);
        self.notify.notify_one();
        replaced
    }

    pub fn take(&self) -> Option<ControlSignal> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Waits for the next signal. Cancel safe: a signal is only removed
    /// from the slot when this future completes.
    pub async fn next(&self) -> ControlSignal {
        loop {
            if let Some(signal) = self.take() {
                return signal;
            }
            self.notify.notified().await;
        }
    }
}

/// Cloneable handle used by intake paths to steer the controller.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    slot: Arc<SignalSlot>,
    mode: watch::Receiver<ModeState>,
}

impl ControlHandle {
    pub fn request(&self, range: RangeToken) {
        if let Some(ControlSignal::Range(dropped)) = self.slot.offer(ControlSignal::Range(range)) {
            debug!(range = %dropped, "pending range request superseded");
        }
    }

    /// Parses and enqueues a raw range token.
    pub fn submit(&self, raw: &str) -> Result<(), InvalidRangeError> {
        self.request(RangeToken::parse(raw)?);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.slot.offer(ControlSignal::Shutdown);
    }

    pub fn mode(&self) -> ModeState {
        self.mode.borrow().clone()
    }

    pub fn watch_mode(&self) -> watch::Receiver<ModeState> {
        self.mode.clone()
    }
}

struct LiveSession {
    id: u64,
    ticker: Interval,
    expiry: Pin<Box<Sleep>>,
}

enum LiveEvent {
    Tick(u64),
    Expired(u64),
}

enum Event {
    Signal(ControlSignal),
    Live(LiveEvent),
}

/// Expiry wins over a tick that falls due at the same instant.
async fn next_live_event(session: &mut Option<LiveSession>) -> LiveEvent {
    match session {
        Some(session) => {
            let id = session.id;
            tokio::select! {
                biased;
                _ = &mut session.expiry => LiveEvent::Expired(id),
                _ = session.ticker.tick() => LiveEvent::Tick(id),
            }
        }
        None => std::future::pending().await,
    }
}

pub struct ModeController {
    cycles: CycleRunner,
    live: LiveConfig,
    steady: RangeToken,
    session: Option<LiveSession>,
    last_session: u64,
    slot: Arc<SignalSlot>,
    mode: watch::Sender<ModeState>,
}

impl ModeController {
    pub fn new(cycles: CycleRunner, live: LiveConfig, steady: RangeToken) -> (Self, ControlHandle) {
        let slot = Arc::new(SignalSlot::default());
        let (mode_tx, mode_rx) = watch::channel(ModeState::Idle {
            steady: steady.clone(),
        });
        let controller = Self {
            cycles,
            live,
            steady,
            session: None,
            last_session: 0,
            slot: slot.clone(),
            mode: mode_tx,
        };
        let handle = ControlHandle {
            slot,
            mode: mode_rx,
        };
        (controller, handle)
    }

    /// Runs the startup cycle for the steady range, then serves signals and
    /// live timers until shutdown.
    pub async fn run(mut self) {
        info!(range = %self.steady, "initial cycle");
        self.run_cycle(&self.steady).await;

        loop {
            let event = tokio::select! {
                biased;
                signal = self.slot.next() => Event::Signal(signal),
                live = next_live_event(&mut self.session) => Event::Live(live),
            };

            match event {
                Event::Signal(ControlSignal::Shutdown) => break,
                Event::Signal(ControlSignal::Range(range)) => self.on_range(range).await,
                Event::Live(LiveEvent::Tick(id)) => self.on_tick(id).await,
                Event::Live(LiveEvent::Expired(id)) => self.on_expiry(id).await,
            }
        }

        self.session = None;
        self.mode.send_replace(ModeState::Stopped);
        info!("mode controller stopped");
    }

    async fn on_range(&mut self, range: RangeToken) {
        if range.is_live() {
            self.start_session();
            self.run_cycle(&RangeToken::Live).await;
        } else {
            if let Some(session) = self.session.take() {
                info!(session = session.id, "live session cancelled by steady request");
            }
            info!(range = %range, "steady range selected");
            self.steady = range;
            self.mode.send_replace(ModeState::Idle {
                steady: self.steady.clone(),
            });
            self.run_cycle(&self.steady).await;
        }
    }

    /// Replaces any running session with a fresh one starting now.
    fn start_session(&mut self) {
        if let Some(previous) = self.session.take() {
            debug!(session = previous.id, "live session restarted");
        }
        self.last_session += 1;

        let since = Instant::now();
        let expires_at = since + self.live.session_duration();
        let period = self.live.tick_interval();
        let mut ticker = time::interval_at(since + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.session = Some(LiveSession {
            id: self.last_session,
            ticker,
            expiry: Box::pin(time::sleep_until(expires_at)),
        });
        self.mode.send_replace(ModeState::Live {
            session: self.last_session,
            since,
            expires_at,
        });
        info!(
            session = self.last_session,
            duration = ?self.live.session_duration(),
            "live session started"
        );
    }

    /// Failures are logged by the runner and leave the mode unchanged.
    async fn run_cycle(&self, range: &RangeToken) {
        let _ = self.cycles.run(range).await;
    }

    fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(id)
    }

    async fn on_tick(&mut self, id: u64) {
        if !self.is_current(id) {
            debug!(session = id, "stale live tick ignored");
            return;
        }
        self.run_cycle(&RangeToken::Live).await;
    }

    async fn on_expiry(&mut self, id: u64) {
        if !self.is_current(id) {
            debug!(session = id, "stale live expiry ignored");
            return;
        }
        self.session = None;
        info!(session = id, range = %self.steady, "live session expired, reverting to steady range");
        self.mode.send_replace(ModeState::Idle {
            steady: self.steady.clone(),
        });
        self.run_cycle(&self.steady).await;
    }
}
