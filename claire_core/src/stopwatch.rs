//! Countdown latch used to schedule actuator toggling.
//!
//! A stopwatch is a three-state machine: `Ready` (idle), `Running` (counting
//! toward an end time) and `Finished` (deadline passed, not yet observed).
//! A background thread moves `Running` to `Finished` on a 50 ms poll; the
//! consuming transition `Finished -> Ready` happens only in
//! [`Stopwatch::is_finished`], so every expiry is reported exactly once.
//!
//! Safety: each stopwatch owns one thread, joined by `stop()` or on drop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use claire_traits::Clock;

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Ready,
    Running,
    Finished,
}

/// Result of [`Stopwatch::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// The watch was not `Ready`; the previous countdown was discarded.
    Restarted(WatchState),
}

#[derive(Debug)]
struct Inner {
    state: WatchState,
    end: Instant,
}

impl Inner {
    fn advance(&mut self, now: Instant) {
        if self.state == WatchState::Running && now >= self.end {
            self.state = WatchState::Finished;
        }
    }
}

pub struct Stopwatch<C: Clock + Clone + Send + 'static> {
    clock: C,
    inner: Arc<Mutex<Inner>>,
    stopped: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl<C: Clock + Clone + Send + 'static> Stopwatch<C> {
    pub fn new(clock: C) -> Self {
        Self::with_state(clock, WatchState::Ready)
    }

    /// Start in a given state; `Finished` makes the first `is_finished()`
    /// fire immediately, which is how control loops prime their actions.
    pub fn with_state(clock: C, initial: WatchState) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            state: initial,
            end: clock.now(),
        }));
        let stopped = Arc::new(AtomicBool::new(false));

        let (inner_t, stopped_t, clock_t) = (inner.clone(), stopped.clone(), clock.clone());
        let join_handle = std::thread::spawn(move || {
            while !stopped_t.load(Ordering::Relaxed) {
                {
                    let mut g = inner_t.lock().unwrap_or_else(PoisonError::into_inner);
                    g.advance(clock_t.now());
                }
                std::thread::park_timeout(POLL_INTERVAL);
            }
            tracing::trace!("stopwatch thread exiting cleanly");
        });

        Self {
            clock,
            inner,
            stopped,
            join_handle: Some(join_handle),
        }
    }

    /// Arm the countdown. Restarting a watch that is not `Ready` is allowed
    /// and reported as [`StartOutcome::Restarted`] with a warning.
    pub fn start(&self, duration: Duration) -> StartOutcome {
        let now = self.clock.now();
        let mut g = self.lock();
        let previous = g.state;
        g.end = now + duration;
        g.state = WatchState::Running;
        if previous == WatchState::Ready {
            StartOutcome::Started
        } else {
            tracing::warn!(?previous, "stopwatch was not ready; restarted");
            StartOutcome::Restarted(previous)
        }
    }

    /// True exactly once per expiry; resets the watch to `Ready`.
    pub fn is_finished(&self) -> bool {
        let now = self.clock.now();
        let mut g = self.lock();
        g.advance(now);
        if g.state == WatchState::Finished {
            g.state = WatchState::Ready;
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> WatchState {
        let now = self.clock.now();
        let mut g = self.lock();
        g.advance(now);
        g.state
    }

    /// Stop and join the background thread.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            handle.thread().unpark();
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "stopwatch thread panicked during shutdown");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.join_handle.is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + Clone + Send + 'static> Drop for Stopwatch<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
