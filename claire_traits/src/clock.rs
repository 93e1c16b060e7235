use std::thread;
use std::time::{Duration, Instant};

/// Time source for the control loops and stopwatches.
///
/// Loops read `now()` to decide when a cycle phase or a rain minute is over
/// and call `sleep()` between iterations, so a simulated clock can run an
/// hour-long experiment in a test without waiting.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Whole milliseconds since `epoch`; 0 if `epoch` lies in the future.
    fn ms_since(&self, epoch: Instant) -> u64 {
        self.now().saturating_duration_since(epoch).as_millis() as u64
    }

    /// Seconds elapsed since `epoch` as a float.
    fn secs_since(&self, epoch: Instant) -> f64 {
        self.now().saturating_duration_since(epoch).as_secs_f64()
    }
}

/// Wall-clock time. Used for every run against a real or simulated device.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Simulated time for driving control loops in tests.
    ///
    /// Time starts at construction and only moves through `advance()` or
    /// `sleep()`, so a loop that sleeps its poll period steps through an
    /// experiment instantly. Clones share one timeline, which lets a test keep
    /// a handle while the loop and the mock device own theirs.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        origin: Instant,
        elapsed_ns: Arc<AtomicU64>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                elapsed_ns: Arc::new(AtomicU64::new(0)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let step = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
            // saturate instead of wrapping
            let _ = self
                .elapsed_ns
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ns| Some(ns.saturating_add(step)));
        }

        /// Simulated time since construction.
        pub fn elapsed(&self) -> Duration {
            Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

}
