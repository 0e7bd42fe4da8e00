//! Release clock for periodic activation
//!
//! The controller keeps a release grid `anchor + k * period` expressed in
//! offsets from the clock base and suspends on it through [`PeriodClock`].
//! Sleeping to absolute targets keeps the grid free of drift: a late wake-up
//! shortens the next wait instead of shifting every later release.

use std::time::{Duration, Instant};

/// Time source with absolute-deadline suspension
pub trait PeriodClock {
    /// Time elapsed since the clock base
    fn now(&self) -> Duration;

    /// Suspend until `now() >= target`; returns immediately if already past
    fn sleep_until(&mut self, target: Duration);
}

/// Wall-clock implementation backed by the monotonic `Instant`
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.base.elapsed()
    }

    fn sleep_until(&mut self, target: Duration) {
        // thread::sleep may wake early on some platforms
        loop {
            let now = self.now();
            if now >= target {
                return;
            }
            std::thread::sleep(target - now);
        }
    }
}

/// One observed periodic release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Activation number, starting at 1 for the first release after
    /// entering real-time mode
    pub index: u64,
    /// Scheduled release instant on the grid
    pub scheduled: Duration,
    /// Instant the task actually resumed
    pub observed: Duration,
}

impl Release {
    /// How late the release was observed (scheduler jitter or overrun)
    pub fn lateness(&self) -> Duration {
        self.observed.saturating_sub(self.scheduled)
    }

    /// Absolute deadline of the job released here
    pub fn absolute_deadline(&self, relative_deadline: Duration) -> Duration {
        self.scheduled + relative_deadline
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::PeriodClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Software clock for tests
    ///
    /// Clones share the same time, so a test can keep a handle and advance
    /// time from inside a job while the controller owns another clone.
    #[derive(Debug, Clone, Default)]
    pub struct ManualClock {
        now_us: Arc<AtomicU64>,
        sleeps: Arc<AtomicU64>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Advance time by `delta` (simulates work being done)
        pub fn advance(&self, delta: Duration) {
            self.now_us
                .fetch_add(delta.as_micros() as u64, Ordering::Relaxed);
        }

        /// Number of times a caller actually had to suspend
        pub fn sleeps(&self) -> u64 {
            self.sleeps.load(Ordering::Relaxed)
        }
    }

    impl PeriodClock for ManualClock {
        fn now(&self) -> Duration {
            Duration::from_micros(self.now_us.load(Ordering::Relaxed))
        }

        fn sleep_until(&mut self, target: Duration) {
            let target_us = target.as_micros() as u64;
            let previous = self.now_us.fetch_max(target_us, Ordering::Relaxed);
            if previous < target_us {
                self.sleeps.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
