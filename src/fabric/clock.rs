//! Back-off Clock.
//!
//! Retry loops wait between attempts through a `Sleeper`, so production code
//! can spin on the real clock while tests advance a manual clock and assert
//! on the exact delays that were requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something that can wait for a given duration.
pub trait Sleeper {
    /// Waits for `duration` before returning.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the host thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on.
///
/// Clones share the same elapsed counter, so a test can keep one handle while
/// the runtime owns another.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    elapsed_ns: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time slept through this clock.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Relaxed))
    }

    /// Number of individual sleeps requested.
    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::Relaxed)
    }
}

impl Sleeper for ManualClock {
    fn sleep(&mut self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
        self.sleeps.fetch_add(1, Ordering::Relaxed);
    }
}
