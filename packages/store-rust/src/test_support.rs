//! Shared test helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conveyor_core::ClockSource;

/// A deterministic clock source for tests. Time only moves when a test
/// advances it explicitly, so orphan-threshold behavior needs no sleeps.
pub struct FixedClock {
    time: AtomicU64,
}

impl FixedClock {
    pub fn new(initial_millis: u64) -> Arc<Self> {
        Arc::new(Self {
            time: AtomicU64::new(initial_millis),
        })
    }

    pub fn advance_millis(&self, millis: u64) {
        self.time.fetch_add(millis, Ordering::Relaxed);
    }

    pub fn advance_seconds(&self, seconds: u64) {
        self.advance_millis(seconds * 1000);
    }
}

impl ClockSource for FixedClock {
    fn now_millis(&self) -> u64 {
        self.time.load(Ordering::Relaxed)
    }
}
