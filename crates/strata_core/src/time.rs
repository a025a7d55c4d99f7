//! Frame clocks.
//!
//! Deadlines are absolute timestamps in nanoseconds on a monotonic clock.
//! Background work reads the current time through [`Clock`] so tests can
//! drive it by hand.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of monotonic time in nanoseconds.
pub trait Clock {
    /// Returns the current time in nanoseconds since the clock's origin.
    fn now_nanos(&self) -> u64;

    /// Returns the absolute deadline `budget` from now.
    fn deadline_after(&self, budget: Duration) -> u64 {
        let budget = u64::try_from(budget.as_nanos()).unwrap_or(u64::MAX);
        self.now_nanos().saturating_add(budget)
    }
}

/// Wall-clock backed monotonic time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for deterministic scheduling tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// Creates a clock reading `start` nanoseconds.
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Advances the clock by `nanos`.
    pub fn advance(&self, nanos: u64) {
        self.now.set(self.now.get().saturating_add(nanos));
    }

    /// Sets the clock to an absolute reading.
    pub fn set(&self, nanos: u64) {
        self.now.set(nanos);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.now.get()
    }
}
