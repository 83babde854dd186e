//! Monotonic time source and the shared tick counter.
//!
//! Every component in the guardian reads time through [`TimeBase`] so
//! that tests can substitute a manual clock and advance it
//! deterministically. Wall-clock time is never consulted; all stamps
//! (suppressions, cool-downs, budgets) assume a monotonic source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::id::TickId;

/// Monotonic nanosecond source.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin.
    fn now_nanos(&self) -> u64;

    /// Milliseconds since the same origin.
    fn now_millis(&self) -> u64 {
        self.now_nanos() / 1_000_000
    }
}

/// Production clock backed by [`Instant`], anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        // A u64 of nanoseconds spans ~584 years from the origin.
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Shared time base: a clock plus the host-driven tick counter.
///
/// The host advances the tick counter exactly once per main-loop
/// iteration; everything else (timers, samplers, schedulers) reads it.
pub struct TimeBase {
    clock: Arc<dyn Clock>,
    tick: AtomicU64,
}

impl TimeBase {
    /// Create a time base over the given clock, starting at tick 0.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tick: AtomicU64::new(0),
        }
    }

    /// Advance the tick counter by one and return the new tick.
    ///
    /// Main thread only.
    pub fn advance_tick(&self) -> TickId {
        TickId(self.tick.fetch_add(1, Ordering::Release) + 1)
    }

    /// The most recently advanced tick.
    pub fn current_tick(&self) -> TickId {
        TickId(self.tick.load(Ordering::Acquire))
    }

    /// Nanoseconds from the underlying clock.
    pub fn now_nanos(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Milliseconds from the underlying clock.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// The underlying clock, for components that stamp their own state.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}
