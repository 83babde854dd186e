//! The scheduler abstraction.
//!
//! Components never spawn threads or register host tasks directly;
//! they receive an `Arc<dyn Scheduler>` from the owning context. The
//! production implementation (in `ballast-engine`) pumps main-thread
//! work from the host's tick and owns the analysis worker pool and
//! daemon timer threads. Tests supply a deterministic virtual
//! scheduler that runs everything inline under manual control.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A one-shot unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A repeating unit of work, shared with the timer that fires it.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Failure to hand work to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    /// The worker pool has shut down; no worker will ever run the task.
    ExecutorShutdown,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutorShutdown => write!(f, "worker pool has shut down"),
        }
    }
}

impl Error for ScheduleError {}

/// Cancellation handle for a repeating timer.
///
/// Cloning shares the underlying flag; `cancel()` is idempotent and
/// takes effect before the timer's next firing.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Create a live (not yet cancelled) handle.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Task placement: main thread, worker pool, or daemon timer thread.
pub trait Scheduler: Send + Sync {
    /// Run a task on the main thread at the next pump.
    fn on_main(&self, task: Task);

    /// Run a task on the main thread after `delay_ticks` further ticks.
    fn later_main(&self, delay_ticks: u64, task: Task);

    /// Run a task on the main thread every `every_ticks` ticks until
    /// the returned handle is cancelled. The first firing happens
    /// `every_ticks` ticks from now.
    fn timer_main(&self, every_ticks: u64, task: RepeatingTask) -> TimerHandle;

    /// Run a task on the analysis worker pool.
    fn on_worker(&self, task: Task) -> Result<(), ScheduleError>;

    /// Run a task on a dedicated background timer thread every
    /// `period` until the returned handle is cancelled. The task must
    /// never touch host mutation APIs.
    fn daemon_timer(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}
