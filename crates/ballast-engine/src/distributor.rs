//! Budgeted main-thread work queue.
//!
//! [`WorkloadDistributor`] is the sole path to the host's mutation
//! surface. Producers on any thread enqueue closures; the main thread
//! drains them under a per-tick nanosecond budget. The size counter is
//! reserved *before* a task becomes visible to the consumer, so the
//! counter can never read below the real queue length and the capacity
//! check is race-free.
//!
//! The consumer timer arms lazily on the first enqueue into an idle
//! queue and disarms when a drain empties it; a post-disarm check
//! re-arms if a producer raced the stop transition.

use std::error::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ballast_core::host::HostAdapter;
use ballast_core::scheduler::{RepeatingTask, Scheduler, Task, TimerHandle};
use ballast_core::time::Clock;
use tracing::{debug, error, warn};

/// Queue capacity.
pub const QUEUE_CAPACITY: usize = 5000;

/// A single task running at least this long emits a diagnostic.
const SLOW_TASK_NANOS: u64 = 50_000_000;

/// Minimum gap between slow-task admin notifications.
const SLOW_NOTICE_GAP_MS: u64 = 10_000;

/// Enqueue rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity; the task was not accepted.
    QueueFull,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "workload queue full"),
        }
    }
}

impl Error for EnqueueError {}

/// Cumulative distributor counters, readable from any thread.
#[derive(Debug, Default)]
pub struct DistributorStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    executed: AtomicU64,
    slow_tasks: AtomicU64,
    panicked_tasks: AtomicU64,
}

impl DistributorStats {
    /// Tasks accepted into the queue.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Acquire)
    }

    /// Tasks rejected at capacity.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Acquire)
    }

    /// Tasks run to completion (including panicked ones).
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    /// Tasks that exceeded the slow-task threshold.
    pub fn slow_tasks(&self) -> u64 {
        self.slow_tasks.load(Ordering::Acquire)
    }

    /// Tasks that panicked (caught, logged, loop continued).
    pub fn panicked_tasks(&self) -> u64 {
        self.panicked_tasks.load(Ordering::Acquire)
    }
}

/// Multi-producer single-consumer work queue with a per-tick drain
/// budget.
pub struct WorkloadDistributor {
    tx: crossbeam_channel::Sender<Task>,
    rx: crossbeam_channel::Receiver<Task>,
    size: AtomicUsize,
    capacity: usize,
    budget_nanos: AtomicU64,
    clock: Arc<dyn Clock>,
    host: Arc<dyn HostAdapter>,
    stats: Arc<DistributorStats>,
    active: AtomicBool,
    overflow_warned: AtomicBool,
    last_slow_notice_ms: AtomicU64,
    scheduler: Mutex<Option<Arc<dyn Scheduler>>>,
}

impl WorkloadDistributor {
    /// Create a distributor with the standard capacity.
    pub fn new(budget_nanos: u64, clock: Arc<dyn Clock>, host: Arc<dyn HostAdapter>) -> Arc<Self> {
        Self::with_capacity(QUEUE_CAPACITY, budget_nanos, clock, host)
    }

    /// Create a distributor with an explicit capacity.
    pub fn with_capacity(
        capacity: usize,
        budget_nanos: u64,
        clock: Arc<dyn Clock>,
        host: Arc<dyn HostAdapter>,
    ) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            tx,
            rx,
            size: AtomicUsize::new(0),
            capacity,
            budget_nanos: AtomicU64::new(budget_nanos),
            clock,
            host,
            stats: Arc::new(DistributorStats::default()),
            active: AtomicBool::new(false),
            overflow_warned: AtomicBool::new(false),
            last_slow_notice_ms: AtomicU64::new(0),
            scheduler: Mutex::new(None),
        })
    }

    /// Attach the scheduler used to arm the consumer timer. Without
    /// one, tasks queue until [`drain_once`](Self::drain_once) is
    /// called directly.
    pub fn attach_scheduler(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) {
        *self.scheduler.lock().expect("scheduler slot poisoned") = Some(scheduler);
        // Tasks may have been enqueued before attachment.
        if !self.rx.is_empty() {
            self.arm_consumer();
        }
    }

    /// Enqueue a task for the main thread. Constant-time, non-blocking.
    pub fn enqueue(
        self: &Arc<Self>,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), EnqueueError> {
        // Reserve a slot before publishing: the counter leads the
        // queue, never trails it.
        let size = self.size.fetch_add(1, Ordering::AcqRel) + 1;
        if size > self.capacity {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.stats.rejected.fetch_add(1, Ordering::AcqRel);
            if !self.overflow_warned.swap(true, Ordering::AcqRel) {
                warn!(capacity = self.capacity, "workload queue full; rejecting tasks");
                self.host.notify_admins(&format!(
                    "&c[Ballast] Workload queue overflow ({} tasks); shedding new work",
                    self.capacity
                ));
            }
            return Err(EnqueueError::QueueFull);
        }

        if self.tx.send(Box::new(task)).is_err() {
            // The receiver lives inside self; disconnection is
            // unreachable in practice, but roll the slot back rather
            // than leak it.
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.stats.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(EnqueueError::QueueFull);
        }

        self.stats.accepted.fetch_add(1, Ordering::AcqRel);
        self.arm_consumer();
        Ok(())
    }

    /// Current size-counter reading.
    pub fn queue_size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Whether the visible queue is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> Arc<DistributorStats> {
        Arc::clone(&self.stats)
    }

    /// Reload the per-tick budget. Takes effect from the next drain;
    /// the drain in progress finishes under the budget it started with.
    pub fn set_budget_nanos(&self, budget_nanos: u64) {
        self.budget_nanos.store(budget_nanos, Ordering::Release);
    }

    /// Current per-tick budget.
    pub fn budget_nanos(&self) -> u64 {
        self.budget_nanos.load(Ordering::Acquire)
    }

    /// One drain pass: pop and run tasks while the queue is non-empty
    /// and the budget's deadline has not passed. Main thread only.
    pub fn drain_once(&self) {
        let deadline = self
            .clock
            .now_nanos()
            .saturating_add(self.budget_nanos.load(Ordering::Acquire));

        while self.clock.now_nanos() < deadline {
            let task = match self.rx.try_recv() {
                Ok(task) => task,
                Err(_) => break,
            };
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.run_task(task);
        }

        if self.rx.is_empty() {
            // Queue drained: re-arm the once-per-transition overflow
            // warning.
            self.overflow_warned.store(false, Ordering::Release);
        }
    }

    fn run_task(&self, task: Task) {
        let start = self.clock.now_nanos();
        let outcome = catch_unwind(AssertUnwindSafe(task));
        let elapsed = self.clock.now_nanos().saturating_sub(start);
        self.stats.executed.fetch_add(1, Ordering::AcqRel);

        if outcome.is_err() {
            self.stats.panicked_tasks.fetch_add(1, Ordering::AcqRel);
            error!("workload task panicked; continuing drain");
        }

        if elapsed >= SLOW_TASK_NANOS {
            self.stats.slow_tasks.fetch_add(1, Ordering::AcqRel);
            let elapsed_ms = elapsed / 1_000_000;
            warn!(elapsed_ms, "slow workload task");
            let now_ms = self.clock.now_millis();
            let last = self.last_slow_notice_ms.load(Ordering::Acquire);
            if last == 0 || now_ms.saturating_sub(last) >= SLOW_NOTICE_GAP_MS {
                self.last_slow_notice_ms.store(now_ms, Ordering::Release);
                self.host.notify_admins(&format!(
                    "&e[Ballast] Workload task took {elapsed_ms} ms on the main thread"
                ));
            }
        }
    }

    /// Arm the consumer timer if it is idle. Safe from any thread.
    fn arm_consumer(self: &Arc<Self>) {
        let scheduler = {
            let slot = self.scheduler.lock().expect("scheduler slot poisoned");
            match slot.as_ref() {
                Some(s) => Arc::clone(s),
                None => return,
            }
        };
        if self.active.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(self);
        let handle_slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let task_slot = Arc::clone(&handle_slot);
        let task: RepeatingTask = Arc::new(move || {
            let cancel = |slot: &Mutex<Option<TimerHandle>>| {
                if let Some(handle) = slot.lock().expect("timer slot poisoned").as_ref() {
                    handle.cancel();
                }
            };
            let Some(dist) = weak.upgrade() else {
                cancel(&task_slot);
                return;
            };
            dist.drain_once();
            if dist.rx.is_empty() {
                cancel(&task_slot);
                dist.active.store(false, Ordering::Release);
                // A producer may have enqueued between the empty check
                // and the stop; re-arm rather than strand its task.
                if !dist.rx.is_empty() {
                    dist.arm_consumer();
                }
            }
        });
        let handle = scheduler.timer_main(1, task);
        *handle_slot.lock().expect("timer slot poisoned") = Some(handle);
        debug!("workload consumer armed");
    }
}
