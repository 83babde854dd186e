//! The generic scanner cycle: snapshot → analyze → dispatch.
//!
//! Every scanner follows the same four-phase shape:
//!
//! 1. A repeating trigger fires on the scanner's cadence.
//! 2. The snapshot builds on the main thread in bounded time slices,
//!    rescheduling itself onto the next tick when a slice's deadline
//!    passes.
//! 3. The completed snapshot moves by value to a worker thread for
//!    analysis, which produces a list of intended mutations.
//! 4. Mutations dispatch in batches through the workload distributor;
//!    each batch revalidates against the live host before applying.
//!
//! One `in_flight` flag per pipeline drops overlapping cycles instead
//! of queueing them. The value-move between phases is the
//! happens-before edge: the analyzer owns the snapshot outright, and
//! dispatch owns the mutation list outright.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ballast_core::host::HostAdapter;
use ballast_core::scheduler::{Scheduler, TimerHandle};
use ballast_core::time::Clock;
use tracing::{debug, warn};

use crate::distributor::WorkloadDistributor;

/// Mutations dispatched per distributor task.
pub const DISPATCH_BATCH: usize = 50;

/// One scanner's behavior, plugged into [`ScanPipeline`].
pub trait Scanner: Send + Sync + 'static {
    /// Partial snapshot state carried across main-thread slices.
    type State: Send + 'static;
    /// One intended mutation, keyed by stable identifiers.
    type Mutation: Send + 'static;

    /// Scanner name for diagnostics.
    fn name(&self) -> &'static str;

    /// Trigger cadence, in ticks.
    fn interval_ticks(&self) -> u64;

    /// Main-thread time slice per snapshot step.
    fn slice_budget(&self) -> Duration;

    /// Begin a snapshot. Main thread.
    fn start_snapshot(&self, host: &dyn HostAdapter) -> Self::State;

    /// Advance the snapshot until complete or until `deadline_nanos`
    /// passes. Returns `true` when the snapshot is complete. Main
    /// thread.
    fn snapshot_step(
        &self,
        host: &dyn HostAdapter,
        state: &mut Self::State,
        deadline_nanos: u64,
        clock: &dyn Clock,
    ) -> bool;

    /// Consume the completed snapshot and produce intended mutations.
    /// Worker thread.
    fn analyze(&self, state: Self::State) -> Vec<Self::Mutation>;

    /// Apply one mutation, revalidating via the host first. Main
    /// thread, inside a distributor task.
    fn apply(&self, host: &dyn HostAdapter, mutation: Self::Mutation);
}

/// Drives one [`Scanner`] through the four-phase cycle.
pub struct ScanPipeline<S: Scanner> {
    scanner: Arc<S>,
    host: Arc<dyn HostAdapter>,
    scheduler: Arc<dyn Scheduler>,
    distributor: Arc<WorkloadDistributor>,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
}

impl<S: Scanner> ScanPipeline<S> {
    /// Wire a pipeline. Nothing runs until [`arm`](Self::arm) or
    /// [`trigger`](Self::trigger).
    pub fn new(
        scanner: Arc<S>,
        host: Arc<dyn HostAdapter>,
        scheduler: Arc<dyn Scheduler>,
        distributor: Arc<WorkloadDistributor>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scanner,
            host,
            scheduler,
            distributor,
            clock,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Register the repeating trigger at the scanner's cadence.
    pub fn arm(self: &Arc<Self>) -> TimerHandle {
        let weak = Arc::downgrade(self);
        self.scheduler.timer_main(
            self.scanner.interval_ticks(),
            Arc::new(move || {
                if let Some(pipeline) = weak.upgrade() {
                    pipeline.trigger();
                }
            }),
        )
    }

    /// Start one cycle now (main thread). A cycle already in flight is
    /// skipped, not queued.
    pub fn trigger(self: &Arc<Self>) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(scanner = self.scanner.name(), "cycle still in flight; skipping");
            return;
        }
        let state = self.scanner.start_snapshot(&*self.host);
        self.snapshot_slice(state);
    }

    /// Whether a cycle is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn snapshot_slice(self: &Arc<Self>, mut state: S::State) {
        let deadline = self
            .clock
            .now_nanos()
            .saturating_add(self.scanner.slice_budget().as_nanos() as u64);
        let done = self
            .scanner
            .snapshot_step(&*self.host, &mut state, deadline, &*self.clock);
        if !done {
            // Slice exhausted: yield the main thread and continue on
            // the next tick.
            let this = Arc::clone(self);
            self.scheduler
                .on_main(Box::new(move || this.snapshot_slice(state)));
            return;
        }
        self.dispatch_analysis(state);
    }

    fn dispatch_analysis(self: &Arc<Self>, state: S::State) {
        let this = Arc::clone(self);
        let scheduled = self.scheduler.on_worker(Box::new(move || {
            let mutations = this.scanner.analyze(state);
            this.dispatch_mutations(mutations);
        }));
        if let Err(err) = scheduled {
            warn!(scanner = self.scanner.name(), %err, "analysis not scheduled");
            self.in_flight.store(false, Ordering::Release);
        }
    }

    fn dispatch_mutations(self: &Arc<Self>, mutations: Vec<S::Mutation>) {
        if mutations.is_empty() {
            self.in_flight.store(false, Ordering::Release);
            return;
        }

        let mut batches: Vec<Vec<S::Mutation>> = Vec::new();
        let mut current = Vec::with_capacity(DISPATCH_BATCH);
        for mutation in mutations {
            current.push(mutation);
            if current.len() == DISPATCH_BATCH {
                batches.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }

        let pending = Arc::new(AtomicUsize::new(batches.len()));
        let mut dropped = 0usize;
        for batch in batches {
            let this = Arc::clone(self);
            let pending_batch = Arc::clone(&pending);
            let enqueued = self.distributor.enqueue(move || {
                for mutation in batch {
                    this.scanner.apply(&*this.host, mutation);
                }
                if pending_batch.fetch_sub(1, Ordering::AcqRel) == 1 {
                    this.in_flight.store(false, Ordering::Release);
                }
            });
            if enqueued.is_err() {
                dropped += 1;
                // Settle the rejected batch so the cycle still closes.
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.in_flight.store(false, Ordering::Release);
                }
            }
        }
        if dropped > 0 {
            warn!(
                scanner = self.scanner.name(),
                dropped, "mutation batches rejected by the distributor"
            );
        }
    }
}
