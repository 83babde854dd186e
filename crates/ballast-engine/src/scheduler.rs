//! Thread-backed scheduler: main-thread pump, worker pool, daemon
//! timers.
//!
//! The main side is pull-based: the host calls
//! [`ThreadScheduler::pump`] once per tick on the simulation thread,
//! which runs queued tasks, due one-shots, and due repeating timers.
//! Analysis workers consume a crossbeam channel with per-task panic
//! isolation. Daemon timers get one named thread each, sleeping in
//! short steps so cancellation and shutdown stay responsive.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ballast_core::scheduler::{RepeatingTask, ScheduleError, Scheduler, Task, TimerHandle};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, warn};

/// Analysis worker pool size.
pub const DEFAULT_WORKERS: usize = 2;

/// Daemon threads sleep in steps of this length so cancel and
/// shutdown are observed promptly.
const DAEMON_SLEEP_STEP: Duration = Duration::from_millis(25);

struct MainTimer {
    every: u64,
    next: u64,
    task: RepeatingTask,
    handle: TimerHandle,
}

/// Production [`Scheduler`]: pumped main queue, fixed worker pool,
/// per-call daemon timer threads.
pub struct ThreadScheduler {
    tick: AtomicU64,
    main_tx: Sender<Task>,
    main_rx: Receiver<Task>,
    delayed: Mutex<Vec<(u64, Task)>>,
    timers: Mutex<Vec<MainTimer>>,
    worker_tx: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    daemons: Mutex<Vec<(TimerHandle, JoinHandle<()>)>>,
    shutdown: Arc<AtomicBool>,
}

impl ThreadScheduler {
    /// Spawn the worker pool and return the scheduler.
    pub fn new(worker_count: usize) -> Arc<Self> {
        let (main_tx, main_rx) = crossbeam_channel::unbounded();
        let (worker_tx, worker_rx) = crossbeam_channel::unbounded::<Task>();

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count.max(1) {
            let rx = worker_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ballast-worker-{index}"))
                .spawn(move || worker_loop(rx));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!(index, %err, "worker thread spawn failed"),
            }
        }

        Arc::new(Self {
            tick: AtomicU64::new(0),
            main_tx,
            main_rx,
            delayed: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            worker_tx: Mutex::new(Some(worker_tx)),
            workers: Mutex::new(workers),
            daemons: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run one tick's worth of main-thread work: queued tasks first,
    /// then due one-shots, then due repeating timers. Main thread only.
    ///
    /// Tasks scheduled while the pump runs land on the next tick; a
    /// snapshot slice that reschedules itself cannot starve the loop.
    pub fn pump(&self) {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;

        let mut batch: Vec<Task> = Vec::new();
        let queued = self.main_rx.len();
        for _ in 0..queued {
            match self.main_rx.try_recv() {
                Ok(task) => batch.push(task),
                Err(_) => break,
            }
        }

        {
            let mut delayed = self.delayed.lock().expect("delayed queue poisoned");
            let mut remaining = Vec::new();
            for (due, task) in delayed.drain(..) {
                if due <= tick {
                    batch.push(task);
                } else {
                    remaining.push((due, task));
                }
            }
            *delayed = remaining;
        }

        {
            let mut timers = self.timers.lock().expect("timer registry poisoned");
            timers.retain(|t| !t.handle.is_cancelled());
            for timer in timers.iter_mut() {
                if tick >= timer.next {
                    timer.next = tick + timer.every;
                    let task = Arc::clone(&timer.task);
                    batch.push(Box::new(move || task()));
                }
            }
        }

        for task in batch {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("main-thread task panicked; pump continues");
            }
        }
    }

    /// Current pump tick.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Stop workers and daemon timers and join them. Further
    /// [`on_worker`](Scheduler::on_worker) calls fail with
    /// [`ScheduleError::ExecutorShutdown`].
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);

        // Dropping the sender disconnects the worker channel; workers
        // exit once it drains.
        *self.worker_tx.lock().expect("worker sender poisoned") = None;
        for handle in self.workers.lock().expect("worker set poisoned").drain(..) {
            if handle.join().is_err() {
                warn!("worker thread exited by panic");
            }
        }

        let daemons: Vec<_> = self
            .daemons
            .lock()
            .expect("daemon set poisoned")
            .drain(..)
            .collect();
        for (handle, _) in &daemons {
            handle.cancel();
        }
        for (_, join) in daemons {
            if join.join().is_err() {
                warn!("daemon thread exited by panic");
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn on_main(&self, task: Task) {
        // Send fails only when self is being torn down; drop the task.
        let _ = self.main_tx.send(task);
    }

    fn later_main(&self, delay_ticks: u64, task: Task) {
        let due = self.tick.load(Ordering::Acquire) + delay_ticks.max(1);
        self.delayed
            .lock()
            .expect("delayed queue poisoned")
            .push((due, task));
    }

    fn timer_main(&self, every_ticks: u64, task: RepeatingTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let every = every_ticks.max(1);
        let next = self.tick.load(Ordering::Acquire) + every;
        self.timers
            .lock()
            .expect("timer registry poisoned")
            .push(MainTimer {
                every,
                next,
                task,
                handle: handle.clone(),
            });
        handle
    }

    fn on_worker(&self, task: Task) -> Result<(), ScheduleError> {
        let guard = self.worker_tx.lock().expect("worker sender poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| ScheduleError::ExecutorShutdown),
            None => Err(ScheduleError::ExecutorShutdown),
        }
    }

    fn daemon_timer(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let thread_handle = handle.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let spawned = std::thread::Builder::new()
            .name("ballast-daemon".to_string())
            .spawn(move || daemon_loop(period, task, thread_handle, shutdown));
        match spawned {
            Ok(join) => {
                self.daemons
                    .lock()
                    .expect("daemon set poisoned")
                    .push((handle.clone(), join));
            }
            Err(err) => warn!(%err, "daemon thread spawn failed"),
        }
        handle
    }
}

fn worker_loop(rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("worker task panicked; worker continues");
        }
    }
}

fn daemon_loop(period: Duration, task: RepeatingTask, handle: TimerHandle, shutdown: Arc<AtomicBool>) {
    let stopped = || handle.is_cancelled() || shutdown.load(Ordering::Acquire);
    loop {
        let wake = Instant::now() + period;
        while Instant::now() < wake {
            if stopped() {
                return;
            }
            std::thread::sleep(DAEMON_SLEEP_STEP.min(wake.saturating_duration_since(Instant::now())));
        }
        if stopped() {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
            error!("daemon task panicked; timer continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn pump_runs_queued_then_delayed_then_timers() {
        let scheduler = ThreadScheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        scheduler.on_main(Box::new(move || o.lock().unwrap().push("queued")));
        let o = order.clone();
        scheduler.later_main(1, Box::new(move || o.lock().unwrap().push("delayed")));
        let o = order.clone();
        let _handle = scheduler.timer_main(1, Arc::new(move || o.lock().unwrap().push("timer")));

        scheduler.pump();
        assert_eq!(*order.lock().unwrap(), ["queued", "delayed", "timer"]);
        scheduler.shutdown();
    }

    #[test]
    fn rescheduling_task_cannot_starve_the_pump() {
        let scheduler = ThreadScheduler::new(1);
        let runs = Arc::new(AtomicU32::new(0));

        fn reschedule(scheduler: &Arc<ThreadScheduler>, runs: &Arc<AtomicU32>) {
            let s = Arc::clone(scheduler);
            let r = Arc::clone(runs);
            scheduler.on_main(Box::new(move || {
                r.fetch_add(1, Ordering::AcqRel);
                reschedule(&s, &r);
            }));
        }
        reschedule(&scheduler, &runs);

        scheduler.pump();
        // The re-enqueued copy waits for the next pump.
        assert_eq!(runs.load(Ordering::Acquire), 1);
        scheduler.pump();
        assert_eq!(runs.load(Ordering::Acquire), 2);
        scheduler.shutdown();
    }

    #[test]
    fn timer_respects_cadence_and_cancel() {
        let scheduler = ThreadScheduler::new(1);
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        let handle = scheduler.timer_main(3, Arc::new(move || {
            r.fetch_add(1, Ordering::AcqRel);
        }));

        for _ in 0..6 {
            scheduler.pump();
        }
        assert_eq!(runs.load(Ordering::Acquire), 2);

        handle.cancel();
        for _ in 0..6 {
            scheduler.pump();
        }
        assert_eq!(runs.load(Ordering::Acquire), 2);
        scheduler.shutdown();
    }

    #[test]
    fn worker_runs_tasks_and_survives_panics() {
        let scheduler = ThreadScheduler::new(2);
        let (tx, rx) = crossbeam_channel::bounded(2);

        scheduler.on_worker(Box::new(|| panic!("worker boom"))).unwrap();
        let tx2 = tx.clone();
        scheduler
            .on_worker(Box::new(move || {
                tx2.send(42u32).unwrap();
            }))
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_rejects_new_worker_tasks() {
        let scheduler = ThreadScheduler::new(1);
        scheduler.shutdown();
        let result = scheduler.on_worker(Box::new(|| {}));
        assert_eq!(result, Err(ScheduleError::ExecutorShutdown));
    }

    #[test]
    fn daemon_timer_fires_until_cancelled() {
        let scheduler = ThreadScheduler::new(1);
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        let handle = scheduler.daemon_timer(
            Duration::from_millis(10),
            Arc::new(move || {
                r.fetch_add(1, Ordering::AcqRel);
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::Acquire) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(runs.load(Ordering::Acquire) >= 2);

        handle.cancel();
        scheduler.shutdown();
    }
}
