//! The owning context object.
//!
//! [`Guardian`] wires every subsystem together from one configuration
//! plus the two injected boundaries (host adapter, runtime probe).
//! There is no global state: hosts construct a `Guardian`, call
//! [`start`](Guardian::start) once, drive [`tick`](Guardian::tick)
//! from the main simulation loop, route redstone events through
//! [`on_redstone_activation`](Guardian::on_redstone_activation), and
//! call [`shutdown`](Guardian::shutdown) on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_core::config::{ConfigError, GuardianConfig};
use ballast_core::host::HostAdapter;
use ballast_core::id::ChunkKey;
use ballast_core::runtime::RuntimeProbe;
use ballast_core::scheduler::{Scheduler, TimerHandle};
use ballast_core::time::{Clock, SystemClock, TimeBase};
use ballast_engine::scheduler::DEFAULT_WORKERS;
use ballast_engine::{
    ActionExecutor, PredictiveOptimizer, ScanPipeline, SettingsModified, ThreadScheduler,
    ThresholdEngine, WorkloadDistributor,
};
use ballast_guards::{
    ActivationDecision, ChunkLimiter, DensityOptimizer, EntityLimiter, FrustumCuller, LagAnalyzer,
    RedstoneSuppressor, WorldChunkGuard,
};
use ballast_telemetry::{GcObserver, MemoryTrendDetector, TelemetryHandle, TickSampler};
use tracing::info;

/// The fully wired guardian.
pub struct Guardian {
    config: GuardianConfig,
    time_base: Arc<TimeBase>,
    scheduler: Arc<ThreadScheduler>,
    distributor: Arc<WorkloadDistributor>,
    sampler: Mutex<TickSampler>,
    telemetry: Arc<TelemetryHandle>,
    predictive: Arc<PredictiveOptimizer>,
    threshold: Arc<ThresholdEngine>,
    gc_observer: Arc<GcObserver>,
    leak_detector: Arc<MemoryTrendDetector>,
    redstone: Arc<RedstoneSuppressor>,
    culler: Arc<ScanPipeline<FrustumCuller>>,
    chunk_limiter: Arc<ScanPipeline<ChunkLimiter>>,
    entity_limiter: Arc<ScanPipeline<EntityLimiter>>,
    density: Arc<ScanPipeline<DensityOptimizer>>,
    world_guard: Arc<ScanPipeline<WorldChunkGuard>>,
    timers: Mutex<Vec<TimerHandle>>,
    started: AtomicBool,
}

impl Guardian {
    /// Validate the configuration and wire every subsystem.
    ///
    /// Nothing is armed yet; call [`start`](Self::start) to register
    /// timers and [`tick`](Self::tick) from the main loop.
    pub fn new(
        config: GuardianConfig,
        host: Arc<dyn HostAdapter>,
        probe: Arc<dyn RuntimeProbe>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let time_base = Arc::new(TimeBase::new(Arc::clone(&clock)));
        let scheduler = ThreadScheduler::new(DEFAULT_WORKERS);
        let scheduler_dyn: Arc<dyn Scheduler> = scheduler.clone();

        let distributor = WorkloadDistributor::new(
            config.workload_budget_nanos(),
            Arc::clone(&clock),
            Arc::clone(&host),
        );
        distributor.attach_scheduler(Arc::clone(&scheduler_dyn));

        let sampler = TickSampler::new(config.system.tick_monitor.clone(), Arc::clone(&host));
        let telemetry = sampler.handle();

        let executor = ActionExecutor::new(
            Arc::clone(&host),
            Arc::clone(&distributor),
            config.modules.chunks.view_distance.clone(),
            config.modules.chunks.simulation_distance.clone(),
            SettingsModified::new(),
        );

        let threshold = ThresholdEngine::new(
            &config,
            Arc::clone(&host),
            Arc::clone(&distributor),
            Arc::clone(&executor),
            telemetry.clone(),
            Arc::clone(&clock),
        );

        let predictive = Arc::new(PredictiveOptimizer::new(
            config.automation.predictive_optimization.clone(),
            Arc::clone(&executor),
            Arc::clone(&host),
        ));

        let gc_observer = Arc::new(GcObserver::new(
            config.gc_monitor.clone(),
            Arc::clone(&probe),
            Arc::clone(&host),
        ));
        let leak_detector = Arc::new(MemoryTrendDetector::new(
            config.memory_leak_detector.clone(),
            Arc::clone(&probe),
            Arc::clone(&host),
            Arc::clone(&clock),
        ));

        let redstone = RedstoneSuppressor::new(
            config.modules.redstone.clone(),
            Arc::clone(&host),
            Arc::clone(&clock),
            telemetry.clone(),
        );

        let culler = ScanPipeline::new(
            Arc::new(FrustumCuller::new(config.modules.mob_ai.clone())),
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );
        let chunk_limiter = ScanPipeline::new(
            Arc::new(ChunkLimiter::new(
                config.modules.entities.chunk_limiter.clone(),
            )),
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );
        let entity_limiter = ScanPipeline::new(
            Arc::new(EntityLimiter::new(config.modules.entities.limits.clone())),
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );
        let density = ScanPipeline::new(
            Arc::new(DensityOptimizer::new(config.modules.entities.limits.clone())),
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );
        let world_guard_scanner = WorldChunkGuard::new(
            &config,
            Arc::clone(&host),
            Arc::clone(&distributor),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&executor),
        );
        let world_guard = ScanPipeline::new(
            world_guard_scanner,
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );
        let lag_analyzer = ScanPipeline::new(
            Arc::new(LagAnalyzer::new(Arc::clone(&clock))),
            Arc::clone(&host),
            Arc::clone(&scheduler_dyn),
            Arc::clone(&distributor),
            Arc::clone(&clock),
        );

        // Capability wiring: the executor reaches subsystems through
        // closures, never through back-pointers.
        {
            let pipeline = Arc::clone(&chunk_limiter);
            executor.wire_chunk_clean(Arc::new(move || pipeline.trigger()));
            let pipeline = Arc::clone(&entity_limiter);
            executor.wire_enforce_entity_limits(Arc::new(move || pipeline.trigger()));
            let pipeline = Arc::clone(&world_guard);
            executor.wire_unload_world_chunks(Arc::new(move || pipeline.trigger()));
            let pipeline = Arc::clone(&lag_analyzer);
            threshold.wire_analyze_hook(Arc::new(move || pipeline.trigger()));
        }

        Ok(Self {
            config,
            time_base,
            scheduler,
            distributor,
            sampler: Mutex::new(sampler),
            telemetry,
            predictive,
            threshold,
            gc_observer,
            leak_detector,
            redstone,
            culler,
            chunk_limiter,
            entity_limiter,
            density,
            world_guard,
            timers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Arm every enabled module's timers. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut timers = self.timers.lock().expect("timer set poisoned");

        let threshold = Arc::clone(&self.threshold);
        timers.push(self.scheduler.timer_main(
            self.config.system.tps_monitor.check_interval,
            Arc::new(move || threshold.check()),
        ));

        let modules = &self.config.modules;
        if modules.mob_ai.enabled {
            timers.push(self.culler.arm());
        }
        if modules.entities.chunk_limiter.enabled {
            timers.push(self.chunk_limiter.arm());
        }
        if modules.entities.limits.enabled {
            timers.push(self.entity_limiter.arm());
            if !modules.entities.limits.per_chunk_limit.is_empty() {
                timers.push(self.density.arm());
            }
        }
        if modules.chunks.world_guard.enabled {
            timers.push(self.world_guard.arm());
        }
        if modules.redstone.enabled {
            timers.push(self.redstone.arm(&*self.scheduler));
        }

        if self.config.gc_monitor.enabled {
            let observer = Arc::clone(&self.gc_observer);
            timers.push(self.scheduler.daemon_timer(
                ballast_telemetry::gc::POLL_PERIOD,
                Arc::new(move || observer.poll()),
            ));
        }
        if self.config.memory_leak_detector.enabled {
            let detector = Arc::clone(&self.leak_detector);
            timers.push(self.scheduler.daemon_timer(
                Duration::from_secs(self.config.memory_leak_detector.check_interval),
                Arc::new(move || detector.sample()),
            ));
        }

        info!("guardian started");
    }

    /// One main-loop iteration: advance the time base, record the tick
    /// sample, pump scheduled main-thread work (which includes the
    /// distributor's budgeted drain). Main thread only.
    pub fn tick(&self) {
        self.time_base.advance_tick();
        let now_nanos = self.time_base.now_nanos();
        let flushed = self
            .sampler
            .lock()
            .expect("sampler poisoned")
            .record_tick(now_nanos);
        if flushed.is_some() {
            self.predictive
                .on_second(self.telemetry.mspt_avg(), self.time_base.now_millis());
        }
        self.scheduler.pump();
    }

    /// Route one redstone activation. Main thread only.
    pub fn on_redstone_activation(&self, chunk: ChunkKey) -> ActivationDecision {
        self.redstone.on_activation(chunk)
    }

    /// Re-apply the reloadable subset of a new configuration: the
    /// distributor budget and the threshold level list.
    pub fn reload(&self, config: &GuardianConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.distributor
            .set_budget_nanos(config.workload_budget_nanos());
        self.threshold.reload(config);
        info!("configuration reloaded");
        Ok(())
    }

    /// Cancel timers and join background threads.
    pub fn shutdown(&self) {
        for timer in self.timers.lock().expect("timer set poisoned").drain(..) {
            timer.cancel();
        }
        self.scheduler.shutdown();
        info!("guardian stopped");
    }

    /// Shared telemetry handle (TPS, MSPT).
    pub fn telemetry(&self) -> Arc<TelemetryHandle> {
        Arc::clone(&self.telemetry)
    }

    /// Rolling TPS averages across the five reporting windows.
    pub fn window_report(&self) -> ballast_telemetry::WindowReport {
        self.sampler.lock().expect("sampler poisoned").window_report()
    }

    /// Distributor counters.
    pub fn distributor_stats(&self) -> Arc<ballast_engine::DistributorStats> {
        self.distributor.stats()
    }

    /// GC activity counters.
    pub fn gc_stats(&self) -> Arc<ballast_telemetry::GcStats> {
        self.gc_observer.stats()
    }
}
