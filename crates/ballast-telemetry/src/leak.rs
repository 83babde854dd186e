//! Post-GC heap trend detection.
//!
//! The detector samples the tenured pool's post-collection baseline on
//! its own daemon timer, fits a least-squares line over the retained
//! ring, and requires three consecutive over-slope fits plus an alert
//! cool-down before notifying. It never takes remedial action.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ballast_core::config::LeakDetectorConfig;
use ballast_core::host::HostAdapter;
use ballast_core::runtime::RuntimeProbe;
use ballast_core::time::Clock;
use tracing::{debug, warn};

use crate::trend::linear_fit;

/// Consecutive over-slope fits required before an alert can fire.
const CONFIRMATION_SIGNALS: u32 = 3;

struct DetectorState {
    baselines: VecDeque<(u64, f64)>,
    last_pool_count: Option<u64>,
    last_total_collections: Option<u64>,
    gc_per_minute: f64,
    consecutive_signals: u32,
    last_alert_ms: Option<u64>,
}

/// Memory-leak trend detector. Sampling runs on a daemon timer at
/// `check-interval`; all state lives behind one mutex owned by that
/// thread's cadence.
pub struct MemoryTrendDetector {
    config: LeakDetectorConfig,
    probe: Arc<dyn RuntimeProbe>,
    host: Arc<dyn HostAdapter>,
    clock: Arc<dyn Clock>,
    state: Mutex<DetectorState>,
}

impl MemoryTrendDetector {
    /// Create a detector; arm it with a daemon timer at
    /// `config.check_interval` seconds.
    pub fn new(
        config: LeakDetectorConfig,
        probe: Arc<dyn RuntimeProbe>,
        host: Arc<dyn HostAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            probe,
            host,
            clock,
            state: Mutex::new(DetectorState {
                baselines: VecDeque::new(),
                last_pool_count: None,
                last_total_collections: None,
                gc_per_minute: 0.0,
                consecutive_signals: 0,
                last_alert_ms: None,
            }),
        }
    }

    /// One sampling pass. Detector thread only.
    pub fn sample(&self) {
        let now_ms = self.clock.now_millis();
        let mut state = self.state.lock().expect("leak detector state poisoned");

        self.update_gc_rate(&mut state);

        // Baseline only when the pool collected since the last pass;
        // otherwise the reading is stale and would flatten the trend.
        let Some(pool) = self.probe.tenured_post_gc() else {
            return;
        };
        let advanced = state
            .last_pool_count
            .is_none_or(|last| pool.collection_count > last);
        state.last_pool_count = Some(pool.collection_count);
        if !advanced {
            return;
        }

        if state.baselines.len() == self.config.window_size {
            state.baselines.pop_front();
        }
        state.baselines.push_back((now_ms, pool.used_mb));

        if state.baselines.len() < self.config.min_samples {
            return;
        }

        let origin = state.baselines[0].0;
        let points: Vec<(f64, f64)> = state
            .baselines
            .iter()
            .map(|&(t, mb)| ((t - origin) as f64, mb))
            .collect();
        let Some(fit) = linear_fit(&points) else {
            return;
        };
        let slope_mb_per_min = fit.slope * 60_000.0;
        debug!(slope_mb_per_min, samples = points.len(), "heap trend fit");

        if slope_mb_per_min >= self.config.slope_threshold_mb_per_min {
            state.consecutive_signals += 1;
        } else {
            state.consecutive_signals = state.consecutive_signals.saturating_sub(1);
        }

        if state.consecutive_signals >= CONFIRMATION_SIGNALS {
            let cooled = state
                .last_alert_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= self.config.alert_cooldown * 1000);
            if cooled {
                state.last_alert_ms = Some(now_ms);
                self.alert(slope_mb_per_min, pool.used_mb, state.gc_per_minute);
            }
        }
    }

    /// Whether at least one over-slope fit is currently unconfirmed.
    pub fn is_suspected(&self) -> bool {
        self.state
            .lock()
            .expect("leak detector state poisoned")
            .consecutive_signals
            > 0
    }

    /// Current consecutive over-slope fit count.
    pub fn consecutive_signals(&self) -> u32 {
        self.state
            .lock()
            .expect("leak detector state poisoned")
            .consecutive_signals
    }

    /// Collections per minute, derived across sampling passes.
    pub fn gc_per_minute(&self) -> f64 {
        self.state
            .lock()
            .expect("leak detector state poisoned")
            .gc_per_minute
    }

    fn update_gc_rate(&self, state: &mut DetectorState) {
        let total: u64 = self.probe.collectors().iter().map(|c| c.count).sum();
        if let Some(last) = state.last_total_collections {
            let delta = total.saturating_sub(last);
            let minutes = self.config.check_interval as f64 / 60.0;
            if minutes > 0.0 {
                state.gc_per_minute = delta as f64 / minutes;
            }
        }
        state.last_total_collections = Some(total);
    }

    fn alert(&self, slope_mb_per_min: f64, used_mb: f64, gc_per_minute: f64) {
        warn!(
            slope_mb_per_min,
            used_mb, gc_per_minute, "sustained tenured heap growth"
        );
        if self.config.notify {
            self.host.notify_admins(&format!(
                "&c[Ballast] Possible memory leak: tenured heap growing \
                 {slope_mb_per_min:.1} MB/min (now {used_mb:.0} MB, {gc_per_minute:.1} GC/min)"
            ));
        }
    }
}
