//! Predictive MSPT engine: spike and weighted-trend detection.
//!
//! Fed once per second with the current MSPT average. The spike
//! detector compares the newest sample against a short lookback; the
//! trend detector fits an exponentially weighted regression where the
//! newest sample carries about three times the weight of the oldest.
//! Either one, past its cool-down, executes the configured action
//! list.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ballast_core::config::PredictiveConfig;
use ballast_core::host::HostAdapter;
use ballast_telemetry::trend::{weighted_fit, weighted_mean};
use tracing::{debug, info};

use crate::actions::ActionExecutor;

/// Spike lookback cap, in samples.
const MAX_LOOKBACK: usize = 3;

/// Spike ratio: newest sample must be at least this multiple of the
/// lookback sample.
const SPIKE_RATIO: f64 = 2.0;

struct PredictiveState {
    samples: VecDeque<f64>,
    last_trigger_ms: Option<u64>,
}

/// What fired a predictive trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cause {
    Spike,
    Trend,
}

/// The predictive optimizer. [`on_second`](Self::on_second) runs on
/// the main thread off the sampler's once-per-second edge.
pub struct PredictiveOptimizer {
    config: PredictiveConfig,
    executor: Arc<ActionExecutor>,
    host: Arc<dyn HostAdapter>,
    state: Mutex<PredictiveState>,
}

impl PredictiveOptimizer {
    /// Create the optimizer.
    pub fn new(
        config: PredictiveConfig,
        executor: Arc<ActionExecutor>,
        host: Arc<dyn HostAdapter>,
    ) -> Self {
        Self {
            config,
            executor,
            host,
            state: Mutex::new(PredictiveState {
                samples: VecDeque::new(),
                last_trigger_ms: None,
            }),
        }
    }

    /// Feed one second's MSPT average.
    pub fn on_second(&self, mspt: f64, now_ms: u64) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().expect("predictive state poisoned");
        if state.samples.len() == self.config.window_seconds {
            state.samples.pop_front();
        }
        state.samples.push_back(mspt);

        let cause = if let Some(ratio) = self.spike(&state.samples) {
            debug!(mspt, ratio, "mspt spike detected");
            Some((Cause::Spike, format!("MSPT spiked to {mspt:.1} ms ({ratio:.1}x)")))
        } else if let Some(slope) = self.trend(&state.samples) {
            debug!(mspt, slope, "mspt trend detected");
            Some((
                Cause::Trend,
                format!("MSPT trending up {slope:.2} ms/s (now {mspt:.1} ms)"),
            ))
        } else {
            None
        };

        let Some((cause, detail)) = cause else { return };
        let cooled = state
            .last_trigger_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.config.cooldown * 1000);
        if !cooled {
            debug!(?cause, "predictive trigger suppressed by cool-down");
            return;
        }
        state.last_trigger_ms = Some(now_ms);
        drop(state);

        info!(?cause, %detail, "predictive optimization triggered");
        self.executor
            .execute(self.config.actions.as_slice(), &detail);
        if self.config.notify {
            self.host
                .notify_admins(&format!("&e[Ballast] Predictive action: {detail}"));
        }
    }

    /// Spike test: with at least 4 samples, the newest must be at
    /// least double the sample `min(3, n-1)` positions back and at or
    /// above the MSPT baseline. Returns the ratio when it fires.
    fn spike(&self, samples: &VecDeque<f64>) -> Option<f64> {
        let n = samples.len();
        if n < 4 {
            return None;
        }
        let current = samples[n - 1];
        let lookback = MAX_LOOKBACK.min(n - 1);
        let past = samples[n - 1 - lookback];
        if past <= 0.0 {
            return None;
        }
        let ratio = current / past;
        (ratio >= SPIKE_RATIO && current >= self.config.mspt_baseline).then_some(ratio)
    }

    /// Trend test: with at least `max(3, window/2)` samples, fit a
    /// weighted regression with `w_i = exp(ln 3 / (n-1) * i)` and fire
    /// when the slope meets the threshold while the weighted mean sits
    /// at or above the baseline. Returns the slope when it fires.
    fn trend(&self, samples: &VecDeque<f64>) -> Option<f64> {
        let n = samples.len();
        if n < (self.config.window_seconds / 2).max(3) {
            return None;
        }
        let values: Vec<f64> = samples.iter().copied().collect();
        let weights: Vec<f64> = (0..n)
            .map(|i| ((3.0f64).ln() / (n - 1) as f64 * i as f64).exp())
            .collect();
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64, v))
            .collect();

        let fit = weighted_fit(&points, &weights)?;
        let mean = weighted_mean(&values, &weights)?;
        (fit.slope >= self.config.slope_threshold && mean >= self.config.mspt_baseline)
            .then_some(fit.slope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::config::{ActionKind, ActionList, DistanceReductionConfig};
    use ballast_test_utils::{ManualClock, MockHost};

    use crate::actions::SettingsModified;
    use crate::distributor::WorkloadDistributor;

    struct PredFixture {
        optimizer: PredictiveOptimizer,
        host: Arc<MockHost>,
        distributor: Arc<WorkloadDistributor>,
    }

    fn fixture(config: PredictiveConfig) -> PredFixture {
        let clock = Arc::new(ManualClock::new());
        let host = Arc::new(MockHost::new());
        let distributor = WorkloadDistributor::new(1_000_000_000, clock, host.clone());
        let executor = ActionExecutor::new(
            host.clone(),
            distributor.clone(),
            DistanceReductionConfig::default(),
            DistanceReductionConfig::default(),
            SettingsModified::new(),
        );
        PredFixture {
            optimizer: PredictiveOptimizer::new(config, executor, host.clone()),
            host,
            distributor,
        }
    }

    fn spike_config() -> PredictiveConfig {
        PredictiveConfig {
            enabled: true,
            slope_threshold: 1.5,
            mspt_baseline: 30.0,
            window_seconds: 10,
            cooldown: 60,
            notify: true,
            actions: ActionList::Single(ActionKind::NotifyAdmin),
        }
    }

    #[test]
    fn spike_scenario_fires_once_and_cools_down() {
        let fx = fixture(spike_config());
        let mut now = 0;
        for &mspt in &[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0] {
            now += 1000;
            fx.optimizer.on_second(mspt, now);
        }
        assert!(fx.host.admin_notices().is_empty());

        now += 1000;
        fx.optimizer.on_second(40.0, now);
        // NotifyAdmin action plus the predictive notice itself.
        let after_spike = fx.host.admin_notices().len();
        assert_eq!(after_spike, 2);

        // The identical feed inside the 60 s cool-down stays quiet.
        for _ in 0..9 {
            now += 1000;
            fx.optimizer.on_second(10.0, now);
        }
        now += 1000;
        fx.optimizer.on_second(40.0, now);
        assert_eq!(fx.host.admin_notices().len(), after_spike);
    }

    #[test]
    fn spike_needs_baseline() {
        let mut config = spike_config();
        config.mspt_baseline = 50.0;
        let fx = fixture(config);
        let mut now = 0;
        for &mspt in &[10.0, 10.0, 10.0, 10.0, 40.0] {
            now += 1000;
            fx.optimizer.on_second(mspt, now);
        }
        // 4x the past sample but still under the 50 ms baseline.
        assert!(fx.host.admin_notices().is_empty());
    }

    #[test]
    fn spike_needs_four_samples() {
        let fx = fixture(spike_config());
        fx.optimizer.on_second(10.0, 1000);
        fx.optimizer.on_second(40.0, 2000);
        fx.optimizer.on_second(40.0, 3000);
        assert!(fx.host.admin_notices().is_empty());
    }

    #[test]
    fn sustained_ramp_triggers_trend() {
        let fx = fixture(spike_config());
        let mut now = 0;
        // +2 ms per second from 28: no doubling anywhere, but a clear
        // ramp that crosses the 30 ms baseline.
        for i in 0..8 {
            now += 1000;
            fx.optimizer.on_second(28.0 + 2.0 * i as f64, now);
        }
        assert!(
            !fx.host.admin_notices().is_empty(),
            "trend should have fired"
        );
    }

    #[test]
    fn flat_load_below_baseline_never_triggers() {
        let fx = fixture(spike_config());
        let mut now = 0;
        for _ in 0..30 {
            now += 1000;
            fx.optimizer.on_second(12.0, now);
        }
        assert!(fx.host.admin_notices().is_empty());
    }

    #[test]
    fn disabled_module_ignores_samples() {
        let mut config = spike_config();
        config.enabled = false;
        let fx = fixture(config);
        let mut now = 0;
        for &mspt in &[10.0, 10.0, 10.0, 10.0, 80.0] {
            now += 1000;
            fx.optimizer.on_second(mspt, now);
        }
        assert!(fx.host.admin_notices().is_empty());
        assert_eq!(fx.distributor.queue_size(), 0);
    }
}
