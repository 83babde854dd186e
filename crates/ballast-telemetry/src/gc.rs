//! Collector observation on a dedicated daemon timer.
//!
//! [`GcObserver::poll`] runs every 2 s off-main. It diffs each
//! collector's cumulative counters against the previous poll, keeps a
//! 30-sample sliding window of per-interval collection time for the
//! rolling overhead percentage, and reports long average pauses.
//! All mutation happens on the observer thread; readers snapshot the
//! atomic [`GcStats`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_core::config::GcMonitorConfig;
use ballast_core::host::HostAdapter;
use ballast_core::runtime::RuntimeProbe;
use tracing::{debug, warn};

/// Poll cadence. The overhead denominator assumes this period.
pub const POLL_PERIOD: Duration = Duration::from_secs(2);

/// Overhead window length, in polls (30 × 2 s = 60 s).
const OVERHEAD_WINDOW: usize = 30;

/// Atomic snapshot of collector activity.
pub struct GcStats {
    overhead_pct: AtomicU64,
    total_collections: AtomicU64,
    total_time_ms: AtomicU64,
    last_avg_pause_ms: AtomicU64,
}

impl GcStats {
    fn new() -> Self {
        Self {
            overhead_pct: AtomicU64::new(0.0f64.to_bits()),
            total_collections: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            last_avg_pause_ms: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    /// Percentage of the last 60 s spent collecting.
    pub fn overhead_pct(&self) -> f64 {
        f64::from_bits(self.overhead_pct.load(Ordering::Acquire))
    }

    /// Collections observed since the observer started.
    pub fn total_collections(&self) -> u64 {
        self.total_collections.load(Ordering::Acquire)
    }

    /// Collection time observed since the observer started, in ms.
    pub fn total_time_ms(&self) -> u64 {
        self.total_time_ms.load(Ordering::Acquire)
    }

    /// Average pause of the most recent collection burst, in ms.
    pub fn last_avg_pause_ms(&self) -> f64 {
        f64::from_bits(self.last_avg_pause_ms.load(Ordering::Acquire))
    }
}

struct ObserverState {
    last: HashMap<String, (u64, u64)>,
    window: Vec<u64>,
    window_pos: usize,
    window_len: usize,
}

/// Polls collector counters and publishes derived statistics.
pub struct GcObserver {
    config: GcMonitorConfig,
    probe: Arc<dyn RuntimeProbe>,
    host: Arc<dyn HostAdapter>,
    state: Mutex<ObserverState>,
    stats: Arc<GcStats>,
}

impl GcObserver {
    /// Create an observer; arm it with
    /// [`Scheduler::daemon_timer`](ballast_core::scheduler::Scheduler::daemon_timer)
    /// at [`POLL_PERIOD`].
    pub fn new(
        config: GcMonitorConfig,
        probe: Arc<dyn RuntimeProbe>,
        host: Arc<dyn HostAdapter>,
    ) -> Self {
        Self {
            config,
            probe,
            host,
            state: Mutex::new(ObserverState {
                last: HashMap::new(),
                window: vec![0; OVERHEAD_WINDOW],
                window_pos: 0,
                window_len: 0,
            }),
            stats: Arc::new(GcStats::new()),
        }
    }

    /// Shared read handle for other threads.
    pub fn stats(&self) -> Arc<GcStats> {
        Arc::clone(&self.stats)
    }

    /// One polling pass. Observer thread only.
    pub fn poll(&self) {
        let samples = self.probe.collectors();
        let mut state = self.state.lock().expect("gc observer state poisoned");

        let mut interval_time_ms = 0u64;
        for sample in samples {
            let (last_count, last_time) = state
                .last
                .get(&sample.name)
                .copied()
                .unwrap_or((sample.count, sample.total_time_ms));
            let delta_count = sample.count.saturating_sub(last_count);
            let delta_time = sample.total_time_ms.saturating_sub(last_time);
            state
                .last
                .insert(sample.name.clone(), (sample.count, sample.total_time_ms));

            if delta_count == 0 {
                continue;
            }
            interval_time_ms += delta_time;
            self.stats
                .total_collections
                .fetch_add(delta_count, Ordering::AcqRel);
            self.stats
                .total_time_ms
                .fetch_add(delta_time, Ordering::AcqRel);

            let avg_pause = delta_time as f64 / delta_count as f64;
            self.stats
                .last_avg_pause_ms
                .store(avg_pause.to_bits(), Ordering::Release);
            debug!(collector = %sample.name, delta_count, avg_pause, "collection burst");

            if avg_pause >= self.config.min_duration_ms as f64 {
                self.report_pause(&sample.name, avg_pause, delta_count);
            }
        }

        // Push this interval into the overhead ring.
        let pos = state.window_pos;
        state.window[pos] = interval_time_ms;
        state.window_pos = (pos + 1) % OVERHEAD_WINDOW;
        state.window_len = (state.window_len + 1).min(OVERHEAD_WINDOW);

        let spent: u64 = state.window[..state.window_len.max(1)].iter().sum();
        let budget = state.window_len.max(1) as f64 * POLL_PERIOD.as_millis() as f64;
        let overhead = 100.0 * spent as f64 / budget;
        self.stats
            .overhead_pct
            .store(overhead.to_bits(), Ordering::Release);
    }

    fn report_pause(&self, collector: &str, avg_pause: f64, count: u64) {
        let lowered = collector.to_ascii_lowercase();
        let major = lowered.contains("old") || lowered.contains("major");
        let class = if major { "major" } else { "minor" };
        warn!(collector, avg_pause, count, class, "long collection pause");
        if self.config.notify {
            let color = if major { "&c" } else { "&e" };
            self.host.notify_admins(&format!(
                "{color}[Ballast] {class} GC: {count} collection(s) averaging {avg_pause:.0} ms \
                 ({collector})"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_test_utils::{MockHost, MockProbe};

    fn observer(config: GcMonitorConfig) -> (GcObserver, Arc<MockProbe>, Arc<MockHost>) {
        let probe = Arc::new(MockProbe::new());
        let host = Arc::new(MockHost::new());
        (
            GcObserver::new(config, probe.clone(), host.clone()),
            probe,
            host,
        )
    }

    fn enabled_config(min_duration_ms: u64) -> GcMonitorConfig {
        GcMonitorConfig {
            enabled: true,
            min_duration_ms,
            notify: true,
        }
    }

    #[test]
    fn first_poll_only_records_baselines() {
        let (obs, probe, host) = observer(enabled_config(100));
        probe.set_collector("G1 Old Generation", 5, 1_000);
        obs.poll();
        assert_eq!(obs.stats().total_collections(), 0);
        assert!(host.admin_notices().is_empty());
    }

    #[test]
    fn count_advance_contributes_deltas() {
        let (obs, probe, _) = observer(enabled_config(10_000));
        probe.set_collector("young", 10, 100);
        obs.poll();
        probe.set_collector("young", 13, 160);
        obs.poll();
        let stats = obs.stats();
        assert_eq!(stats.total_collections(), 3);
        assert_eq!(stats.total_time_ms(), 60);
        assert!((stats.last_avg_pause_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn long_pause_classified_major_by_name() {
        let (obs, probe, host) = observer(enabled_config(100));
        probe.set_collector("G1 Old Generation", 0, 0);
        obs.poll();
        probe.set_collector("G1 Old Generation", 1, 400);
        obs.poll();
        let notices = host.admin_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("major"), "{}", notices[0]);
    }

    #[test]
    fn short_pauses_do_not_notify() {
        let (obs, probe, host) = observer(enabled_config(200));
        probe.set_collector("young", 0, 0);
        obs.poll();
        probe.set_collector("young", 4, 100);
        obs.poll();
        assert!(host.admin_notices().is_empty());
    }

    #[test]
    fn overhead_tracks_recent_intervals() {
        let (obs, probe, _) = observer(enabled_config(10_000));
        probe.set_collector("young", 0, 0);
        obs.poll();
        // 500 ms of collection inside one 2000 ms interval, then quiet.
        probe.set_collector("young", 1, 500);
        obs.poll();
        let overhead = obs.stats().overhead_pct();
        // Two intervals in the window, 500 ms over 4000 ms = 12.5%.
        assert!((overhead - 12.5).abs() < 0.1, "overhead {overhead}");
    }
}
