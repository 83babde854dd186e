//! Main-thread tick latency sampling.
//!
//! [`TickSampler::record_tick`] runs once per main-loop iteration. It
//! maintains the 100-deep MSPT ring, flushes one TPS sample per elapsed
//! wall second into the five reporting windows and the external 20 s
//! ring, and implements the slow-tick monitor. All external reads go
//! through [`TelemetryHandle`], a bundle of f64-bit atomics, so no
//! other thread ever takes a lock against the main loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ballast_core::config::TickMonitorConfig;
use ballast_core::host::HostAdapter;
use tracing::warn;

use crate::window::{MetricsWindows, WindowReport};

/// MSPT history depth, in ticks.
const MSPT_RING_DEPTH: usize = 100;

/// External TPS is averaged over this many one-second samples.
const TPS_RING_DEPTH: usize = 20;

/// Minimum gap between slow-tick admin notifications.
const SLOW_NOTICE_GAP_MS: u64 = 10_000;

/// Read-only source of the externally reported TPS.
///
/// The seam consumers (threshold engine, redstone gate) depend on, so
/// tests can pin the reading without driving a sampler.
pub trait TpsSource: Send + Sync {
    /// Current TPS.
    fn current_tps(&self) -> f64;
}

/// Lock-free snapshot of the sampler's headline numbers.
///
/// Readers on any thread see the values as of the most recently
/// completed tick. Before the first flush, TPS reads as 20.0.
pub struct TelemetryHandle {
    tps: AtomicU64,
    mspt_avg: AtomicU64,
    mspt_min: AtomicU64,
    mspt_max: AtomicU64,
}

impl TelemetryHandle {
    fn new() -> Self {
        Self {
            tps: AtomicU64::new(20.0f64.to_bits()),
            mspt_avg: AtomicU64::new(0.0f64.to_bits()),
            mspt_min: AtomicU64::new(0.0f64.to_bits()),
            mspt_max: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    fn store(&self, field: &AtomicU64, value: f64) {
        field.store(value.to_bits(), Ordering::Release);
    }

    fn load(&self, field: &AtomicU64) -> f64 {
        f64::from_bits(field.load(Ordering::Acquire))
    }

    /// TPS averaged over the last 20 one-second samples.
    pub fn tps(&self) -> f64 {
        self.load(&self.tps)
    }

    /// Mean milliseconds per tick over the MSPT ring.
    pub fn mspt_avg(&self) -> f64 {
        self.load(&self.mspt_avg)
    }

    /// Minimum tick duration in the MSPT ring.
    pub fn mspt_min(&self) -> f64 {
        self.load(&self.mspt_min)
    }

    /// Maximum tick duration in the MSPT ring.
    pub fn mspt_max(&self) -> f64 {
        self.load(&self.mspt_max)
    }
}

impl TpsSource for TelemetryHandle {
    fn current_tps(&self) -> f64 {
        self.tps()
    }
}

/// Per-tick latency sampler. Main thread only.
pub struct TickSampler {
    monitor: TickMonitorConfig,
    host: Arc<dyn HostAdapter>,
    handle: Arc<TelemetryHandle>,
    mspt_ring: VecDeque<f64>,
    last_tick_nanos: Option<u64>,
    second_start_nanos: u64,
    ticks_in_second: u32,
    tps_ring: VecDeque<f64>,
    windows: MetricsWindows,
    last_slow_notice_ms: Option<u64>,
}

impl TickSampler {
    /// Create a sampler. The host adapter is used for slow-tick
    /// notifications only.
    pub fn new(monitor: TickMonitorConfig, host: Arc<dyn HostAdapter>) -> Self {
        Self {
            monitor,
            host,
            handle: Arc::new(TelemetryHandle::new()),
            mspt_ring: VecDeque::with_capacity(MSPT_RING_DEPTH),
            last_tick_nanos: None,
            second_start_nanos: 0,
            ticks_in_second: 0,
            tps_ring: VecDeque::with_capacity(TPS_RING_DEPTH),
            windows: MetricsWindows::new(),
            last_slow_notice_ms: None,
        }
    }

    /// Shared read handle for other threads.
    pub fn handle(&self) -> Arc<TelemetryHandle> {
        Arc::clone(&self.handle)
    }

    /// Record one tick boundary.
    ///
    /// Returns the flushed one-second TPS sample when at least one
    /// wall second has elapsed since the previous flush; the facade
    /// uses this edge to feed the predictive optimizer.
    pub fn record_tick(&mut self, now_nanos: u64) -> Option<f64> {
        let last = match self.last_tick_nanos.replace(now_nanos) {
            Some(last) => last,
            None => {
                // First observed tick establishes the time origin.
                self.second_start_nanos = now_nanos;
                return None;
            }
        };

        let duration_ms = now_nanos.saturating_sub(last) as f64 / 1_000_000.0;
        if self.mspt_ring.len() == MSPT_RING_DEPTH {
            self.mspt_ring.pop_front();
        }
        self.mspt_ring.push_back(duration_ms);
        self.publish_mspt();
        self.check_slow_tick(duration_ms, now_nanos / 1_000_000);

        self.ticks_in_second += 1;
        let elapsed_nanos = now_nanos.saturating_sub(self.second_start_nanos);
        if elapsed_nanos < 1_000_000_000 {
            return None;
        }

        let elapsed_secs = elapsed_nanos as f64 / 1_000_000_000.0;
        let tps = (self.ticks_in_second as f64 / elapsed_secs).min(20.0);
        self.ticks_in_second = 0;
        self.second_start_nanos = now_nanos;

        if self.tps_ring.len() == TPS_RING_DEPTH {
            self.tps_ring.pop_front();
        }
        self.tps_ring.push_back(tps);
        self.windows.record(tps);

        let reported = self.tps_ring.iter().sum::<f64>() / self.tps_ring.len() as f64;
        self.handle.store(&self.handle.tps, reported);

        Some(tps)
    }

    /// Current averages across the five reporting windows.
    pub fn window_report(&self) -> WindowReport {
        self.windows.report()
    }

    fn publish_mspt(&self) {
        let len = self.mspt_ring.len();
        if len == 0 {
            return;
        }
        let sum: f64 = self.mspt_ring.iter().sum();
        let min = self.mspt_ring.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self
            .mspt_ring
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        self.handle.store(&self.handle.mspt_avg, sum / len as f64);
        self.handle.store(&self.handle.mspt_min, min);
        self.handle.store(&self.handle.mspt_max, max);
    }

    fn check_slow_tick(&mut self, duration_ms: f64, now_ms: u64) {
        if !self.monitor.enabled || duration_ms < self.monitor.threshold_ms {
            return;
        }
        warn!(duration_ms, threshold_ms = self.monitor.threshold_ms, "slow tick");
        if !self.monitor.notify {
            return;
        }
        let due = self
            .last_slow_notice_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= SLOW_NOTICE_GAP_MS);
        if due {
            self.last_slow_notice_ms = Some(now_ms);
            self.host.notify_admins(&format!(
                "&e[Ballast] Slow tick: {duration_ms:.1} ms (threshold {:.0} ms)",
                self.monitor.threshold_ms
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_test_utils::MockHost;

    const MS: u64 = 1_000_000;

    fn sampler(monitor: TickMonitorConfig) -> (TickSampler, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        (TickSampler::new(monitor, host.clone()), host)
    }

    fn steady_ticks(sampler: &mut TickSampler, period_ms: u64, count: usize, start: u64) -> u64 {
        let mut now = start;
        for _ in 0..count {
            sampler.record_tick(now);
            now += period_ms * MS;
        }
        now
    }

    #[test]
    fn first_tick_establishes_origin() {
        let (mut s, _) = sampler(TickMonitorConfig::default());
        assert_eq!(s.record_tick(0), None);
        assert_eq!(s.handle().tps(), 20.0);
    }

    #[test]
    fn healthy_cadence_reads_twenty() {
        let (mut s, _) = sampler(TickMonitorConfig::default());
        // 50 ms ticks for 5 seconds.
        steady_ticks(&mut s, 50, 101, 0);
        let tps = s.handle().tps();
        assert!((tps - 20.0).abs() < 0.2, "tps {tps}");
        assert!((s.handle().mspt_avg() - 50.0).abs() < 0.5);
    }

    #[test]
    fn degraded_cadence_lowers_tps_and_raises_mspt_max() {
        let (mut s, _) = sampler(TickMonitorConfig::default());
        let now = steady_ticks(&mut s, 50, 101, 0);
        // 80 ms ticks for 10 seconds: 12.5 TPS.
        steady_ticks(&mut s, 80, 126, now);
        let report = s.window_report();
        assert!((report.tps_5s - 12.5).abs() < 0.5, "tps_5s {}", report.tps_5s);
        assert!((s.handle().mspt_max() - 80.0).abs() < 0.5);
        // The 20 s external ring still blends the healthy period in.
        assert!(s.handle().tps() > report.tps_5s);
    }

    #[test]
    fn tps_clamped_at_twenty() {
        let (mut s, _) = sampler(TickMonitorConfig::default());
        // 25 ms ticks would read as 40 TPS unclamped.
        steady_ticks(&mut s, 25, 81, 0);
        assert!(s.handle().tps() <= 20.0);
    }

    #[test]
    fn slow_tick_notifies_with_rate_limit() {
        let monitor = TickMonitorConfig {
            enabled: true,
            threshold_ms: 100.0,
            notify: true,
        };
        let (mut s, host) = sampler(monitor);
        s.record_tick(0);
        s.record_tick(150 * MS);
        s.record_tick(300 * MS);
        // Two slow ticks inside the 10 s gap: one notification.
        assert_eq!(host.admin_notices().len(), 1);
        // Past the gap, the next slow tick notifies again.
        s.record_tick(11_000 * MS);
        assert_eq!(host.admin_notices().len(), 2);
    }

    #[test]
    fn disabled_monitor_stays_silent() {
        let (mut s, host) = sampler(TickMonitorConfig::default());
        s.record_tick(0);
        s.record_tick(500 * MS);
        assert!(host.admin_notices().is_empty());
    }
}
