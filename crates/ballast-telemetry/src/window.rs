//! Rolling TPS averages over fixed wall-clock windows.

use std::collections::VecDeque;

/// The five reporting windows, in seconds.
pub const WINDOW_SECONDS: [usize; 5] = [5, 10, 60, 300, 900];

/// A bounded FIFO of one-second TPS samples.
///
/// An empty window reads as a healthy 20.0 so that early reports never
/// look like an outage.
#[derive(Clone, Debug)]
pub struct WindowAvg {
    samples: VecDeque<f64>,
    cap: usize,
}

impl WindowAvg {
    /// Create a window holding up to `cap` one-second samples.
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append a sample, evicting the oldest once full.
    pub fn record(&mut self, tps: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(tps);
    }

    /// Mean of the retained samples, or 20.0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 20.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One reading across all five windows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowReport {
    /// 5-second average.
    pub tps_5s: f64,
    /// 10-second average.
    pub tps_10s: f64,
    /// 1-minute average.
    pub tps_1m: f64,
    /// 5-minute average.
    pub tps_5m: f64,
    /// 15-minute average.
    pub tps_15m: f64,
}

/// The five standard windows, fed together.
#[derive(Clone, Debug)]
pub struct MetricsWindows {
    windows: [WindowAvg; 5],
}

impl MetricsWindows {
    /// Create the 5 s / 10 s / 1 m / 5 m / 15 m window set.
    pub fn new() -> Self {
        Self {
            windows: WINDOW_SECONDS.map(WindowAvg::new),
        }
    }

    /// Feed one one-second TPS sample to every window.
    pub fn record(&mut self, tps: f64) {
        for window in &mut self.windows {
            window.record(tps);
        }
    }

    /// Current averages across all windows.
    pub fn report(&self) -> WindowReport {
        WindowReport {
            tps_5s: self.windows[0].average(),
            tps_10s: self.windows[1].average(),
            tps_1m: self.windows[2].average(),
            tps_5m: self.windows[3].average(),
            tps_15m: self.windows[4].average(),
        }
    }
}

impl Default for MetricsWindows {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reads_healthy() {
        assert_eq!(WindowAvg::new(5).average(), 20.0);
    }

    #[test]
    fn average_over_retained_samples() {
        let mut w = WindowAvg::new(3);
        w.record(20.0);
        w.record(10.0);
        assert!((w.average() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn oldest_sample_evicted_at_cap() {
        let mut w = WindowAvg::new(3);
        for tps in [20.0, 20.0, 20.0, 5.0] {
            w.record(tps);
        }
        assert_eq!(w.len(), 3);
        assert!((w.average() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn short_windows_react_faster() {
        let mut windows = MetricsWindows::new();
        for _ in 0..20 {
            windows.record(20.0);
        }
        for _ in 0..5 {
            windows.record(10.0);
        }
        let report = windows.report();
        assert!((report.tps_5s - 10.0).abs() < 1e-12);
        assert!(report.tps_10s > report.tps_5s);
        assert!(report.tps_1m > report.tps_10s);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn average_stays_within_sample_bounds(
                samples in prop::collection::vec(0.0f64..=20.0, 1..200),
                cap in 1usize..64,
            ) {
                let mut w = WindowAvg::new(cap);
                for &s in &samples {
                    w.record(s);
                }
                prop_assert!(w.len() <= cap);
                let avg = w.average();
                prop_assert!((0.0..=20.0).contains(&avg));
            }
        }
    }
}
