//! Rolling-window latency percentiles.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

/// Percentiles over the current window, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    /// Median.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Samples in the window.
    pub count: usize,
}

/// Keeps the newest `window` samples per name.
#[derive(Debug)]
pub struct PercentileTracker {
    window: usize,
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl PercentileTracker {
    /// Tracker keeping at most `window` samples per name (at least one).
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Window size.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Record a sample, evicting the oldest when the window is full.
    pub fn record(&self, name: &str, value_ms: f64) {
        if !value_ms.is_finite() {
            return;
        }
        let mut samples = self.samples.lock();
        let window = samples.entry(name.to_string()).or_default();
        if window.len() == self.window {
            window.pop_front();
        }
        window.push_back(value_ms);
    }

    /// A single percentile, `q` in `[0, 1]`.
    #[must_use]
    pub fn percentile(&self, name: &str, q: f64) -> Option<f64> {
        let sorted = self.sorted(name)?;
        Some(interpolate(&sorted, q))
    }

    /// p50/p90/p95/p99 for `name`, `None` when no samples were recorded.
    #[must_use]
    pub fn percentiles(&self, name: &str) -> Option<Percentiles> {
        let sorted = self.sorted(name)?;
        Some(Percentiles {
            p50: interpolate(&sorted, 0.50),
            p90: interpolate(&sorted, 0.90),
            p95: interpolate(&sorted, 0.95),
            p99: interpolate(&sorted, 0.99),
            count: sorted.len(),
        })
    }

    /// Drop every window.
    pub fn reset(&self) {
        self.samples.lock().clear();
    }

    fn sorted(&self, name: &str) -> Option<Vec<f64>> {
        let samples = self.samples.lock();
        let window = samples.get(name).filter(|w| !w.is_empty())?;
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        drop(samples);
        sorted.sort_by(f64::total_cmp);
        Some(sorted)
    }
}

/// Linear interpolation between closest ranks of a sorted, non-empty slice.
#[must_use]
pub fn interpolate(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_ranks() {
        let tracker = PercentileTracker::new(100);
        for v in 1..=10 {
            tracker.record("p", f64::from(v));
        }
        let p = tracker.percentiles("p").unwrap();
        assert!((p.p50 - 5.5).abs() < 1e-9);
        assert!((p.p90 - 9.1).abs() < 1e-9);
        assert!((p.p99 - 9.91).abs() < 1e-9);
        assert_eq!(p.count, 10);
    }

    #[test]
    fn window_keeps_newest_samples() {
        let tracker = PercentileTracker::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            tracker.record("p", v);
        }
        assert_eq!(tracker.percentile("p", 1.0), Some(3.0));
        assert_eq!(tracker.percentiles("p").unwrap().count, 3);
    }

    #[test]
    fn unknown_name_has_no_percentiles() {
        let tracker = PercentileTracker::new(10);
        assert!(tracker.percentiles("missing").is_none());
        tracker.record("p", 1.0);
        tracker.reset();
        assert!(tracker.percentiles("p").is_none());
    }

    #[test]
    fn single_sample_is_every_percentile() {
        assert_eq!(interpolate(&[4.0], 0.99), 4.0);
        assert_eq!(interpolate(&[], 0.5), 0.0);
    }
}
