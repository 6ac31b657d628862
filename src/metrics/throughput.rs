//! In-flight concurrency and request rate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Tracks active executions, peak concurrency and requests per second.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    active: AtomicI64,
    peak: AtomicI64,
    total: AtomicU64,
    starts: Mutex<VecDeque<Instant>>,
}

impl ThroughputTracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request start and hold an in-flight slot until the guard drops.
    #[must_use = "the execution only counts as in flight while the guard is alive"]
    pub fn begin(self: &Arc<Self>) -> InFlightGuard {
        let now_active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now_active, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut starts = self.starts.lock();
        starts.push_back(now);
        prune(&mut starts, now);
        drop(starts);

        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Executions currently in flight.
    #[must_use]
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    /// Highest concurrency observed since the last reset.
    #[must_use]
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Requests started since the last reset.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Requests started in the last 60 seconds, per second.
    #[must_use]
    pub fn requests_per_second(&self) -> f64 {
        let now = Instant::now();
        let mut starts = self.starts.lock();
        prune(&mut starts, now);
        starts.len() as f64 / RATE_WINDOW.as_secs_f64()
    }

    /// Clear rate history and peak. In-flight executions stay counted.
    pub fn reset(&self) {
        self.starts.lock().clear();
        self.total.store(0, Ordering::Relaxed);
        self.peak.store(self.active(), Ordering::Release);
    }
}

fn prune(starts: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = starts.front() {
        if now.saturating_duration_since(*front) > RATE_WINDOW {
            starts.pop_front();
        } else {
            break;
        }
    }
}

/// Marks one execution as in flight for as long as it lives.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<ThroughputTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::AcqRel);
    }
}
