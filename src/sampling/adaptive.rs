//! Overhead-driven rate adjustment.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::probabilistic::{clamp_rate, ProbabilisticSampler};
use super::{Sampler, SamplingDecision, SamplingInput};

const NAME: &str = "adaptive";

/// Bounds and target for [`AdaptiveSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    /// Instrumentation overhead the sampler steers towards, as a fraction of wall time.
    pub target_overhead: f64,
    /// Lowest rate the sampler will fall to.
    pub min_rate: f64,
    /// Highest rate the sampler will climb to.
    pub max_rate: f64,
    /// Seconds between adjustments.
    pub adjustment_interval_secs: u64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            target_overhead: 0.02,
            min_rate: 0.01,
            max_rate: 1.0,
            adjustment_interval_secs: 60,
        }
    }
}

impl AdaptiveSettings {
    /// Adjustment interval as a [`Duration`].
    #[must_use]
    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }
}

#[derive(Debug)]
struct AdaptiveState {
    rate: f64,
    overhead_samples: Vec<f64>,
    last_adjustment: Instant,
    adjustments: u64,
}

/// A [`ProbabilisticSampler`] whose rate follows measured overhead.
///
/// Overhead observations are buffered. Once per adjustment interval their
/// mean is compared against the target: above 1.2x the rate shrinks by 20%
/// (not below `min_rate`), below 0.8x it grows by 20% (not above
/// `max_rate`). The buffer is cleared after every adjustment.
#[derive(Debug)]
pub struct AdaptiveSampler {
    settings: AdaptiveSettings,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveSampler {
    /// Create a sampler starting at `initial_rate`, clamped into the configured bounds.
    #[must_use]
    pub fn new(initial_rate: f64, settings: AdaptiveSettings) -> Self {
        let rate = clamp_rate(initial_rate)
            .max(settings.min_rate)
            .min(settings.max_rate.max(settings.min_rate));
        Self {
            settings,
            state: Mutex::new(AdaptiveState {
                rate,
                overhead_samples: Vec::new(),
                last_adjustment: Instant::now(),
                adjustments: 0,
            }),
        }
    }

    /// Configured bounds and target.
    #[must_use]
    pub fn settings(&self) -> &AdaptiveSettings {
        &self.settings
    }

    /// Number of adjustments applied so far.
    #[must_use]
    pub fn adjustments(&self) -> u64 {
        self.state.lock().adjustments
    }

    /// Overhead observations waiting for the next adjustment.
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.state.lock().overhead_samples.len()
    }

    fn maybe_adjust(&self, state: &mut AdaptiveState) {
        let now = Instant::now();
        if now.saturating_duration_since(state.last_adjustment) < self.settings.adjustment_interval() {
            return;
        }
        state.last_adjustment = now;
        if state.overhead_samples.is_empty() {
            return;
        }
        let mean = state.overhead_samples.iter().sum::<f64>() / state.overhead_samples.len() as f64;
        state.overhead_samples.clear();

        let target = self.settings.target_overhead;
        let previous = state.rate;
        if mean > target * 1.2 {
            state.rate = (state.rate * 0.8).max(self.settings.min_rate);
        } else if mean < target * 0.8 {
            state.rate = (state.rate * 1.2).min(self.settings.max_rate);
        }
        state.adjustments += 1;
        if (state.rate - previous).abs() > f64::EPSILON {
            tracing::debug!(
                mean_overhead = mean,
                previous_rate = previous,
                rate = state.rate,
                "adaptive sampler adjusted rate"
            );
        }
    }
}

impl Sampler for AdaptiveSampler {
    fn should_sample(&self, input: &SamplingInput<'_>) -> SamplingDecision {
        let mut decision = ProbabilisticSampler::decide(self.current_rate(), input.correlation_id);
        decision.sampler = NAME;
        decision
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn current_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn record_overhead(&self, overhead: f64) {
        if !overhead.is_finite() {
            return;
        }
        let mut state = self.state.lock();
        state.overhead_samples.push(overhead.max(0.0));
        self.maybe_adjust(&mut state);
    }
}
