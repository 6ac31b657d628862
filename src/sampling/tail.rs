//! Post-completion sampling.

use std::time::Duration;

use super::{ExecutionOutcome, SamplingDecision};

const NAME: &str = "tail";

/// Keeps traces that failed or ran slowly, decided once the call completes.
#[derive(Debug, Clone)]
pub struct TailSampler {
    sample_errors: bool,
    sample_slow: bool,
    slow_threshold: Duration,
}

impl Default for TailSampler {
    fn default() -> Self {
        Self {
            sample_errors: true,
            sample_slow: true,
            slow_threshold: Duration::from_millis(1000),
        }
    }
}

impl TailSampler {
    /// Sampler keeping errors and calls at or above `slow_threshold`.
    #[must_use]
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            ..Self::default()
        }
    }

    /// Enable or disable keeping failed calls.
    #[must_use]
    pub fn sample_errors(mut self, enabled: bool) -> Self {
        self.sample_errors = enabled;
        self
    }

    /// Enable or disable keeping slow calls.
    #[must_use]
    pub fn sample_slow(mut self, enabled: bool) -> Self {
        self.sample_slow = enabled;
        self
    }

    /// Duration at which a call counts as slow.
    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Decide for a completed call.
    #[must_use]
    pub fn decide(&self, outcome: &ExecutionOutcome) -> SamplingDecision {
        if self.sample_errors && outcome.is_error {
            return SamplingDecision::sample(NAME, "error", None);
        }
        if self.sample_slow && outcome.duration >= self.slow_threshold {
            return SamplingDecision::sample(NAME, "slow", None);
        }
        SamplingDecision::drop(NAME, "unremarkable", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ms: u64, is_error: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            duration: Duration::from_millis(ms),
            is_error,
        }
    }

    #[test]
    fn errors_and_slow_calls_are_kept() {
        let sampler = TailSampler::new(Duration::from_millis(500));
        assert_eq!(sampler.decide(&outcome(10, true)).reason, "error");
        assert_eq!(sampler.decide(&outcome(500, false)).reason, "slow");
        assert!(!sampler.decide(&outcome(499, false)).is_sampled());
    }

    #[test]
    fn rules_can_be_disabled() {
        let sampler = TailSampler::new(Duration::from_millis(500))
            .sample_errors(false)
            .sample_slow(false);
        assert!(!sampler.decide(&outcome(10, true)).is_sampled());
        assert!(!sampler.decide(&outcome(10_000, false)).is_sampled());
    }
}
