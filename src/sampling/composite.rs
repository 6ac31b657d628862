//! Head plus tail sampling.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    AdaptiveSampler, ExecutionOutcome, ProbabilisticSampler, Sampler, SamplingDecision,
    SamplingInput, TailSampler,
};
use crate::config::{SamplingConfig, SamplingStrategy};

/// Combines a head sampler with a [`TailSampler`].
///
/// The head decision is taken when a call starts. When the call completes a
/// head `Sample` is kept as is; a head `Drop` is re-evaluated by the tail
/// rules so failed and slow calls are still exported.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use workflow_primitives::sampling::{
///     CompositeSampler, ExecutionOutcome, ProbabilisticSampler, SamplingInput, TailSampler,
/// };
///
/// let sampler = CompositeSampler::new(
///     Box::new(ProbabilisticSampler::new(0.0)),
///     TailSampler::new(Duration::from_millis(100)),
/// );
/// let head = sampler.head_decision(&SamplingInput::new(Some("c-1"), "step"));
/// assert!(!head.is_sampled());
///
/// let failed = ExecutionOutcome { duration: Duration::from_millis(3), is_error: true };
/// assert!(sampler.final_decision(&head, &failed).is_sampled());
/// ```
pub struct CompositeSampler {
    head: Box<dyn Sampler>,
    tail: TailSampler,
    decisions: AtomicU64,
    sampled: AtomicU64,
}

impl CompositeSampler {
    /// Combine `head` and `tail`.
    #[must_use]
    pub fn new(head: Box<dyn Sampler>, tail: TailSampler) -> Self {
        Self {
            head,
            tail,
            decisions: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
        }
    }

    /// Build the head and tail samplers described by `config`.
    #[must_use]
    pub fn from_config(config: &SamplingConfig) -> Self {
        let head: Box<dyn Sampler> = match config.strategy {
            SamplingStrategy::Probabilistic => Box::new(ProbabilisticSampler::new(config.rate)),
            SamplingStrategy::Adaptive => {
                Box::new(AdaptiveSampler::new(config.rate, config.adaptive.clone()))
            }
        };
        let tail = TailSampler::new(config.slow_threshold())
            .sample_errors(config.always_sample_errors)
            .sample_slow(config.always_sample_slow);
        Self::new(head, tail)
    }

    /// Decide at call start.
    pub fn head_decision(&self, input: &SamplingInput<'_>) -> SamplingDecision {
        self.head.should_sample(input)
    }

    /// Decide at call end given the head decision. Counts towards [`effective_rate`](Self::effective_rate).
    pub fn final_decision(
        &self,
        head: &SamplingDecision,
        outcome: &ExecutionOutcome,
    ) -> SamplingDecision {
        let decision = if head.is_sampled() {
            head.clone()
        } else {
            self.tail.decide(outcome)
        };
        self.decisions.fetch_add(1, Ordering::Relaxed);
        if decision.is_sampled() {
            self.sampled.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    /// Forward an overhead observation to the head sampler.
    pub fn record_overhead(&self, overhead: f64) {
        self.head.record_overhead(overhead);
    }

    /// Name of the head sampler.
    #[must_use]
    pub fn head_name(&self) -> &'static str {
        self.head.name()
    }

    /// Rate currently applied by the head sampler.
    #[must_use]
    pub fn head_rate(&self) -> f64 {
        self.head.current_rate()
    }

    /// The tail rules.
    #[must_use]
    pub fn tail(&self) -> &TailSampler {
        &self.tail
    }

    /// Fraction of final decisions that sampled, or the head rate before any decision.
    #[must_use]
    pub fn effective_rate(&self) -> f64 {
        let decisions = self.decisions.load(Ordering::Relaxed);
        if decisions == 0 {
            return self.head_rate();
        }
        self.sampled.load(Ordering::Relaxed) as f64 / decisions as f64
    }

    /// Total final decisions taken.
    #[must_use]
    pub fn decisions(&self) -> u64 {
        self.decisions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CompositeSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSampler")
            .field("head", &self.head.name())
            .field("head_rate", &self.head_rate())
            .field("tail", &self.tail)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(ms: u64, is_error: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            duration: Duration::from_millis(ms),
            is_error,
        }
    }

    #[test]
    fn head_sample_is_kept() {
        let sampler = CompositeSampler::new(
            Box::new(ProbabilisticSampler::new(1.0)),
            TailSampler::new(Duration::from_secs(1)),
        );
        let head = sampler.head_decision(&SamplingInput::new(Some("x"), "p"));
        let decision = sampler.final_decision(&head, &outcome(1, false));
        assert!(decision.is_sampled());
        assert_eq!(decision.sampler, "probabilistic");
    }

    #[test]
    fn dropped_head_falls_back_to_tail_rules() {
        let sampler = CompositeSampler::new(
            Box::new(ProbabilisticSampler::new(0.0)),
            TailSampler::new(Duration::from_millis(200)),
        );
        let head = sampler.head_decision(&SamplingInput::new(Some("x"), "p"));
        assert!(!sampler.final_decision(&head, &outcome(5, false)).is_sampled());
        assert_eq!(sampler.final_decision(&head, &outcome(5, true)).reason, "error");
        assert_eq!(sampler.final_decision(&head, &outcome(250, false)).reason, "slow");
        assert!((sampler.effective_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn from_config_selects_head_strategy() {
        let mut config = SamplingConfig::default();
        config.strategy = SamplingStrategy::Adaptive;
        config.rate = 0.3;
        let sampler = CompositeSampler::from_config(&config);
        assert_eq!(sampler.head_name(), "adaptive");
        assert!((sampler.head_rate() - 0.3).abs() < 1e-9);
        assert_eq!(sampler.effective_rate(), sampler.head_rate());
    }
}
