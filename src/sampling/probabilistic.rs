//! Consistent-hash probabilistic sampling.

use sha2::{Digest, Sha256};

use super::{Sampler, SamplingDecision, SamplingInput};

const NAME: &str = "probabilistic";

/// Samples a fixed fraction of traces.
///
/// The verdict is a deterministic function of the correlation id: the id is
/// hashed with SHA-256 and the first eight bytes, read as a fraction of
/// `u64::MAX + 1`, are compared against the rate. Every primitive in one
/// execution therefore gets the same verdict. Without an id a uniform random
/// draw is used.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::sampling::{ProbabilisticSampler, Sampler, SamplingInput};
///
/// let sampler = ProbabilisticSampler::new(0.25);
/// let input = SamplingInput::new(Some("corr-42"), "summarize");
/// assert_eq!(sampler.should_sample(&input), sampler.should_sample(&input));
/// ```
#[derive(Debug, Clone)]
pub struct ProbabilisticSampler {
    rate: f64,
}

impl ProbabilisticSampler {
    /// Create a sampler; `rate` is clamped to `[0, 1]` and NaN becomes 0.
    #[must_use]
    pub fn new(rate: f64) -> Self {
        Self {
            rate: clamp_rate(rate),
        }
    }

    /// Decide for `correlation_id` at `rate`.
    #[must_use]
    pub fn decide(rate: f64, correlation_id: Option<&str>) -> SamplingDecision {
        let rate = clamp_rate(rate);
        if rate <= 0.0 {
            return SamplingDecision::drop(NAME, "rate_zero", Some(rate));
        }
        if rate >= 1.0 {
            return SamplingDecision::sample(NAME, "rate_one", Some(rate));
        }
        let (fraction, reason_sample, reason_drop) = match correlation_id {
            Some(id) if !id.is_empty() => (hash_fraction(id), "hash_below_rate", "hash_above_rate"),
            _ => (rand::random::<f64>(), "random_below_rate", "random_above_rate"),
        };
        if fraction < rate {
            SamplingDecision::sample(NAME, reason_sample, Some(rate))
        } else {
            SamplingDecision::drop(NAME, reason_drop, Some(rate))
        }
    }
}

impl Sampler for ProbabilisticSampler {
    fn should_sample(&self, input: &SamplingInput<'_>) -> SamplingDecision {
        Self::decide(self.rate, input.correlation_id)
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn current_rate(&self) -> f64 {
        self.rate
    }
}

pub(crate) fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Map an id onto `[0, 1)` via SHA-256.
pub(crate) fn hash_fraction(id: &str) -> f64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(prefix);
    // 53 significant bits keep the result strictly below 1.0
    (value >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::SamplingVerdict;
    use proptest::prelude::*;

    #[test]
    fn rate_extremes() {
        for id in ["a", "b", "corr-1", ""] {
            let input = SamplingInput::new(Some(id), "p");
            assert!(!ProbabilisticSampler::new(0.0).should_sample(&input).is_sampled());
            assert!(ProbabilisticSampler::new(1.0).should_sample(&input).is_sampled());
        }
        assert!(!ProbabilisticSampler::new(0.0).should_sample(&SamplingInput::default()).is_sampled());
        assert!(ProbabilisticSampler::new(1.0).should_sample(&SamplingInput::default()).is_sampled());
    }

    #[test]
    fn out_of_range_rates_are_clamped() {
        assert_eq!(ProbabilisticSampler::new(7.0).current_rate(), 1.0);
        assert_eq!(ProbabilisticSampler::new(-2.0).current_rate(), 0.0);
        assert_eq!(ProbabilisticSampler::new(f64::NAN).current_rate(), 0.0);
    }

    #[test]
    fn observed_rate_tracks_configured_rate() {
        let sampler = ProbabilisticSampler::new(0.2);
        let sampled = (0..10_000)
            .filter(|i| {
                let id = format!("corr-{i}");
                sampler.should_sample(&SamplingInput::new(Some(&id), "p")).is_sampled()
            })
            .count();
        assert!((1_700..2_300).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn decision_carries_rate_and_name() {
        let d = ProbabilisticSampler::decide(0.5, Some("x"));
        assert_eq!(d.sampler, "probabilistic");
        assert_eq!(d.rate, Some(0.5));
        assert!(matches!(d.verdict, SamplingVerdict::Sample | SamplingVerdict::Drop));
    }

    proptest! {
        #[test]
        fn same_id_same_verdict(id in "[a-z0-9-]{1,40}", rate in 0.0f64..=1.0) {
            let sampler = ProbabilisticSampler::new(rate);
            let input = SamplingInput::new(Some(&id), "p");
            prop_assert_eq!(sampler.should_sample(&input).verdict, sampler.should_sample(&input).verdict);
        }

        #[test]
        fn hash_fraction_is_in_unit_interval(id in ".*") {
            let f = hash_fraction(&id);
            prop_assert!((0.0..1.0).contains(&f));
        }

        #[test]
        fn sampled_at_rate_implies_sampled_at_higher_rate(id in "[a-z0-9]{1,20}", low in 0.0f64..1.0, bump in 0.0f64..1.0) {
            let high = (low + bump).min(1.0);
            if ProbabilisticSampler::decide(low, Some(&id)).is_sampled() {
                prop_assert!(ProbabilisticSampler::decide(high, Some(&id)).is_sampled());
            }
        }
    }
}
