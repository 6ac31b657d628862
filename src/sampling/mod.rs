//! Trace sampling.
//!
//! A sampling decision is made per execution. Head samplers decide when a
//! call starts ([`ProbabilisticSampler`], [`AdaptiveSampler`]), the
//! [`TailSampler`] decides after it completes, and the [`CompositeSampler`]
//! combines both so error and slow traces are kept even when head sampling
//! drops them.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub mod adaptive;
pub mod composite;
pub mod probabilistic;
pub mod tail;

pub use adaptive::{AdaptiveSampler, AdaptiveSettings};
pub use composite::CompositeSampler;
pub use probabilistic::ProbabilisticSampler;
pub use tail::TailSampler;

/// Whether a trace is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingVerdict {
    /// Export the trace.
    Sample,
    /// Discard the trace.
    Drop,
}

/// The outcome of one sampling decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingDecision {
    /// Keep or discard.
    pub verdict: SamplingVerdict,
    /// Why the verdict was reached, e.g. `"hash_below_rate"` or `"error"`.
    pub reason: &'static str,
    /// Name of the sampler that decided.
    pub sampler: &'static str,
    /// Sampling rate in effect, for rate-based samplers.
    pub rate: Option<f64>,
}

impl SamplingDecision {
    /// A `Sample` verdict.
    #[must_use]
    pub fn sample(sampler: &'static str, reason: &'static str, rate: Option<f64>) -> Self {
        Self {
            verdict: SamplingVerdict::Sample,
            reason,
            sampler,
            rate,
        }
    }

    /// A `Drop` verdict.
    #[must_use]
    pub fn drop(sampler: &'static str, reason: &'static str, rate: Option<f64>) -> Self {
        Self {
            verdict: SamplingVerdict::Drop,
            reason,
            sampler,
            rate,
        }
    }

    /// Whether the verdict is `Sample`.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.verdict == SamplingVerdict::Sample
    }
}

impl fmt::Display for SamplingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.verdict {
            SamplingVerdict::Sample => "sample",
            SamplingVerdict::Drop => "drop",
        };
        write!(f, "{verdict} by {} ({})", self.sampler, self.reason)
    }
}

/// What a head sampler sees when a call starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplingInput<'a> {
    /// Correlation id of the execution, when known.
    pub correlation_id: Option<&'a str>,
    /// Name of the primitive being executed.
    pub primitive_name: &'a str,
}

impl<'a> SamplingInput<'a> {
    /// Input for a call with the given correlation id.
    #[must_use]
    pub fn new(correlation_id: Option<&'a str>, primitive_name: &'a str) -> Self {
        Self {
            correlation_id,
            primitive_name,
        }
    }
}

/// What the tail sampler sees when a call completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionOutcome {
    /// Wall time of the call.
    pub duration: Duration,
    /// Whether the call failed.
    pub is_error: bool,
}

/// Head-sampling seam.
pub trait Sampler: Send + Sync {
    /// Decide at call start.
    fn should_sample(&self, input: &SamplingInput<'_>) -> SamplingDecision;

    /// Short identifier used in decisions and health reports.
    fn name(&self) -> &'static str;

    /// Rate currently applied.
    fn current_rate(&self) -> f64;

    /// Feed an instrumentation-overhead observation (fraction of wall time).
    /// Ignored by samplers that do not adapt.
    fn record_overhead(&self, _overhead: f64) {}
}
