//! Service level objectives and error budgets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What an SLO measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SloObjective {
    /// Fraction of calls that succeed within `threshold_ms`.
    Latency {
        /// Latency threshold in milliseconds.
        threshold_ms: u64,
    },
    /// Fraction of failing calls stays at or below `max_error_rate`.
    ErrorRate {
        /// Highest tolerated error rate.
        max_error_rate: f64,
    },
}

/// A named objective attached to one primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloDefinition {
    /// SLO name, used as the `slo` metric label.
    pub name: String,
    /// Name of the primitive the SLO tracks.
    pub primitive: String,
    /// Target ratio in `(0, 1]`, e.g. `0.99`.
    pub target: f64,
    /// Latency or error-rate objective.
    pub objective: SloObjective,
}

impl SloDefinition {
    /// Latency SLO: `target` of calls succeed within `threshold`.
    pub fn latency(
        name: impl Into<String>,
        primitive: impl Into<String>,
        target: f64,
        threshold: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            primitive: primitive.into(),
            target,
            objective: SloObjective::Latency {
                threshold_ms: u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    /// Error-rate SLO.
    pub fn error_rate(
        name: impl Into<String>,
        primitive: impl Into<String>,
        target: f64,
        max_error_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            primitive: primitive.into(),
            target,
            objective: SloObjective::ErrorRate { max_error_rate },
        }
    }

    /// Reject out-of-range targets and thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("SLO name must not be empty".into()));
        }
        if !(self.target > 0.0 && self.target <= 1.0) {
            return Err(Error::Config(format!(
                "SLO '{}' target {} is outside (0, 1]",
                self.name, self.target
            )));
        }
        match self.objective {
            SloObjective::Latency { threshold_ms: 0 } => Err(Error::Config(format!(
                "SLO '{}' latency threshold must be positive",
                self.name
            ))),
            SloObjective::ErrorRate { max_error_rate } if !(0.0..=1.0).contains(&max_error_rate) => {
                Err(Error::Config(format!(
                    "SLO '{}' max error rate {max_error_rate} is outside [0, 1]",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Point-in-time view of an SLO.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SloStatus {
    /// SLO name.
    pub name: String,
    /// Tracked primitive.
    pub primitive: String,
    /// Target ratio.
    pub target: f64,
    /// Calls observed.
    pub total: u64,
    /// Calls that succeeded.
    pub successful: u64,
    /// Successful calls within the latency threshold (latency SLOs only).
    pub within_threshold: u64,
    /// `successful / total`, 1.0 before any call.
    pub availability: f64,
    /// `within_threshold / total`, 1.0 before any call.
    pub latency_compliance: f64,
    /// The ratio compared against `target`: latency compliance for latency
    /// SLOs, availability for error-rate SLOs.
    pub compliance: f64,
    /// Remaining error budget in `[0, 1]`.
    pub error_budget_remaining: f64,
    /// Whether the objective is currently met.
    pub compliant: bool,
}

/// Counts calls against one [`SloDefinition`].
#[derive(Debug)]
pub struct SloTracker {
    definition: SloDefinition,
    total: AtomicU64,
    successful: AtomicU64,
    within_threshold: AtomicU64,
}

impl SloTracker {
    /// Track `definition`, validating it first.
    pub fn new(definition: SloDefinition) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            definition,
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            within_threshold: AtomicU64::new(0),
        })
    }

    /// The tracked definition.
    #[must_use]
    pub fn definition(&self) -> &SloDefinition {
        &self.definition
    }

    /// Record one call.
    pub fn record(&self, duration: Duration, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
            if let SloObjective::Latency { threshold_ms } = self.definition.objective {
                if duration <= Duration::from_millis(threshold_ms) {
                    self.within_threshold.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Zero the counters, keeping the definition.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.within_threshold.store(0, Ordering::Relaxed);
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SloStatus {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed).min(total);
        let within_threshold = self.within_threshold.load(Ordering::Relaxed).min(successful);
        let ratio = |n: u64| if total == 0 { 1.0 } else { n as f64 / total as f64 };
        let availability = ratio(successful);
        let latency_compliance = ratio(within_threshold);
        let target = self.definition.target;

        let (compliance, error_budget_remaining, compliant) = match self.definition.objective {
            SloObjective::Latency { .. } => {
                let required = total as f64 * target;
                let budget = if required <= 0.0 {
                    1.0
                } else {
                    (within_threshold as f64 / required).clamp(0.0, 1.0)
                };
                (latency_compliance, budget, latency_compliance >= target)
            }
            SloObjective::ErrorRate { max_error_rate } => {
                let failed = (total - successful) as f64;
                let allowed = total as f64 * max_error_rate;
                let error_rate = if total == 0 { 0.0 } else { failed / total as f64 };
                (
                    availability,
                    Self::error_budget(allowed, failed),
                    error_rate <= max_error_rate,
                )
            }
        };

        SloStatus {
            name: self.definition.name.clone(),
            primitive: self.definition.primitive.clone(),
            target,
            total,
            successful,
            within_threshold,
            availability,
            latency_compliance,
            compliance,
            error_budget_remaining,
            compliant,
        }
    }

    /// `(allowed - actual) / allowed` clamped to `[0, 1]`.
    ///
    /// With no allowance the budget is whole until the first error and empty after.
    #[must_use]
    pub fn error_budget(allowed: f64, actual: f64) -> f64 {
        if allowed <= 0.0 {
            return if actual <= 0.0 { 1.0 } else { 0.0 };
        }
        ((allowed - actual) / allowed).clamp(0.0, 1.0)
    }
}
