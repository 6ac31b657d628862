//! Health reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Environment, RetentionConfig, SamplingStrategy};
use crate::metrics::MetricsSummary;
use crate::Observability;

/// Error budget fraction under which a report is degraded.
pub const LOW_ERROR_BUDGET: f64 = 0.25;

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Nothing to report.
    Healthy,
    /// Working, with caveats listed in the reasons.
    Degraded,
    /// An objective is exhausted.
    Unhealthy,
}

/// Sampling section of a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingHealth {
    /// Configured head strategy.
    pub strategy: SamplingStrategy,
    /// Name of the active head sampler.
    pub head_sampler: &'static str,
    /// Configured rate.
    pub configured_rate: f64,
    /// Rate the head sampler applies now.
    pub current_rate: f64,
    /// Fraction of executions exported so far.
    pub effective_rate: f64,
    /// Final decisions taken.
    pub decisions: u64,
    /// Whether errors are always kept.
    pub always_sample_errors: bool,
    /// Whether slow executions are always kept.
    pub always_sample_slow: bool,
    /// Slow threshold in milliseconds.
    pub slow_threshold_ms: u64,
}

/// Storage section of a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageHealth {
    /// Name of the span tracer.
    pub tracer: &'static str,
    /// Whether the Prometheus exporter is registered.
    pub prometheus_enabled: bool,
    /// Retention settings.
    pub retention: RetentionConfig,
}

/// Snapshot of the observability stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Why the status is not healthy.
    pub reasons: Vec<String>,
    /// Deployment environment.
    pub environment: Environment,
    /// Sampling state.
    pub sampling: SamplingHealth,
    /// Metrics summary.
    pub metrics: MetricsSummary,
    /// Storage configuration.
    pub storage: StorageHealth,
    /// When the report was built.
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report for `observability`.
    ///
    /// Unhealthy when an SLO is out of compliance with no budget left.
    /// Degraded when spans are discarded outside development, label values
    /// were dropped, or an SLO budget is below [`LOW_ERROR_BUDGET`].
    #[must_use]
    pub fn evaluate(observability: &Observability) -> Self {
        let config = observability.config();
        let sampler = observability.sampler();
        let metrics = observability.metrics().summary();

        let mut status = HealthStatus::Healthy;
        let mut reasons = Vec::new();
        let mut raise = |level: HealthStatus, reason: String| {
            status = status.max(level);
            reasons.push(reason);
        };

        for slo in &metrics.slos {
            if slo.error_budget_remaining <= 0.0 && !slo.compliant {
                raise(
                    HealthStatus::Unhealthy,
                    format!("SLO '{}' error budget exhausted", slo.name),
                );
            } else if slo.error_budget_remaining < LOW_ERROR_BUDGET {
                raise(
                    HealthStatus::Degraded,
                    format!(
                        "SLO '{}' error budget at {:.0}%",
                        slo.name,
                        slo.error_budget_remaining * 100.0
                    ),
                );
            }
        }
        if observability.tracer().is_noop() && config.environment != Environment::Development {
            raise(
                HealthStatus::Degraded,
                format!("spans are discarded in {}", config.environment),
            );
        }
        if metrics.cardinality.total_dropped > 0 {
            raise(
                HealthStatus::Degraded,
                format!(
                    "{} label values exceeded the cardinality cap of {}",
                    metrics.cardinality.total_dropped, metrics.cardinality.max_label_values
                ),
            );
        }

        Self {
            status,
            reasons,
            environment: config.environment,
            sampling: SamplingHealth {
                strategy: config.sampling.strategy,
                head_sampler: sampler.head_name(),
                configured_rate: config.sampling.rate,
                current_rate: sampler.head_rate(),
                effective_rate: sampler.effective_rate(),
                decisions: sampler.decisions(),
                always_sample_errors: config.sampling.always_sample_errors,
                always_sample_slow: config.sampling.always_sample_slow,
                slow_threshold_ms: config.sampling.slow_threshold_ms,
            },
            metrics,
            storage: StorageHealth {
                tracer: observability.tracer().name(),
                prometheus_enabled: observability.exporter().is_some(),
                retention: config.retention,
            },
            timestamp: Utc::now(),
        }
    }

    /// Whether the status is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::ObservabilityConfig;
    use crate::metrics::SloDefinition;
    use crate::tracer::{InMemoryTracer, NoopTracer};
    use crate::PrimitiveKind;

    #[test]
    fn fresh_stack_is_healthy() {
        let observability = Observability::builder()
            .tracer(Arc::new(InMemoryTracer::new()))
            .build()
            .unwrap();
        let report = HealthReport::evaluate(&observability);
        assert!(report.is_healthy(), "{:?}", report.reasons);
        assert_eq!(report.sampling.head_sampler, "probabilistic");
        assert!(report.storage.prometheus_enabled);
        assert_eq!(report.storage.retention.trace_ttl_hours, 1);
    }

    #[test]
    fn exhausted_budget_is_unhealthy() {
        let observability = Observability::builder()
            .tracer(Arc::new(InMemoryTracer::new()))
            .build()
            .unwrap();
        observability
            .register_slo(SloDefinition::error_rate("llm", "llm", 0.99, 0.01))
            .unwrap();
        observability.metrics().record_execution(
            "llm",
            PrimitiveKind::Custom,
            Duration::from_millis(1),
            Some("down"),
        );
        let report = HealthReport::evaluate(&observability);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reasons[0].contains("llm"));
    }

    #[test]
    fn noop_tracer_in_production_and_dropped_labels_degrade() {
        let mut config = ObservabilityConfig::for_environment(Environment::Production);
        config.cardinality.max_label_values = 1;
        let observability = Observability::builder()
            .config(config)
            .tracer(Arc::new(NoopTracer))
            .build()
            .unwrap();
        for name in ["a", "b"] {
            observability
                .metrics()
                .cardinality()
                .limit("primitive_name", name);
        }
        let report = HealthReport::evaluate(&observability);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.reasons.len(), 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["environment"], "production");
        assert_eq!(json["storage"]["retention"]["metric_ttl_hours"], 720);
    }
}
