//! Prometheus exposition.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `workflow_primitive_executions_total` | Counter | `primitive_name`, `primitive_type`, `status` |
//! | `workflow_primitive_duration_seconds` | Histogram | `primitive_name`, `primitive_type` |
//! | `workflow_primitive_active` | Gauge | - |
//! | `workflow_primitive_requests_per_second` | Gauge | - |
//! | `workflow_slo_compliance` | Gauge | `slo` |
//! | `workflow_slo_error_budget_remaining` | Gauge | `slo` |
//! | `workflow_cost_total` | Counter | `operation` |
//! | `workflow_savings_total` | Counter | `operation` |
//!
//! Every label value passes through the shared
//! [`CardinalityLimiter`](crate::metrics::CardinalityLimiter) first. The
//! `*_labelled` methods take a value the limiter already admitted, so an
//! overflowing observation recorded through both the collector and the
//! exporter is counted once.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::metrics::{CardinalityLimiter, MetricsCollector};
use crate::primitive::PrimitiveKind;
use crate::{Error, Result};

/// Metric names.
pub mod names {
    /// Counter: completed executions.
    pub const EXECUTIONS_TOTAL: &str = "workflow_primitive_executions_total";
    /// Histogram: execution duration in seconds.
    pub const DURATION_SECONDS: &str = "workflow_primitive_duration_seconds";
    /// Gauge: executions in flight.
    pub const ACTIVE: &str = "workflow_primitive_active";
    /// Gauge: executions started per second over the last minute.
    pub const REQUESTS_PER_SECOND: &str = "workflow_primitive_requests_per_second";
    /// Gauge: measured SLO ratio.
    pub const SLO_COMPLIANCE: &str = "workflow_slo_compliance";
    /// Gauge: remaining error budget.
    pub const SLO_ERROR_BUDGET_REMAINING: &str = "workflow_slo_error_budget_remaining";
    /// Counter: accumulated cost.
    pub const COST_TOTAL: &str = "workflow_cost_total";
    /// Counter: accumulated savings.
    pub const SAVINGS_TOTAL: &str = "workflow_savings_total";
}

/// Label keys.
pub mod labels {
    /// Primitive name.
    pub const PRIMITIVE_NAME: &str = "primitive_name";
    /// Primitive variant.
    pub const PRIMITIVE_TYPE: &str = "primitive_type";
    /// `success` or `error`.
    pub const STATUS: &str = "status";
    /// SLO name.
    pub const SLO: &str = "slo";
    /// Cost operation.
    pub const OPERATION: &str = "operation";
}

/// Histogram buckets from 1 ms to 60 s.
pub const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Owns a Prometheus registry with the workflow metrics registered.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use workflow_primitives::export::PrometheusRecorder;
/// use workflow_primitives::metrics::{CardinalityLimiter, OverflowStrategy};
/// use workflow_primitives::PrimitiveKind;
///
/// let limiter = Arc::new(CardinalityLimiter::new(50, OverflowStrategy::Hash));
/// let recorder = PrometheusRecorder::new(limiter).unwrap();
/// recorder.record_execution("summarize", PrimitiveKind::Custom, Duration::from_millis(12), true);
///
/// let text = recorder.render().unwrap();
/// assert!(text.contains("workflow_primitive_executions_total"));
/// ```
pub struct PrometheusRecorder {
    registry: Registry,
    limiter: Arc<CardinalityLimiter>,
    executions_total: CounterVec,
    duration_seconds: HistogramVec,
    active: Gauge,
    requests_per_second: Gauge,
    slo_compliance: GaugeVec,
    slo_error_budget_remaining: GaugeVec,
    cost_total: CounterVec,
    savings_total: CounterVec,
}

impl PrometheusRecorder {
    /// Create a recorder with a fresh registry.
    pub fn new(limiter: Arc<CardinalityLimiter>) -> Result<Self> {
        Self::with_registry(Registry::new(), limiter)
    }

    /// Register the workflow metrics in `registry`.
    pub fn with_registry(registry: Registry, limiter: Arc<CardinalityLimiter>) -> Result<Self> {
        let executions_total = CounterVec::new(
            Opts::new(names::EXECUTIONS_TOTAL, "Completed primitive executions"),
            &[labels::PRIMITIVE_NAME, labels::PRIMITIVE_TYPE, labels::STATUS],
        )?;
        let duration_seconds = HistogramVec::new(
            HistogramOpts::new(names::DURATION_SECONDS, "Primitive execution duration in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            &[labels::PRIMITIVE_NAME, labels::PRIMITIVE_TYPE],
        )?;
        let active = Gauge::new(names::ACTIVE, "Primitive executions in flight")?;
        let requests_per_second = Gauge::new(
            names::REQUESTS_PER_SECOND,
            "Primitive executions started per second over the last minute",
        )?;
        let slo_compliance = GaugeVec::new(
            Opts::new(names::SLO_COMPLIANCE, "Measured SLO ratio (0.0 - 1.0)"),
            &[labels::SLO],
        )?;
        let slo_error_budget_remaining = GaugeVec::new(
            Opts::new(
                names::SLO_ERROR_BUDGET_REMAINING,
                "Remaining SLO error budget (0.0 - 1.0)",
            ),
            &[labels::SLO],
        )?;
        let cost_total = CounterVec::new(
            Opts::new(names::COST_TOTAL, "Accumulated cost per operation"),
            &[labels::OPERATION],
        )?;
        let savings_total = CounterVec::new(
            Opts::new(names::SAVINGS_TOTAL, "Accumulated savings per operation"),
            &[labels::OPERATION],
        )?;

        registry.register(Box::new(executions_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(active.clone()))?;
        registry.register(Box::new(requests_per_second.clone()))?;
        registry.register(Box::new(slo_compliance.clone()))?;
        registry.register(Box::new(slo_error_budget_remaining.clone()))?;
        registry.register(Box::new(cost_total.clone()))?;
        registry.register(Box::new(savings_total.clone()))?;

        Ok(Self {
            registry,
            limiter,
            executions_total,
            duration_seconds,
            active,
            requests_per_second,
            slo_compliance,
            slo_error_budget_remaining,
            cost_total,
            savings_total,
        })
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one completed execution, limiting `name` first.
    pub fn record_execution(
        &self,
        name: &str,
        kind: PrimitiveKind,
        duration: Duration,
        success: bool,
    ) {
        let label = self.limiter.limit(labels::PRIMITIVE_NAME, name);
        self.record_execution_labelled(&label, kind, duration, success);
    }

    /// Record one completed execution under `label`, a value already admitted
    /// by the limiter, e.g. the label returned by
    /// [`MetricsCollector::record_execution`].
    pub fn record_execution_labelled(
        &self,
        label: &str,
        kind: PrimitiveKind,
        duration: Duration,
        success: bool,
    ) {
        let kind = kind.as_str();
        let status = if success { "success" } else { "error" };
        self.executions_total
            .with_label_values(&[label, kind, status])
            .inc();
        self.duration_seconds
            .with_label_values(&[label, kind])
            .observe(duration.as_secs_f64());
    }

    /// Add spend for `operation`, limiting it first.
    pub fn record_cost(&self, operation: &str, amount: f64) {
        if skipped(operation, amount) {
            return;
        }
        let label = self.limiter.limit(labels::OPERATION, operation);
        self.record_cost_labelled(&label, amount);
    }

    /// Add spend under an already admitted `operation` label.
    pub fn record_cost_labelled(&self, label: &str, amount: f64) {
        if !skipped(label, amount) {
            self.cost_total.with_label_values(&[label]).inc_by(amount);
        }
    }

    /// Add savings for `operation`, limiting it first.
    pub fn record_savings(&self, operation: &str, amount: f64) {
        if skipped(operation, amount) {
            return;
        }
        let label = self.limiter.limit(labels::OPERATION, operation);
        self.record_savings_labelled(&label, amount);
    }

    /// Add savings under an already admitted `operation` label.
    pub fn record_savings_labelled(&self, label: &str, amount: f64) {
        if !skipped(label, amount) {
            self.savings_total.with_label_values(&[label]).inc_by(amount);
        }
    }

    /// Refresh gauges from the collector's current state.
    pub fn sync_from(&self, metrics: &MetricsCollector) {
        self.active.set(metrics.throughput().active() as f64);
        self.requests_per_second
            .set(metrics.throughput().requests_per_second());
        for status in metrics.slo_statuses() {
            let slo = self.limiter.limit(labels::SLO, &status.name);
            self.slo_compliance
                .with_label_values(&[&*slo])
                .set(status.compliance);
            self.slo_error_budget_remaining
                .with_label_values(&[&*slo])
                .set(status.error_budget_remaining);
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Execution(format!("metrics exposition is not UTF-8: {e}")))
    }
}

/// Counters only go up; negative or non-finite amounts are logged and skipped.
fn skipped(operation: &str, amount: f64) -> bool {
    let skip = !(amount.is_finite() && amount >= 0.0);
    if skip {
        tracing::debug!(operation, amount, "skipping invalid amount for Prometheus counter");
    }
    skip
}

impl std::fmt::Debug for PrometheusRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusRecorder")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{OverflowStrategy, SloDefinition};

    fn recorder(max: usize) -> PrometheusRecorder {
        PrometheusRecorder::new(Arc::new(CardinalityLimiter::new(max, OverflowStrategy::Hash)))
            .unwrap()
    }

    #[test]
    fn executions_are_labelled_by_status() {
        let recorder = recorder(10);
        recorder.record_execution("llm", PrimitiveKind::Retry, Duration::from_millis(20), true);
        recorder.record_execution("llm", PrimitiveKind::Retry, Duration::from_millis(20), false);
        let text = recorder.render().unwrap();
        assert!(text.contains(
            r#"workflow_primitive_executions_total{primitive_name="llm",primitive_type="retry",status="success"} 1"#
        ));
        assert!(text.contains(
            r#"workflow_primitive_executions_total{primitive_name="llm",primitive_type="retry",status="error"} 1"#
        ));
        assert!(text.contains("workflow_primitive_duration_seconds_bucket"));
        assert!(text.contains(r#"le="60""#));
    }

    #[test]
    fn overflowing_names_share_a_hashed_series() {
        let recorder = recorder(2);
        for name in ["A", "B", "C"] {
            recorder.record_execution(name, PrimitiveKind::Custom, Duration::from_millis(1), true);
        }
        let text = recorder.render().unwrap();
        assert!(text.contains(r#"primitive_name="A""#));
        assert!(text.contains(r#"primitive_name="B""#));
        assert!(!text.contains(r#"primitive_name="C""#));
        assert!(text.contains(r#"primitive_name="h_"#));
    }

    #[test]
    fn gauges_follow_the_collector() {
        let recorder = recorder(10);
        let metrics = MetricsCollector::default();
        metrics
            .register_slo(SloDefinition::error_rate("llm-availability", "llm", 0.9, 0.1))
            .unwrap();
        metrics.record_execution("llm", PrimitiveKind::Custom, Duration::from_millis(1), None);
        recorder.sync_from(&metrics);
        recorder.record_cost("llm.call", 0.5);
        recorder.record_savings("llm.call", 0.2);

        let text = recorder.render().unwrap();
        assert!(text.contains(r#"workflow_slo_compliance{slo="llm-availability"} 1"#));
        assert!(text.contains(r#"workflow_slo_error_budget_remaining{slo="llm-availability"} 1"#));
        assert!(text.contains(r#"workflow_cost_total{operation="llm.call"} 0.5"#));
        assert!(text.contains(r#"workflow_savings_total{operation="llm.call"} 0.2"#));
        assert!(text.contains("workflow_primitive_active 0"));
    }

    #[test]
    fn invalid_amounts_leave_counters_untouched() {
        let recorder = recorder(10);
        recorder.record_cost("llm.call", -1.0);
        recorder.record_savings("llm.call", f64::INFINITY);
        let text = recorder.render().unwrap();
        assert!(!text.contains(r#"operation="llm.call""#));
        assert_eq!(recorder.limiter.dropped(labels::OPERATION), 0);
        assert_eq!(recorder.limiter.stats().keys.get(labels::OPERATION), None);
    }

    #[test]
    fn labelled_recording_does_not_consult_the_limiter() {
        let recorder = recorder(1);
        recorder.record_execution("A", PrimitiveKind::Custom, Duration::from_millis(1), true);
        recorder.record_execution_labelled("h_00000000", PrimitiveKind::Custom, Duration::from_millis(1), true);
        assert_eq!(recorder.limiter.dropped(labels::PRIMITIVE_NAME), 0);
        assert!(recorder.render().unwrap().contains(r#"primitive_name="h_00000000""#));
    }

    #[test]
    fn duplicate_registration_is_a_metrics_error() {
        let registry = Registry::new();
        let limiter = Arc::new(CardinalityLimiter::new(10, OverflowStrategy::Hash));
        PrometheusRecorder::with_registry(registry.clone(), Arc::clone(&limiter)).unwrap();
        let err = PrometheusRecorder::with_registry(registry, limiter).unwrap_err();
        assert_eq!(err.kind_label(), "metrics");
    }
}
