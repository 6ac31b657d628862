//! In-process metrics aggregation.
//!
//! [`MetricsCollector`] is the shared, thread-safe sink that
//! [`Instrumented`](crate::Instrumented) reports into. It keeps per-primitive
//! counters and latency percentiles, evaluates registered SLOs, tracks
//! throughput and cost, and owns the [`CardinalityLimiter`] that bounds every
//! per-name map here as well as the label values handed to the Prometheus
//! exporter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::ObservabilityConfig;
use crate::primitive::PrimitiveKind;
use crate::Result;

const PRIMITIVE_NAME_LABEL: &str = "primitive_name";
const OPERATION_LABEL: &str = "operation";
const MAX_ERROR_MESSAGE_LEN: usize = 512;

pub mod cardinality;
pub mod cost;
pub mod percentile;
pub mod slo;
pub mod throughput;

pub use cardinality::{CardinalityLimiter, CardinalityStats, KeyCardinality, OverflowStrategy};
pub use cost::{CostEntry, CostSummary, CostTracker};
pub use percentile::{PercentileTracker, Percentiles};
pub use slo::{SloDefinition, SloObjective, SloStatus, SloTracker};
pub use throughput::{InFlightGuard, ThroughputTracker};

/// Counters for one primitive name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimitiveStats {
    /// Primitive name.
    pub name: String,
    /// Variant tag of the primitive.
    pub kind: PrimitiveKind,
    /// Completed executions.
    pub executions: u64,
    /// Successful executions.
    pub successes: u64,
    /// Failed executions.
    pub failures: u64,
    /// Sum of durations in milliseconds.
    pub total_duration_ms: f64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl PrimitiveStats {
    fn new(name: &str, kind: PrimitiveKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            executions: 0,
            successes: 0,
            failures: 0,
            total_duration_ms: 0.0,
            last_error: None,
        }
    }

    /// Mean duration in milliseconds.
    #[must_use]
    pub fn mean_duration_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_duration_ms / self.executions as f64
        }
    }

    /// `failures / executions`.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.failures as f64 / self.executions as f64
        }
    }
}

/// Aggregate view returned by [`MetricsCollector::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Distinct primitive names seen.
    pub primitive_count: usize,
    /// Executions across all primitives.
    pub total_executions: u64,
    /// Failures across all primitives.
    pub total_failures: u64,
    /// `total_failures / total_executions`.
    pub error_rate: f64,
    /// Executions in flight.
    pub active: i64,
    /// Peak concurrency.
    pub peak_concurrency: i64,
    /// Requests per second over the last minute.
    pub requests_per_second: f64,
    /// Cost totals.
    pub cost: CostSummary,
    /// Label cardinality.
    pub cardinality: CardinalityStats,
    /// Status of every registered SLO.
    pub slos: Vec<SloStatus>,
    /// Per-primitive counters, sorted by name.
    pub primitives: Vec<PrimitiveStats>,
}

/// Shared metrics sink.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use workflow_primitives::metrics::MetricsCollector;
/// use workflow_primitives::PrimitiveKind;
///
/// let metrics = MetricsCollector::default();
/// metrics.record_execution("summarize", PrimitiveKind::Custom, Duration::from_millis(40), None);
/// metrics.record_execution("summarize", PrimitiveKind::Custom, Duration::from_millis(60), Some("rate limited"));
///
/// let stats = metrics.primitive_stats("summarize").unwrap();
/// assert_eq!(stats.executions, 2);
/// assert_eq!(stats.failures, 1);
/// assert_eq!(metrics.percentiles("summarize").unwrap().p50, 50.0);
/// ```
#[derive(Debug)]
pub struct MetricsCollector {
    primitives: RwLock<HashMap<String, PrimitiveStats>>,
    percentiles: PercentileTracker,
    slos: RwLock<BTreeMap<String, SloTracker>>,
    throughput: Arc<ThroughputTracker>,
    costs: CostTracker,
    cardinality: Arc<CardinalityLimiter>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1000, Arc::new(CardinalityLimiter::new(100, OverflowStrategy::Hash)))
    }
}

impl MetricsCollector {
    /// Collector with a percentile window of `percentile_window` and the given limiter.
    #[must_use]
    pub fn new(percentile_window: usize, cardinality: Arc<CardinalityLimiter>) -> Self {
        Self {
            primitives: RwLock::new(HashMap::new()),
            percentiles: PercentileTracker::new(percentile_window),
            slos: RwLock::new(BTreeMap::new()),
            throughput: Arc::new(ThroughputTracker::new()),
            costs: CostTracker::new(),
            cardinality,
        }
    }

    /// Collector sized from `config`.
    #[must_use]
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new(
            config.percentile_window,
            Arc::new(CardinalityLimiter::new(
                config.cardinality.max_label_values,
                config.cardinality.overflow,
            )),
        )
    }

    /// Mark an execution as in flight until the returned guard drops.
    #[must_use = "the execution only counts as in flight while the guard is alive"]
    pub fn begin_execution(&self) -> InFlightGuard {
        self.throughput.begin()
    }

    /// Record a completed execution. `error` carries the failure message, if any.
    ///
    /// `name` passes through the cardinality limiter under `primitive_name`
    /// before any per-name state is touched; the returned label is the value
    /// stored, either `name` itself or its overflow replacement. SLOs match on
    /// the unlimited name.
    pub fn record_execution(
        &self,
        name: &str,
        kind: PrimitiveKind,
        duration: Duration,
        error: Option<&str>,
    ) -> String {
        let label = self.cardinality.limit(PRIMITIVE_NAME_LABEL, name).into_owned();
        let duration_ms = duration.as_secs_f64() * 1000.0;
        {
            let mut primitives = self.primitives.write();
            let stats = primitives
                .entry(label.clone())
                .or_insert_with(|| PrimitiveStats::new(&label, kind));
            stats.executions += 1;
            stats.total_duration_ms += duration_ms;
            match error {
                None => stats.successes += 1,
                Some(message) => {
                    stats.failures += 1;
                    stats.last_error = Some(truncate_message(message));
                }
            }
        }
        self.percentiles.record(&label, duration_ms);

        let slos = self.slos.read();
        for slo in slos.values().filter(|s| s.definition().primitive == name) {
            slo.record(duration, error.is_none());
        }
        label
    }

    /// Add spend for `operation`.
    ///
    /// Returns the admitted `operation` label, or `None` when the amount was
    /// rejected as negative or non-finite.
    pub fn record_cost(&self, operation: &str, amount: f64) -> Option<String> {
        if !cost::is_valid_amount(amount) {
            tracing::warn!(operation, amount, "ignoring invalid cost amount");
            return None;
        }
        let label = self.cardinality.limit(OPERATION_LABEL, operation);
        self.costs
            .record_cost(&label, amount)
            .then(|| label.into_owned())
    }

    /// Add avoided spend for `operation`. Returns as [`record_cost`](Self::record_cost) does.
    pub fn record_savings(&self, operation: &str, amount: f64) -> Option<String> {
        if !cost::is_valid_amount(amount) {
            tracing::warn!(operation, amount, "ignoring invalid savings amount");
            return None;
        }
        let label = self.cardinality.limit(OPERATION_LABEL, operation);
        self.costs
            .record_savings(&label, amount)
            .then(|| label.into_owned())
    }

    /// Register an SLO, replacing any SLO with the same name.
    pub fn register_slo(&self, definition: SloDefinition) -> Result<()> {
        let tracker = SloTracker::new(definition)?;
        let name = tracker.definition().name.clone();
        self.slos.write().insert(name, tracker);
        Ok(())
    }

    /// Status of one SLO.
    #[must_use]
    pub fn slo_status(&self, name: &str) -> Option<SloStatus> {
        self.slos.read().get(name).map(SloTracker::status)
    }

    /// Status of every SLO, sorted by name.
    #[must_use]
    pub fn slo_statuses(&self) -> Vec<SloStatus> {
        self.slos.read().values().map(SloTracker::status).collect()
    }

    /// Latency percentiles of one primitive, in milliseconds.
    #[must_use]
    pub fn percentiles(&self, name: &str) -> Option<Percentiles> {
        self.percentiles.percentiles(name)
    }

    /// Counters of one primitive.
    #[must_use]
    pub fn primitive_stats(&self, name: &str) -> Option<PrimitiveStats> {
        self.primitives.read().get(name).cloned()
    }

    /// Counters of every primitive, sorted by name.
    #[must_use]
    pub fn all_primitive_stats(&self) -> Vec<PrimitiveStats> {
        let mut stats: Vec<PrimitiveStats> = self.primitives.read().values().cloned().collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Throughput tracker.
    #[must_use]
    pub fn throughput(&self) -> &ThroughputTracker {
        &self.throughput
    }

    /// Cost tracker.
    #[must_use]
    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    /// Label limiter shared with the exporter.
    #[must_use]
    pub fn cardinality(&self) -> &Arc<CardinalityLimiter> {
        &self.cardinality
    }

    /// Aggregate snapshot.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let primitives = self.all_primitive_stats();
        let total_executions: u64 = primitives.iter().map(|p| p.executions).sum();
        let total_failures: u64 = primitives.iter().map(|p| p.failures).sum();
        MetricsSummary {
            primitive_count: primitives.len(),
            total_executions,
            total_failures,
            error_rate: if total_executions == 0 {
                0.0
            } else {
                total_failures as f64 / total_executions as f64
            },
            active: self.throughput.active(),
            peak_concurrency: self.throughput.peak(),
            requests_per_second: self.throughput.requests_per_second(),
            cost: self.costs.summary(),
            cardinality: self.cardinality.stats(),
            slos: self.slo_statuses(),
            primitives,
        }
    }

    /// Clear counters, windows, SLO counts and costs. SLO definitions and
    /// admitted label values are kept; in-flight executions stay counted.
    pub fn reset(&self) {
        self.primitives.write().clear();
        self.percentiles.reset();
        for slo in self.slos.read().values() {
            slo.reset();
        }
        self.throughput.reset();
        self.costs.reset();
    }
}

fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((end, _)) => format!("{}...", &message[..end]),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slo_is_fed_by_matching_primitive_only() {
        let metrics = MetricsCollector::default();
        metrics
            .register_slo(SloDefinition::error_rate("llm-errors", "llm", 0.9, 0.1))
            .unwrap();
        metrics.record_execution("llm", PrimitiveKind::Custom, Duration::from_millis(1), Some("x"));
        metrics.record_execution("other", PrimitiveKind::Custom, Duration::from_millis(1), None);

        let status = metrics.slo_status("llm-errors").unwrap();
        assert_eq!(status.total, 1);
        assert_eq!(status.error_budget_remaining, 0.0);
        assert!(metrics.slo_status("missing").is_none());
    }

    #[test]
    fn summary_totals_across_primitives() {
        let metrics = MetricsCollector::default();
        metrics.record_execution("a", PrimitiveKind::Sequential, Duration::from_millis(10), None);
        metrics.record_execution("b", PrimitiveKind::Retry, Duration::from_millis(30), Some("boom"));
        metrics.record_cost("llm", 1.5);
        metrics.record_savings("llm", 0.5);

        let summary = metrics.summary();
        assert_eq!(summary.primitive_count, 2);
        assert_eq!(summary.total_executions, 2);
        assert_eq!(summary.total_failures, 1);
        assert!((summary.error_rate - 0.5).abs() < 1e-9);
        assert!((summary.cost.net_cost - 1.0).abs() < 1e-9);
        assert_eq!(summary.primitives[1].last_error.as_deref(), Some("boom"));
        assert_eq!(summary.primitives[0].kind, PrimitiveKind::Sequential);
    }

    #[test]
    fn reset_keeps_slo_definitions() {
        let metrics = MetricsCollector::default();
        metrics
            .register_slo(SloDefinition::latency("fast", "a", 0.9, Duration::from_millis(5)))
            .unwrap();
        metrics.record_execution("a", PrimitiveKind::Custom, Duration::from_millis(1), None);
        metrics.reset();

        assert!(metrics.primitive_stats("a").is_none());
        assert!(metrics.percentiles("a").is_none());
        assert_eq!(metrics.slo_status("fast").unwrap().total, 0);
    }

    #[test]
    fn primitive_names_are_capped_in_memory() {
        let metrics = MetricsCollector::new(
            100,
            Arc::new(CardinalityLimiter::new(2, OverflowStrategy::Hash)),
        );
        let labels: Vec<String> = ["A", "B", "C"]
            .into_iter()
            .map(|name| metrics.record_execution(name, PrimitiveKind::Custom, Duration::from_millis(1), None))
            .collect();

        assert_eq!(labels[..2], ["A", "B"]);
        assert!(labels[2].starts_with("h_"));
        assert!(metrics.primitive_stats("C").is_none());
        assert!(metrics.percentiles("C").is_none());
        assert_eq!(metrics.primitive_stats(&labels[2]).unwrap().executions, 1);
        assert_eq!(metrics.summary().primitive_count, 3);
        assert_eq!(metrics.cardinality().dropped("primitive_name"), 1);

        for name in ["D", "E"] {
            metrics.record_execution(name, PrimitiveKind::Custom, Duration::from_millis(1), None);
        }
        assert!(metrics.primitive_stats("D").is_none());
        assert!(metrics.primitive_stats("E").is_none());
        assert_eq!(metrics.cardinality().dropped("primitive_name"), 3);
    }

    #[test]
    fn overflowing_names_share_one_entry_with_other_strategy() {
        let metrics = MetricsCollector::new(
            100,
            Arc::new(CardinalityLimiter::new(1, OverflowStrategy::Other)),
        );
        for name in ["A", "B", "C", "D"] {
            metrics.record_execution(name, PrimitiveKind::Custom, Duration::from_millis(1), Some("x"));
        }
        assert_eq!(metrics.summary().primitive_count, 2);
        assert_eq!(metrics.primitive_stats("other").unwrap().failures, 3);
    }

    #[test]
    fn slo_matches_the_unlimited_name() {
        let metrics = MetricsCollector::new(
            100,
            Arc::new(CardinalityLimiter::new(1, OverflowStrategy::Other)),
        );
        metrics
            .register_slo(SloDefinition::error_rate("late", "late", 0.9, 0.1))
            .unwrap();
        metrics.record_execution("first", PrimitiveKind::Custom, Duration::from_millis(1), None);
        metrics.record_execution("late", PrimitiveKind::Custom, Duration::from_millis(1), None);
        assert_eq!(metrics.slo_status("late").unwrap().total, 1);
    }

    #[test]
    fn long_error_messages_are_truncated() {
        let metrics = MetricsCollector::default();
        let message = "e".repeat(10_000);
        metrics.record_execution("p", PrimitiveKind::Custom, Duration::from_millis(1), Some(&message));
        let stored = metrics.primitive_stats("p").unwrap().last_error.unwrap();
        assert_eq!(stored.len(), MAX_ERROR_MESSAGE_LEN + 3);
        assert!(stored.ends_with("..."));
    }

    #[test]
    fn cost_operations_are_capped_and_invalid_amounts_skip_the_limiter() {
        let metrics = MetricsCollector::new(
            100,
            Arc::new(CardinalityLimiter::new(1, OverflowStrategy::Other)),
        );
        assert_eq!(metrics.record_cost("bad", -1.0), None);
        assert_eq!(metrics.record_cost("llm", 1.0).as_deref(), Some("llm"));
        assert_eq!(metrics.record_savings("cache", 0.5).as_deref(), Some("other"));
        assert_eq!(metrics.costs().get("other").unwrap().savings, 0.5);
        assert_eq!(metrics.cardinality().dropped("operation"), 1);
    }

    #[test]
    fn invalid_slo_is_rejected() {
        let metrics = MetricsCollector::default();
        let err = metrics
            .register_slo(SloDefinition::error_rate("bad", "a", 2.0, 0.1))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn concurrent_recording_and_reset() {
        let metrics = Arc::new(MetricsCollector::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        metrics.record_execution("p", PrimitiveKind::Custom, Duration::from_millis(1), None);
                        if i == 0 {
                            metrics.reset();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = metrics.primitive_stats("p").map(|s| s.executions).unwrap_or(0);
        assert!(stats <= 800);
    }
}
