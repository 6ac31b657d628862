//! The observability handle shared by instrumented primitives.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::{ObservabilityConfig, SamplingStrategy, TracerKind};
use crate::export::{HealthReport, PrometheusRecorder};
use crate::metrics::{MetricsCollector, SloDefinition};
use crate::sampling::{CompositeSampler, ProbabilisticSampler, TailSampler};
use crate::tracer::{LogTracer, NoopTracer, Tracer};
use crate::{Error, Result};

static GLOBAL: OnceLock<RwLock<Arc<Observability>>> = OnceLock::new();

/// Tracer, sampler, metrics and exporter resolved from one configuration.
///
/// Build one at startup and hand it to
/// [`PrimitiveExt::instrumented`](crate::PrimitiveExt::instrumented).
/// [`Observability::global`] returns a process-wide default for callers that
/// do not thread a handle through.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use workflow_primitives::{LambdaPrimitive, Observability, Primitive, PrimitiveExt, WorkflowContext};
/// use workflow_primitives::tracer::InMemoryTracer;
///
/// # tokio_test::block_on(async {
/// let tracer = Arc::new(InMemoryTracer::new());
/// let observability = Arc::new(
///     Observability::builder().tracer(tracer.clone()).build().unwrap(),
/// );
///
/// let step = LambdaPrimitive::new(|x: u32| async move { Ok::<u32, workflow_primitives::Error>(x + 1) })
///     .with_name("increment")
///     .instrumented(Arc::clone(&observability));
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(step.execute(&mut ctx, 1).await.unwrap(), 2);
/// assert_eq!(tracer.spans()[0].name, "workflow.increment.execute");
/// assert_eq!(observability.metrics().primitive_stats("increment").unwrap().executions, 1);
/// # });
/// ```
pub struct Observability {
    config: ObservabilityConfig,
    tracer: Arc<dyn Tracer>,
    sampler: Arc<CompositeSampler>,
    metrics: Arc<MetricsCollector>,
    exporter: Option<Arc<PrometheusRecorder>>,
}

impl Observability {
    /// Start a builder from the development defaults.
    #[must_use]
    pub fn builder() -> ObservabilityBuilder {
        ObservabilityBuilder::default()
    }

    /// Resolve every component from `config`.
    pub fn new(config: ObservabilityConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// A handle that exports nothing: no-op tracer, zero head rate with tail
    /// rules off, no Prometheus registry. Metrics are still collected in memory.
    #[must_use]
    pub fn disabled() -> Self {
        let mut config = ObservabilityConfig::default();
        config.tracer = TracerKind::Noop;
        config.prometheus_enabled = false;
        config.sampling.strategy = SamplingStrategy::Probabilistic;
        config.sampling.rate = 0.0;
        config.sampling.always_sample_errors = false;
        config.sampling.always_sample_slow = false;
        let sampler = CompositeSampler::new(
            Box::new(ProbabilisticSampler::new(0.0)),
            TailSampler::new(config.sampling.slow_threshold())
                .sample_errors(false)
                .sample_slow(false),
        );
        Self {
            metrics: Arc::new(MetricsCollector::from_config(&config)),
            config,
            tracer: Arc::new(NoopTracer),
            sampler: Arc::new(sampler),
            exporter: None,
        }
    }

    /// The process-wide handle.
    ///
    /// Built from [`ObservabilityConfig::from_env`] on first use, falling back
    /// to [`Observability::disabled`] when the environment is invalid.
    pub fn global() -> Arc<Observability> {
        GLOBAL
            .get_or_init(|| RwLock::new(Arc::new(Self::from_env_or_disabled())))
            .read()
            .clone()
    }

    /// Replace the process-wide handle. Primitives already holding the
    /// previous handle keep using it.
    pub fn install_global(observability: Arc<Observability>) {
        let slot = GLOBAL.get_or_init(|| RwLock::new(Arc::clone(&observability)));
        *slot.write() = observability;
    }

    fn from_env_or_disabled() -> Self {
        match ObservabilityConfig::from_env().and_then(Self::new) {
            Ok(observability) => observability,
            Err(err) => {
                tracing::warn!(error = %err, "observability disabled: invalid environment configuration");
                Self::disabled()
            }
        }
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ObservabilityConfig {
        &self.config
    }

    /// Span destination.
    #[must_use]
    pub fn tracer(&self) -> &Arc<dyn Tracer> {
        &self.tracer
    }

    /// Head and tail sampler.
    #[must_use]
    pub fn sampler(&self) -> &Arc<CompositeSampler> {
        &self.sampler
    }

    /// In-memory metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Prometheus exporter, when enabled.
    #[must_use]
    pub fn exporter(&self) -> Option<&Arc<PrometheusRecorder>> {
        self.exporter.as_ref()
    }

    /// Register an SLO with the metrics collector.
    pub fn register_slo(&self, definition: SloDefinition) -> Result<()> {
        self.metrics.register_slo(definition)
    }

    /// Record spend for `operation` in memory and, when enabled, in Prometheus.
    pub fn record_cost(&self, operation: &str, amount: f64) {
        let label = self.metrics.record_cost(operation, amount);
        if let (Some(exporter), Some(label)) = (&self.exporter, label) {
            exporter.record_cost_labelled(&label, amount);
        }
    }

    /// Record avoided spend for `operation`.
    pub fn record_savings(&self, operation: &str, amount: f64) {
        let label = self.metrics.record_savings(operation, amount);
        if let (Some(exporter), Some(label)) = (&self.exporter, label) {
            exporter.record_savings_labelled(&label, amount);
        }
    }

    /// Refresh gauges and render the Prometheus text exposition.
    pub fn render_prometheus(&self) -> Result<String> {
        let exporter = self
            .exporter
            .as_ref()
            .ok_or_else(|| Error::Config("Prometheus exporter is disabled".into()))?;
        exporter.sync_from(&self.metrics);
        exporter.render()
    }

    /// Current health.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::evaluate(self)
    }
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observability")
            .field("environment", &self.config.environment)
            .field("tracer", &self.tracer.name())
            .field("sampler", &self.sampler)
            .field("prometheus", &self.exporter.is_some())
            .finish()
    }
}

/// Builder for [`Observability`].
#[derive(Default)]
pub struct ObservabilityBuilder {
    config: ObservabilityConfig,
    tracer: Option<Arc<dyn Tracer>>,
    sampler: Option<CompositeSampler>,
}

impl ObservabilityBuilder {
    /// Use `config` instead of the development defaults.
    #[must_use]
    pub fn config(mut self, config: ObservabilityConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `tracer` instead of the one named by the configuration.
    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Use `sampler` instead of the one described by the configuration.
    #[must_use]
    pub fn sampler(mut self, sampler: CompositeSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Validate the configuration and assemble the handle.
    pub fn build(self) -> Result<Observability> {
        let config = self.config;
        config.validate()?;

        let tracer = self.tracer.unwrap_or_else(|| match config.tracer {
            TracerKind::Noop => Arc::new(NoopTracer),
            TracerKind::Log => Arc::new(LogTracer),
        });
        let sampler = self
            .sampler
            .unwrap_or_else(|| CompositeSampler::from_config(&config.sampling));
        let metrics = Arc::new(MetricsCollector::from_config(&config));
        let exporter = if config.prometheus_enabled {
            Some(Arc::new(PrometheusRecorder::new(Arc::clone(
                metrics.cardinality(),
            ))?))
        } else {
            None
        };

        tracing::debug!(
            environment = %config.environment,
            tracer = tracer.name(),
            head_sampler = sampler.head_name(),
            rate = sampler.head_rate(),
            prometheus = exporter.is_some(),
            "observability initialised"
        );

        Ok(Observability {
            config,
            tracer,
            sampler: Arc::new(sampler),
            metrics,
            exporter,
        })
    }
}
