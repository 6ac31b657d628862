//! Instrumented primitive wrapper for tracing, sampling and metrics.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::Instrument;

use crate::context::TRACE_FLAG_SAMPLED;
use crate::metrics::InFlightGuard;
use crate::primitive::{Primitive, PrimitiveKind};
use crate::sampling::{ExecutionOutcome, SamplingDecision, SamplingInput};
use crate::tracer::{new_span_id, new_trace_id, SpanRecord, SpanStatus};
use crate::{Observability, Result, WorkflowContext};

/// Metadata keys copied onto span attributes when present.
const METADATA_ATTRIBUTES: &[(&str, &str)] = &[
    ("agent_name", "agent.name"),
    ("llm_provider", "llm.provider"),
    ("llm_model", "llm.model"),
];

/// Wraps any primitive with span export, sampling and metric recording.
///
/// For each execution `Instrumented`:
/// - records `<name>.start` and `<name>.end` checkpoints
/// - counts the call as in flight while it runs
/// - starts a trace on the context when it has none, adopting the tracer's
///   ambient span when there is one
/// - opens a new span whose parent is the context's current span, and
///   restores the current span afterwards
/// - decides head and tail sampling, exports sampled spans to the tracer
/// - records duration and outcome in the metrics collector and Prometheus
/// - reports its own overhead to the adaptive sampler
///
/// The wrapped primitive's result is returned unchanged. Nothing on the
/// observability side can fail the call. The end-of-call work also runs when
/// the execution is cancelled by dropping its future, in which case it is
/// recorded as failed with the message `cancelled`.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use workflow_primitives::{Instrumented, LambdaPrimitive, Observability, Primitive, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let observability = Arc::new(Observability::builder().build().unwrap());
/// let step = LambdaPrimitive::new(|x: i32| async move { Ok::<i32, workflow_primitives::Error>(x + 1) })
///     .with_name("increment");
/// let instrumented = Instrumented::new(step, observability).with_component("counter");
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(instrumented.execute(&mut ctx, 5).await.unwrap(), 6);
/// assert_eq!(instrumented.span_name(), "workflow.counter.execute");
/// assert_eq!(ctx.checkpoints().len(), 2);
/// assert_eq!(ctx.trace_id.len(), 32);
/// # });
/// ```
pub struct Instrumented<P> {
    inner: P,
    observability: Arc<Observability>,
    component: Option<String>,
    action: String,
}

impl<P: Primitive> Instrumented<P> {
    /// Wrap `inner`, reporting to `observability`.
    pub fn new(inner: P, observability: Arc<Observability>) -> Self {
        Self {
            inner,
            observability,
            component: None,
            action: "execute".to_string(),
        }
    }

    /// Middle segment of the span name. Defaults to the inner primitive's name.
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Last segment of the span name. Defaults to `execute`.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// `{domain}.{component}.{action}`.
    #[must_use]
    pub fn span_name(&self) -> String {
        let component = self.component.as_deref().unwrap_or_else(|| self.inner.name());
        format!(
            "{}.{}.{}",
            self.observability.config().domain,
            component,
            self.action
        )
    }

    /// The wrapped primitive.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// The observability handle in use.
    pub fn observability(&self) -> &Arc<Observability> {
        &self.observability
    }

    fn attributes(&self, ctx: &WorkflowContext, kind: PrimitiveKind) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("primitive.name".to_string(), self.inner.name().to_string());
        attributes.insert("primitive.type".to_string(), kind.as_str().to_string());
        attributes.insert("correlation.id".to_string(), ctx.correlation_id().to_string());
        if let Some(causation) = ctx.causation_id() {
            attributes.insert("causation.id".to_string(), causation.to_string());
        }
        for (key, value) in [
            ("workflow.id", &ctx.workflow_id),
            ("session.id", &ctx.session_id),
            ("player.id", &ctx.player_id),
        ] {
            if let Some(value) = value {
                attributes.insert(key.to_string(), value.clone());
            }
        }
        for (metadata_key, attribute) in METADATA_ATTRIBUTES {
            if let Some(value) = ctx.metadata_str(metadata_key) {
                attributes.insert((*attribute).to_string(), value.to_string());
            }
        }
        for (key, value) in &ctx.tags {
            attributes.insert(format!("tag.{key}"), value.clone());
        }
        for (key, value) in &ctx.baggage {
            attributes.insert(format!("baggage.{key}"), value.clone());
        }
        attributes
    }
}

#[async_trait]
impl<P> Primitive for Instrumented<P>
where
    P: Primitive,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        let observability = &*self.observability;
        let name = self.inner.name().to_string();
        let kind = self.inner.kind();
        let started = Instant::now();
        let started_wall = Utc::now();

        ctx.checkpoint(format!("{name}.start"));
        let in_flight = observability.metrics().begin_execution();

        if ctx.trace_id.is_empty() {
            match observability.tracer().ambient_parent() {
                Some(parent) => {
                    ctx.trace_id = parent.trace_id;
                    ctx.span_id = parent.span_id;
                    ctx.trace_flags = parent.trace_flags;
                }
                None => ctx.trace_id = new_trace_id(),
            }
        }
        let previous_span = std::mem::replace(&mut ctx.span_id, new_span_id());
        let parent_span_id = if previous_span.is_empty() {
            ctx.parent_span_id.clone()
        } else {
            Some(previous_span.clone())
        };
        let previous_parent = std::mem::replace(&mut ctx.parent_span_id, parent_span_id.clone());
        let previous_flags = ctx.trace_flags;

        let head = observability
            .sampler()
            .head_decision(&SamplingInput::new(Some(ctx.correlation_id()), &name));
        if head.is_sampled() {
            ctx.trace_flags |= TRACE_FLAG_SAMPLED;
        }

        let span_name = self.span_name();
        let attributes = self.attributes(ctx, kind);
        let trace_id = ctx.trace_id.clone();
        let span_id = ctx.span_id.clone();
        let span = tracing::info_span!(
            "primitive",
            otel.name = %span_name,
            primitive.name = %name,
            primitive.kind = kind.as_str(),
            trace_id = %trace_id,
            span_id = %span_id,
        );

        let mut scope = ExecutionScope {
            ctx,
            observability,
            name,
            kind,
            span_name,
            attributes,
            trace_id,
            span_id,
            parent_span_id,
            previous_span,
            previous_parent,
            previous_flags,
            head,
            started,
            started_wall,
            inner_started: Instant::now(),
            in_flight: Some(in_flight),
            status: None,
        };

        let result = self
            .inner
            .execute(&mut *scope.ctx, input)
            .instrument(span)
            .await;
        scope.status = Some(match &result {
            Ok(_) => SpanStatus::Ok,
            Err(err) => SpanStatus::Error(err.to_string()),
        });
        drop(scope);

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Instrumented
    }
}

/// Status recorded for an execution whose future was dropped before completing.
const CANCELLED: &str = "cancelled";

/// State of one instrumented execution, finished on drop.
///
/// Dropping the scope records the end checkpoint, the tail decision, metrics,
/// span export and adaptive overhead, then restores the context's span
/// position. This also runs when the enclosing future is dropped mid-flight,
/// e.g. by [`Timeout`](crate::Timeout) or a failed sibling in
/// [`Parallel`](crate::Parallel); such executions are recorded as failed with
/// the message `cancelled`.
struct ExecutionScope<'a> {
    ctx: &'a mut WorkflowContext,
    observability: &'a Observability,
    name: String,
    kind: PrimitiveKind,
    span_name: String,
    attributes: BTreeMap<String, String>,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    previous_span: String,
    previous_parent: Option<String>,
    previous_flags: u8,
    head: SamplingDecision,
    started: Instant,
    started_wall: DateTime<Utc>,
    inner_started: Instant,
    in_flight: Option<InFlightGuard>,
    status: Option<SpanStatus>,
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        let observability = self.observability;
        let duration = self.inner_started.elapsed();
        let status = self.status.take().unwrap_or_else(|| {
            tracing::debug!(primitive = %self.name, "instrumented primitive cancelled");
            SpanStatus::Error(CANCELLED.to_string())
        });

        self.ctx.checkpoint(format!("{}.end", self.name));
        let sampler = observability.sampler();
        let decision = sampler.final_decision(
            &self.head,
            &ExecutionOutcome {
                duration,
                is_error: status.is_error(),
            },
        );

        let error_message = match &status {
            SpanStatus::Error(message) => Some(message.as_str()),
            SpanStatus::Ok => None,
        };
        if let Some(message) = error_message {
            tracing::debug!(primitive = %self.name, error = %message, "instrumented primitive failed");
        }
        let label = observability
            .metrics()
            .record_execution(&self.name, self.kind, duration, error_message);
        if let Some(exporter) = observability.exporter() {
            exporter.record_execution_labelled(&label, self.kind, duration, error_message.is_none());
        }

        if decision.is_sampled() {
            let end_wall = self.started_wall
                + chrono::Duration::from_std(self.started.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
            observability.tracer().export(SpanRecord {
                name: std::mem::take(&mut self.span_name),
                trace_id: std::mem::take(&mut self.trace_id),
                span_id: std::mem::take(&mut self.span_id),
                parent_span_id: self.parent_span_id.take(),
                start_time: self.started_wall,
                end_time: end_wall,
                duration,
                status,
                attributes: std::mem::take(&mut self.attributes),
                sampling: decision,
            });
        }

        self.in_flight.take();
        self.ctx.span_id = std::mem::take(&mut self.previous_span);
        self.ctx.parent_span_id = self.previous_parent.take();
        self.ctx.trace_flags = self.previous_flags;

        let total = self.started.elapsed();
        if !total.is_zero() {
            let overhead = total.saturating_sub(duration).as_secs_f64() / total.as_secs_f64();
            sampler.record_overhead(overhead);
        }
    }
}
