//! OpenTelemetry export.

use std::time::SystemTime;

use opentelemetry::trace::{
    self as otel_trace, Span as _, SpanContext as OtelSpanContext, Status, TraceContextExt as _,
};
use opentelemetry::{Context, KeyValue};

use super::{SpanRecord, SpanStatus, TraceParent, Tracer};

/// Forwards spans to an OpenTelemetry tracer, keeping the workflow's ids.
///
/// Spans are rebuilt with their recorded start/end timestamps and parented on
/// a remote span context carrying `parent_span_id`.
pub struct OtelTracer<T> {
    tracer: T,
}

impl<T> OtelTracer<T>
where
    T: otel_trace::Tracer + Send + Sync,
{
    /// Wrap an OpenTelemetry tracer.
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }

    fn parent_context(span: &SpanRecord, trace_id: otel_trace::TraceId) -> Context {
        let Some(parent) = span.parent_span_id.as_deref() else {
            return Context::new();
        };
        let Ok(parent_id) = otel_trace::SpanId::from_hex(parent) else {
            return Context::new();
        };
        let span_context = OtelSpanContext::new(
            trace_id,
            parent_id,
            otel_trace::TraceFlags::SAMPLED,
            true,
            otel_trace::TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }
}

impl<T> Tracer for OtelTracer<T>
where
    T: otel_trace::Tracer + Send + Sync,
{
    fn export(&self, span: SpanRecord) {
        let Ok(trace_id) = otel_trace::TraceId::from_hex(&span.trace_id) else {
            tracing::warn!(trace_id = %span.trace_id, "span with malformed trace id not exported");
            return;
        };
        let parent_context = Self::parent_context(&span, trace_id);

        let mut builder = self.tracer.span_builder(span.name.clone());
        builder.trace_id = Some(trace_id);
        builder.span_id = otel_trace::SpanId::from_hex(&span.span_id).ok();
        builder.start_time = Some(SystemTime::from(span.start_time));
        builder.attributes = Some(
            span.attributes
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                .collect(),
        );
        builder.status = match &span.status {
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error(message) => Status::error(message.clone()),
        };

        let mut otel_span = self.tracer.build_with_context(builder, &parent_context);
        otel_span.end_with_timestamp(SystemTime::from(span.end_time));
    }

    fn ambient_parent(&self) -> Option<TraceParent> {
        let current = Context::current();
        let span_context = current.span().span_context().clone();
        if !span_context.is_valid() {
            return None;
        }
        Some(TraceParent {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            trace_flags: span_context.trace_flags().to_u8(),
        })
    }

    fn name(&self) -> &'static str {
        "opentelemetry"
    }
}
