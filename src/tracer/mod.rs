//! Span export seam.
//!
//! [`Instrumented`](crate::Instrumented) builds a [`SpanRecord`] for every
//! sampled execution and hands it to a [`Tracer`]. The tracer is chosen once
//! when the [`Observability`](crate::Observability) handle is built:
//! [`NoopTracer`] when tracing is off, [`LogTracer`] to emit spans as
//! `tracing` events, [`InMemoryTracer`] for tests, and `OtelTracer` (feature
//! `otel`) to forward spans to an OpenTelemetry pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::sampling::SamplingDecision;

#[cfg(feature = "otel")]
mod otel;
#[cfg(feature = "otel")]
pub use otel::OtelTracer;

/// Final status of a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "code", content = "message")]
pub enum SpanStatus {
    /// The wrapped call succeeded.
    Ok,
    /// The wrapped call failed with the given message.
    Error(String),
}

impl SpanStatus {
    /// Whether the status is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// A completed span ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    /// `{domain}.{component}.{action}` span name.
    pub name: String,
    /// 32 hex character trace id.
    pub trace_id: String,
    /// 16 hex character span id.
    pub span_id: String,
    /// Parent span id, absent for root spans.
    pub parent_span_id: Option<String>,
    /// Wall-clock start.
    pub start_time: DateTime<Utc>,
    /// Wall-clock end.
    pub end_time: DateTime<Utc>,
    /// Monotonic duration of the wrapped call.
    pub duration: Duration,
    /// Success or failure.
    pub status: SpanStatus,
    /// Standardized attributes, sorted by key.
    pub attributes: BTreeMap<String, String>,
    /// Decision that caused the span to be exported.
    pub sampling: SamplingDecision,
}

impl SpanRecord {
    /// Look up an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Trace identity of a span that is already open outside the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    /// 32 hex character trace id.
    pub trace_id: String,
    /// 16 hex character span id.
    pub span_id: String,
    /// W3C trace flags.
    pub trace_flags: u8,
}

/// Destination for completed spans.
///
/// `export` must not block for long and must not panic: it is called inline
/// after every sampled execution.
pub trait Tracer: Send + Sync {
    /// Export one completed span.
    fn export(&self, span: SpanRecord);

    /// Span that is current in the surrounding tracing system, adopted as the
    /// parent of executions whose context carries no trace yet.
    fn ambient_parent(&self) -> Option<TraceParent> {
        None
    }

    /// Whether spans are discarded.
    fn is_noop(&self) -> bool {
        false
    }

    /// Short identifier for health reports.
    fn name(&self) -> &'static str;
}

/// Discards every span.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn export(&self, _span: SpanRecord) {}

    fn is_noop(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Emits each span as a `tracing` event on the `workflow_primitives::span` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn export(&self, span: SpanRecord) {
        let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();
        match &span.status {
            SpanStatus::Ok => tracing::info!(
                target: "workflow_primitives::span",
                trace_id = %span.trace_id,
                span.name = %span.name,
                span_id = %span.span_id,
                parent_span_id = span.parent_span_id.as_deref().unwrap_or(""),
                duration_ms = span.duration.as_secs_f64() * 1000.0,
                sampled_by = span.sampling.sampler,
                %attributes,
                "span completed"
            ),
            SpanStatus::Error(message) => tracing::warn!(
                target: "workflow_primitives::span",
                trace_id = %span.trace_id,
                span.name = %span.name,
                span_id = %span.span_id,
                parent_span_id = span.parent_span_id.as_deref().unwrap_or(""),
                duration_ms = span.duration.as_secs_f64() * 1000.0,
                sampled_by = span.sampling.sampler,
                error = %message,
                %attributes,
                "span failed"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Keeps exported spans in memory.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::tracer::{InMemoryTracer, Tracer};
///
/// let tracer = InMemoryTracer::new();
/// assert!(tracer.spans().is_empty());
/// assert!(!tracer.is_noop());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTracer {
    spans: Mutex<Vec<SpanRecord>>,
    ambient: Mutex<Option<TraceParent>>,
}

impl InMemoryTracer {
    /// Create an empty tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `parent` as the ambient span until cleared.
    pub fn set_ambient_parent(&self, parent: Option<TraceParent>) {
        *self.ambient.lock() = parent;
    }

    /// Snapshot of exported spans in export order.
    #[must_use]
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().clone()
    }

    /// Exported spans with the given name.
    #[must_use]
    pub fn spans_named(&self, name: &str) -> Vec<SpanRecord> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Drop all recorded spans.
    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Tracer for InMemoryTracer {
    fn export(&self, span: SpanRecord) {
        self.spans.lock().push(span);
    }

    fn ambient_parent(&self) -> Option<TraceParent> {
        self.ambient.lock().clone()
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Fresh 32 hex character trace id.
#[must_use]
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Fresh non-zero 16 hex character span id.
#[must_use]
pub fn new_span_id() -> String {
    let id = loop {
        let candidate: u64 = rand::random();
        if candidate != 0 {
            break candidate;
        }
    };
    format!("{id:016x}")
}
