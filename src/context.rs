//! Workflow context carried through an execution graph.
//!
//! A [`WorkflowContext`] is created once per top-level invocation and passed
//! by mutable reference to every primitive. It carries correlation and
//! W3C-compatible trace identifiers, propagated maps (baggage, tags), free-form
//! maps (metadata, state) and an append-only list of timing checkpoints.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{Error, Result};

/// W3C trace flag marking a trace as sampled.
pub const TRACE_FLAG_SAMPLED: u8 = 0x01;

/// A named timing mark recorded during execution.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Checkpoint name, e.g. `"summarize.start"`.
    pub name: String,
    /// Monotonic time at which the checkpoint was recorded.
    pub at: Instant,
}

/// Context passed to every primitive in an execution graph.
///
/// `state` and `metadata` are plain owned maps: they are not safe to share
/// between concurrently running branches, so [`Parallel`](crate::Parallel)
/// gives every branch its own copy through [`create_child_context`].
///
/// # Example
///
/// ```rust
/// use workflow_primitives::WorkflowContext;
///
/// let mut parent = WorkflowContext::new().with_player_id("player-7");
/// parent.checkpoint("received");
///
/// let child = parent.create_child_context();
/// assert_eq!(child.correlation_id(), parent.correlation_id());
/// assert_eq!(child.causation_id(), Some(parent.correlation_id()));
/// assert!(child.checkpoints().is_empty());
/// ```
///
/// [`create_child_context`]: WorkflowContext::create_child_context
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    /// Caller-assigned workflow identifier.
    pub workflow_id: Option<String>,
    /// Caller-assigned session identifier.
    pub session_id: Option<String>,
    /// Caller-assigned player/user identifier.
    pub player_id: Option<String>,
    correlation_id: String,
    causation_id: Option<String>,
    /// 32 hex character trace id, empty until filled.
    pub trace_id: String,
    /// 16 hex character id of the currently open span, empty until filled.
    pub span_id: String,
    /// Span id of the parent span, if any.
    pub parent_span_id: Option<String>,
    /// W3C trace flags.
    pub trace_flags: u8,
    /// Cross-cutting key/values propagated to descendants and exported on spans.
    pub baggage: HashMap<String, String>,
    /// Custom tags attached to spans.
    pub tags: HashMap<String, String>,
    /// Free-form metadata (agent name, LLM provider hints, ...).
    pub metadata: HashMap<String, Value>,
    /// Mutable state written by primitives during execution.
    pub state: HashMap<String, Value>,
    started_at: Instant,
    created_at: DateTime<Utc>,
    checkpoints: Vec<Checkpoint>,
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowContext {
    /// Create a new root context with a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            workflow_id: None,
            session_id: None,
            player_id: None,
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            trace_id: String::new(),
            span_id: String::new(),
            parent_span_id: None,
            trace_flags: 0,
            baggage: HashMap::new(),
            tags: HashMap::new(),
            metadata: HashMap::new(),
            state: HashMap::new(),
            started_at: Instant::now(),
            created_at: Utc::now(),
            checkpoints: Vec::new(),
        }
    }

    /// Create a root context bound to an existing correlation id, e.g. one
    /// received from an inbound request.
    #[must_use]
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        let mut ctx = Self::new();
        ctx.correlation_id = correlation_id.into();
        ctx
    }

    /// Set the workflow id.
    #[must_use]
    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    /// Set the session id.
    #[must_use]
    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Set the player id.
    #[must_use]
    pub fn with_player_id(mut self, id: impl Into<String>) -> Self {
        self.player_id = Some(id.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a baggage entry.
    #[must_use]
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The correlation id shared by every context derived from the root.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The correlation id of the context this one was derived from.
    #[must_use]
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    /// Wall-clock creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Monotonic start time.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time elapsed since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Derive a child context for a sub-execution.
    ///
    /// The correlation id is copied forward, the child's causation id is the
    /// parent's correlation id and its parent span is the parent's current
    /// span. Every map is copied, so the child can be mutated independently.
    #[must_use]
    pub fn create_child_context(&self) -> Self {
        Self {
            workflow_id: self.workflow_id.clone(),
            session_id: self.session_id.clone(),
            player_id: self.player_id.clone(),
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(self.correlation_id.clone()),
            trace_id: self.trace_id.clone(),
            span_id: String::new(),
            parent_span_id: if self.span_id.is_empty() {
                None
            } else {
                Some(self.span_id.clone())
            },
            trace_flags: self.trace_flags,
            baggage: self.baggage.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            state: self.state.clone(),
            started_at: Instant::now(),
            created_at: Utc::now(),
            checkpoints: Vec::new(),
        }
    }

    /// Append a named checkpoint stamped with the current time.
    pub fn checkpoint(&mut self, name: impl Into<String>) {
        self.checkpoints.push(Checkpoint {
            name: name.into(),
            at: Instant::now(),
        });
    }

    /// All checkpoints in recording order.
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Time between the first checkpoint named `from` and the last named `to`.
    #[must_use]
    pub fn elapsed_between(&self, from: &str, to: &str) -> Option<Duration> {
        let start = self.checkpoints.iter().find(|c| c.name == from)?;
        let end = self.checkpoints.iter().rev().find(|c| c.name == to)?;
        Some(end.at.saturating_duration_since(start.at))
    }

    /// Read a state value.
    #[must_use]
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Write a state value.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    /// Add `by` to an integer counter in `state`, returning the new value.
    pub fn increment_state(&mut self, key: &str, by: u64) -> u64 {
        let current = self.state.get(key).and_then(Value::as_u64).unwrap_or(0);
        let next = current.saturating_add(by);
        self.state.insert(key.to_string(), Value::from(next));
        next
    }

    /// Returns a metadata value as a string slice when it is a JSON string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Whether the sampled flag is set.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.trace_flags & TRACE_FLAG_SAMPLED != 0
    }

    /// Render the W3C `traceparent` header, if trace ids are present.
    #[must_use]
    pub fn traceparent(&self) -> Option<String> {
        if self.trace_id.is_empty() || self.span_id.is_empty() {
            return None;
        }
        Some(format!(
            "00-{}-{}-{:02x}",
            self.trace_id, self.span_id, self.trace_flags
        ))
    }

    /// Build a root context continuing a trace from a W3C `traceparent` header.
    ///
    /// The header's span becomes the current span, so the first instrumented
    /// primitive opens a child of the remote caller's span.
    pub fn from_traceparent(header: &str) -> Result<Self> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return Err(Error::Validation(format!(
                "malformed traceparent '{header}'"
            )));
        };
        if *version != "00" {
            return Err(Error::Validation(format!(
                "unsupported traceparent version '{version}'"
            )));
        }
        if !is_lower_hex(trace_id, 32) || trace_id.chars().all(|c| c == '0') {
            return Err(Error::Validation(format!("invalid trace id '{trace_id}'")));
        }
        if !is_lower_hex(span_id, 16) || span_id.chars().all(|c| c == '0') {
            return Err(Error::Validation(format!("invalid span id '{span_id}'")));
        }
        let trace_flags = u8::from_str_radix(flags, 16)
            .map_err(|_| Error::Validation(format!("invalid trace flags '{flags}'")))?;

        let mut ctx = Self::new();
        ctx.trace_id = (*trace_id).to_string();
        ctx.span_id = (*span_id).to_string();
        ctx.trace_flags = trace_flags;
        Ok(ctx)
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
