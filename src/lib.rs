//! # workflow-primitives
//!
//! Composable, instrumented async workflow primitives in Rust.
//!
//! Every unit of work implements [`Primitive`]: one async `execute` that takes
//! a [`WorkflowContext`] and a typed input. Primitives compose into larger
//! graphs and can be wrapped for recovery and observability.
//!
//! ## Core Concepts
//!
//! - **Primitive**: the fundamental trait, with [`LambdaPrimitive`] for closures
//! - **WorkflowContext**: correlation and trace ids, baggage, state and checkpoints
//! - **Composition**: [`Sequential`], [`Then`], [`Parallel`], [`Conditional`], [`Switch`]
//! - **Recovery**: [`Retry`], [`Fallback`], [`Saga`], [`Timeout`], [`Cache`]
//! - **Instrumented**: span export, head/tail [`sampling`], [`metrics`] and
//!   Prometheus [`export`] driven by one [`Observability`] handle
//!
//! ## Example: Fluent Pipeline with Recovery and Instrumentation
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use workflow_primitives::{
//!     LambdaPrimitive, Observability, Primitive, PrimitiveExt, RetryPolicy, WorkflowContext,
//! };
//!
//! # tokio_test::block_on(async {
//! let observability = Arc::new(Observability::builder().build().unwrap());
//!
//! let parse = LambdaPrimitive::new(|raw: String| async move {
//!     raw.trim().parse::<i64>().map_err(|e| workflow_primitives::Error::Validation(e.to_string()))
//! })
//! .with_name("parse");
//! let double = LambdaPrimitive::new(|x: i64| async move { Ok::<i64, workflow_primitives::Error>(x * 2) })
//!     .with_name("double");
//!
//! let pipeline = parse
//!     .then(double)
//!     .with_retry(RetryPolicy::new(2).without_jitter())
//!     .with_timeout(Duration::from_secs(5))
//!     .unwrap()
//!     .instrumented(Arc::clone(&observability));
//!
//! let mut ctx = WorkflowContext::new().with_player_id("player-1");
//! assert_eq!(pipeline.execute(&mut ctx, " 21 ".to_string()).await.unwrap(), 42);
//! assert_eq!(observability.metrics().summary().total_executions, 1);
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod instrumented;
pub mod metrics;
pub mod observability;
pub mod primitive;
pub mod recovery;
pub mod sampling;
pub mod tracer;

pub use config::{Environment, ObservabilityConfig};
pub use context::{Checkpoint, WorkflowContext};
pub use error::{Error, Result};
pub use instrumented::Instrumented;
pub use observability::{Observability, ObservabilityBuilder};
pub use primitive::{
    BoxPrimitive, Conditional, LambdaPrimitive, Parallel, Primitive, PrimitiveExt, PrimitiveKind,
    Sequential, Switch, Then,
};
pub use recovery::{
    default_cache_key, Cache, CacheBackend, CacheStats, Fallback, InMemoryCacheBackend, Retry,
    RetryPolicy, Saga, Timeout,
};
