//! Core primitive trait and fundamental primitive types.
//!
//! This module defines the [`Primitive`] trait, the building block of every
//! execution graph, along with [`LambdaPrimitive`] for closure-based
//! primitives and [`PrimitiveExt`] for fluent composition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::recovery::{Cache, Fallback, Retry, RetryPolicy, Saga, Timeout};
use crate::{Instrumented, Observability, Result, WorkflowContext};

pub mod conditional;
pub mod parallel;
pub mod sequential;
pub mod switch;

pub use conditional::Conditional;
pub use parallel::Parallel;
pub use sequential::{Sequential, Then};
pub use switch::Switch;

/// The closed set of primitive variants, used for span attributes and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// Ordered chain of steps.
    Sequential,
    /// Fan-out over branches sharing one input.
    Parallel,
    /// Boolean routing.
    Conditional,
    /// String-keyed routing.
    Switch,
    /// Repeated attempts with backoff.
    Retry,
    /// Primary with alternate.
    Fallback,
    /// Forward action with compensation.
    Saga,
    /// Deadline-bounded execution.
    Timeout,
    /// TTL memoization.
    Cache,
    /// Observability wrapper.
    Instrumented,
    /// User-defined primitive.
    Custom,
}

impl PrimitiveKind {
    /// Lower-case label for the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::Sequential => "sequential",
            PrimitiveKind::Parallel => "parallel",
            PrimitiveKind::Conditional => "conditional",
            PrimitiveKind::Switch => "switch",
            PrimitiveKind::Retry => "retry",
            PrimitiveKind::Fallback => "fallback",
            PrimitiveKind::Saga => "saga",
            PrimitiveKind::Timeout => "timeout",
            PrimitiveKind::Cache => "cache",
            PrimitiveKind::Instrumented => "instrumented",
            PrimitiveKind::Custom => "custom",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fundamental trait for composable, async units of work.
///
/// Each primitive receives the execution's [`WorkflowContext`] and a typed
/// input, and produces a typed output or an error. Composition primitives
/// return a wrapped primitive's error unchanged.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{Primitive, WorkflowContext, LambdaPrimitive};
///
/// # tokio_test::block_on(async {
/// let double = LambdaPrimitive::new(|x: i32| async move {
///     Ok::<i32, workflow_primitives::Error>(x * 2)
/// });
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(double.execute(&mut ctx, 21).await.unwrap(), 42);
/// # });
/// ```
#[async_trait]
pub trait Primitive: Send + Sync {
    /// The input type for this primitive.
    type Input: Send + 'static;
    /// The output type produced by this primitive.
    type Output: Send + 'static;

    /// Execute this primitive with the provided context and input.
    async fn execute(&self, ctx: &mut WorkflowContext, input: Self::Input)
        -> Result<Self::Output>;

    /// Returns a human-readable name for this primitive. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The variant tag of this primitive.
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Custom
    }
}

/// A type-erased primitive.
pub type BoxPrimitive<I, O> = Box<dyn Primitive<Input = I, Output = O>>;

/// A primitive constructed from an async closure.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::LambdaPrimitive;
///
/// let step = LambdaPrimitive::new(|x: i32| async move {
///     Ok::<i32, workflow_primitives::Error>(x * 2)
/// })
/// .with_name("double");
/// ```
pub struct LambdaPrimitive<I, O, F> {
    f: F,
    name: Option<String>,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> LambdaPrimitive<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    /// Create a new `LambdaPrimitive` from the given closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            name: None,
            _phantom: PhantomData,
        }
    }

    /// Give the primitive a name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[async_trait]
impl<F, I, O, Fut> Primitive for LambdaPrimitive<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, _ctx: &mut WorkflowContext, input: I) -> Result<O> {
        (self.f)(input).await
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("lambda")
    }
}

/// Extension trait providing fluent composition for all [`Primitive`] implementors.
///
/// - [`then`](PrimitiveExt::then): typed sequential pair
/// - [`and`](PrimitiveExt::and): parallel pair over the same input
/// - [`with_retry`](PrimitiveExt::with_retry), [`with_fallback`](PrimitiveExt::with_fallback),
///   [`with_compensation`](PrimitiveExt::with_compensation),
///   [`with_timeout`](PrimitiveExt::with_timeout), [`with_cache`](PrimitiveExt::with_cache):
///   recovery wrappers
/// - [`instrumented`](PrimitiveExt::instrumented): observability wrapper
/// - [`boxed`](PrimitiveExt::boxed): type erasure
pub trait PrimitiveExt: Primitive + Sized {
    /// Chain this primitive with another, feeding this output into `next`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use workflow_primitives::{LambdaPrimitive, PrimitiveExt};
    ///
    /// let pipeline = LambdaPrimitive::new(|x: i32| async move { Ok::<i32, workflow_primitives::Error>(x + 1) })
    ///     .then(LambdaPrimitive::new(|x: i32| async move { Ok::<String, workflow_primitives::Error>(x.to_string()) }));
    /// ```
    fn then<N>(self, next: N) -> Then<Self, N>
    where
        N: Primitive<Input = Self::Output>,
    {
        Then::new(self, next)
    }

    /// Run this primitive and `other` concurrently over the same input.
    fn and<N>(self, other: N) -> Parallel<Self::Input, Self::Output>
    where
        Self: 'static,
        N: Primitive<Input = Self::Input, Output = Self::Output> + 'static,
        Self::Input: Clone,
    {
        Parallel::from_boxed(vec![Box::new(self), Box::new(other)])
    }

    /// Retry this primitive according to `policy`.
    fn with_retry(self, policy: RetryPolicy) -> Retry<Self>
    where
        Self::Input: Clone,
    {
        Retry::new(self, policy)
    }

    /// Run `fallback` with the original input when this primitive fails.
    fn with_fallback<F>(self, fallback: F) -> Fallback<Self, F>
    where
        F: Primitive<Input = Self::Input, Output = Self::Output>,
        Self::Input: Clone,
    {
        Fallback::new(self, fallback)
    }

    /// Run `compensation` with the original input when this primitive fails.
    fn with_compensation<C>(self, compensation: C) -> Saga<Self, C>
    where
        C: Primitive<Input = Self::Input>,
        Self::Input: Clone,
    {
        Saga::new(self, compensation)
    }

    /// Bound this primitive by `timeout` (no grace period).
    fn with_timeout(self, timeout: Duration) -> Result<Timeout<Self>> {
        Timeout::new(self, timeout.as_secs_f64())
    }

    /// Memoize this primitive's output for `ttl` using the default key.
    fn with_cache(self, ttl: Duration) -> Cache<Self>
    where
        Self::Input: Serialize,
        Self::Output: Clone + Sync,
    {
        Cache::new(self, ttl)
    }

    /// Wrap this primitive with tracing, sampling and metrics from `observability`.
    fn instrumented(self, observability: Arc<Observability>) -> Instrumented<Self> {
        Instrumented::new(self, observability)
    }

    /// Erase the concrete primitive type.
    fn boxed(self) -> BoxPrimitive<Self::Input, Self::Output>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<T: Primitive + Sized> PrimitiveExt for T {}

#[async_trait]
impl<P> Primitive for Box<P>
where
    P: Primitive + ?Sized,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        (**self).execute(ctx, input).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> PrimitiveKind {
        (**self).kind()
    }
}

#[async_trait]
impl<P> Primitive for Arc<P>
where
    P: Primitive + ?Sized,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        (**self).execute(ctx, input).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> PrimitiveKind {
        (**self).kind()
    }
}
