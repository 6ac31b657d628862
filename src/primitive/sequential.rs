//! Sequential composition.

use async_trait::async_trait;

use super::{BoxPrimitive, Primitive, PrimitiveKind};
use crate::{Error, Result, WorkflowContext};

/// Two primitives composed sequentially: the output of `A` feeds into `B`.
///
/// Constructed via [`PrimitiveExt::then`](crate::PrimitiveExt::then). Unlike
/// [`Sequential`], the two halves may have different input and output types.
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<A, B> Then<A, B> {
    /// Create a new chained primitive.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

#[async_trait]
impl<A, B> Primitive for Then<A, B>
where
    A: Primitive,
    B: Primitive<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: A::Input) -> Result<B::Output> {
        let intermediate = self.first.execute(ctx, input).await?;
        self.second.execute(ctx, intermediate).await
    }

    fn name(&self) -> &str {
        "then"
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Sequential
    }
}

/// An ordered list of steps where step *i*'s output is step *i+1*'s input.
///
/// Execution stops at the first failing step and its error is returned
/// unchanged. Chaining two `Sequential`s with [`concat`](Sequential::concat)
/// flattens them into one list.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{LambdaPrimitive, PrimitiveExt, Primitive, Sequential, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let add = |n: i32| LambdaPrimitive::new(move |x: i32| async move { Ok::<i32, workflow_primitives::Error>(x + n) });
/// let pipeline = Sequential::new(vec![add(1).boxed(), add(10).boxed()])
///     .unwrap()
///     .then(add(100));
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(pipeline.execute(&mut ctx, 0).await.unwrap(), 111);
/// assert_eq!(pipeline.len(), 3);
/// # });
/// ```
pub struct Sequential<T> {
    steps: Vec<BoxPrimitive<T, T>>,
    name: String,
}

impl<T: Send + 'static> Sequential<T> {
    /// Create a sequence from a non-empty list of steps.
    pub fn new(steps: Vec<BoxPrimitive<T, T>>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::Config(
                "Sequential requires at least one step".to_string(),
            ));
        }
        Ok(Self {
            steps,
            name: "sequential".to_string(),
        })
    }

    /// Create a sequence holding a single step.
    pub fn of<P>(step: P) -> Self
    where
        P: Primitive<Input = T, Output = T> + 'static,
    {
        Self {
            steps: vec![Box::new(step)],
            name: "sequential".to_string(),
        }
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a step.
    ///
    /// A `Sequential` passed here stays one nested step with its own name
    /// and span. Use [`concat`](Self::concat) to splice its steps in instead;
    /// both forms produce the same output.
    #[must_use]
    pub fn then<P>(mut self, step: P) -> Self
    where
        P: Primitive<Input = T, Output = T> + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    /// Append every step of `other`, producing one flat sequence. The name of
    /// `other` is discarded.
    #[must_use]
    pub fn concat(mut self, other: Sequential<T>) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false`; construction rejects empty sequences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the steps in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl<T: Send + 'static> Primitive for Sequential<T> {
    type Input = T;
    type Output = T;

    async fn execute(&self, ctx: &mut WorkflowContext, input: T) -> Result<T> {
        let mut value = input;
        for (index, step) in self.steps.iter().enumerate() {
            value = match step.execute(ctx, value).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(
                        sequence = %self.name,
                        step = step.name(),
                        index,
                        error = %e,
                        "sequential step failed"
                    );
                    return Err(e);
                }
            };
        }
        Ok(value)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Sequential
    }
}
