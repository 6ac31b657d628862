//! Conditional routing.

use async_trait::async_trait;

use super::{BoxPrimitive, Primitive, PrimitiveKind};
use crate::{Result, WorkflowContext};

type Predicate<T> = Box<dyn Fn(&T, &WorkflowContext) -> bool + Send + Sync>;

/// A primitive that routes to `then` or `else` based on a predicate over the
/// input and context.
///
/// Without an `else` branch, a false predicate passes the input through unchanged.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{Conditional, LambdaPrimitive, Primitive, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let shout = Conditional::new(
///     |s: &String, _ctx: &WorkflowContext| s.ends_with('!'),
///     LambdaPrimitive::new(|s: String| async move { Ok::<String, workflow_primitives::Error>(s.to_uppercase()) }),
/// );
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(shout.execute(&mut ctx, "hey!".to_string()).await.unwrap(), "HEY!");
/// assert_eq!(shout.execute(&mut ctx, "hey".to_string()).await.unwrap(), "hey");
/// # });
/// ```
pub struct Conditional<T> {
    predicate: Predicate<T>,
    then_branch: BoxPrimitive<T, T>,
    else_branch: Option<BoxPrimitive<T, T>>,
    name: String,
}

impl<T: Send + 'static> Conditional<T> {
    /// Create a conditional with only a `then` branch.
    pub fn new<F, P>(predicate: F, then_branch: P) -> Self
    where
        F: Fn(&T, &WorkflowContext) -> bool + Send + Sync + 'static,
        P: Primitive<Input = T, Output = T> + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            then_branch: Box::new(then_branch),
            else_branch: None,
            name: "conditional".to_string(),
        }
    }

    /// Set the branch taken when the predicate is false.
    #[must_use]
    pub fn otherwise<P>(mut self, else_branch: P) -> Self
    where
        P: Primitive<Input = T, Output = T> + 'static,
    {
        self.else_branch = Some(Box::new(else_branch));
        self
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<T: Send + 'static> Primitive for Conditional<T> {
    type Input = T;
    type Output = T;

    async fn execute(&self, ctx: &mut WorkflowContext, input: T) -> Result<T> {
        if (self.predicate)(&input, ctx) {
            self.then_branch.execute(ctx, input).await
        } else if let Some(else_branch) = &self.else_branch {
            else_branch.execute(ctx, input).await
        } else {
            Ok(input)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Conditional
    }
}
