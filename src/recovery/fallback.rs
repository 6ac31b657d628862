//! Primary/alternate execution.

use async_trait::async_trait;

use crate::primitive::{Primitive, PrimitiveKind};
use crate::{Result, WorkflowContext};

/// Executes `primary`, and on any error executes `fallback` with the original input.
///
/// If the fallback fails too, the primary's error is returned so the root cause
/// stays visible; the fallback failure is only logged.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{Error, LambdaPrimitive, Primitive, PrimitiveExt, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let model = LambdaPrimitive::new(|_q: String| async move { Err::<String, Error>(Error::Execution("provider down".into())) });
/// let canned = LambdaPrimitive::new(|q: String| async move { Ok::<String, Error>(format!("cached answer for {q}")) });
///
/// let answer = model.with_fallback(canned);
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(answer.execute(&mut ctx, "q".into()).await.unwrap(), "cached answer for q");
/// # });
/// ```
pub struct Fallback<P, F> {
    primary: P,
    fallback: F,
    name: String,
}

impl<P, F> Fallback<P, F>
where
    P: Primitive,
    F: Primitive<Input = P::Input, Output = P::Output>,
    P::Input: Clone,
{
    /// Create a fallback pair.
    pub fn new(primary: P, fallback: F) -> Self {
        let name = format!("fallback({}|{})", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            name,
        }
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<P, F> Primitive for Fallback<P, F>
where
    P: Primitive,
    F: Primitive<Input = P::Input, Output = P::Output>,
    P::Input: Clone,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        let primary_error = match self.primary.execute(ctx, input.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        tracing::debug!(
            primitive = %self.name,
            error = %primary_error,
            "primary failed, running fallback"
        );
        ctx.increment_state("fallback.activations", 1);

        match self.fallback.execute(ctx, input).await {
            Ok(output) => Ok(output),
            Err(fallback_error) => {
                tracing::warn!(
                    primitive = %self.name,
                    primary_error = %primary_error,
                    fallback_error = %fallback_error,
                    "fallback also failed"
                );
                Err(primary_error)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Fallback
    }
}
