//! Forward action with compensation.

use async_trait::async_trait;

use crate::primitive::{Primitive, PrimitiveKind};
use crate::{Result, WorkflowContext};

/// Executes `forward`; when it fails, executes `compensation` with the same
/// input and then returns the forward error.
///
/// The forward error is returned whether or not the compensation succeeds. A
/// compensation failure is logged separately and counted in
/// `ctx.state["saga.compensation_failures"]`.
pub struct Saga<F, C> {
    forward: F,
    compensation: C,
    name: String,
}

impl<F, C> Saga<F, C>
where
    F: Primitive,
    C: Primitive<Input = F::Input>,
    F::Input: Clone,
{
    /// Pair a forward action with its compensation.
    pub fn new(forward: F, compensation: C) -> Self {
        let name = format!("saga({})", forward.name());
        Self {
            forward,
            compensation,
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
impl<F, C> Primitive for Saga<F, C>
where
    F: Primitive,
    C: Primitive<Input = F::Input>,
    F::Input: Clone,
{
    type Input = F::Input;
    type Output = F::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: F::Input) -> Result<F::Output> {
        let forward_error = match self.forward.execute(ctx, input.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        tracing::warn!(
            primitive = %self.name,
            error = %forward_error,
            compensation = self.compensation.name(),
            "forward action failed, compensating"
        );
        ctx.checkpoint(format!("{}.compensate", self.name));

        match self.compensation.execute(ctx, input).await {
            Ok(_) => {
                ctx.increment_state("saga.compensations", 1);
            }
            Err(compensation_error) => {
                ctx.increment_state("saga.compensation_failures", 1);
                tracing::error!(
                    primitive = %self.name,
                    forward_error = %forward_error,
                    compensation_error = %compensation_error,
                    "compensation failed"
                );
            }
        }

        Err(forward_error)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Saga
    }
}
