//! Deadline-bounded execution.

use std::time::Duration;

use async_trait::async_trait;

use crate::primitive::{Primitive, PrimitiveKind};
use crate::{Error, Result, WorkflowContext};

/// Races a primitive against `timeout + grace`.
///
/// When `timeout` passes, a warning is logged and the in-flight work is given
/// the grace period to finish. If it is still running afterwards its future is
/// dropped, which cancels it, and [`Error::Timeout`] is returned.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use workflow_primitives::{LambdaPrimitive, Primitive, Timeout, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let slow = LambdaPrimitive::new(|_: ()| async move {
///     tokio::time::sleep(Duration::from_secs(2)).await;
///     Ok::<(), workflow_primitives::Error>(())
/// });
/// let bounded = Timeout::new(slow, 0.05).unwrap().with_grace_period(0.01).unwrap();
///
/// let mut ctx = WorkflowContext::new();
/// assert!(bounded.execute(&mut ctx, ()).await.unwrap_err().is_timeout());
/// # });
/// ```
pub struct Timeout<P> {
    inner: P,
    timeout: Duration,
    grace: Duration,
    name: String,
}

impl<P: Primitive> Timeout<P> {
    /// Bound `inner` by `timeout_seconds`, rejecting non-positive, non-finite
    /// or unrepresentable values.
    pub fn new(inner: P, timeout_seconds: f64) -> Result<Self> {
        if !timeout_seconds.is_finite() || timeout_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "timeout must be a positive number of seconds, got {timeout_seconds}"
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_seconds).map_err(|e| {
            Error::Config(format!("timeout of {timeout_seconds} seconds is out of range: {e}"))
        })?;
        let name = format!("timeout({})", inner.name());
        Ok(Self {
            inner,
            timeout,
            grace: Duration::ZERO,
            name,
        })
    }

    /// Allow `grace_seconds` of extra time for in-flight work after the deadline.
    pub fn with_grace_period(mut self, grace_seconds: f64) -> Result<Self> {
        if !grace_seconds.is_finite() || grace_seconds < 0.0 {
            return Err(Error::Config(format!(
                "grace period must be a non-negative number of seconds, got {grace_seconds}"
            )));
        }
        let grace = Duration::try_from_secs_f64(grace_seconds).map_err(|e| {
            Error::Config(format!("grace period of {grace_seconds} seconds is out of range: {e}"))
        })?;
        if self.timeout.checked_add(grace).is_none() {
            return Err(Error::Config(format!(
                "timeout {:?} plus grace period {grace:?} overflows",
                self.timeout
            )));
        }
        self.grace = grace;
        Ok(self)
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The deadline without grace.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace
    }
}

#[async_trait]
impl<P: Primitive> Primitive for Timeout<P> {
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        let limit = self.timeout + self.grace;
        let outcome = {
            let work = self.inner.execute(ctx, input);
            tokio::pin!(work);

            match tokio::time::timeout(self.timeout, &mut work).await {
                Ok(result) => Some(result),
                Err(_) if self.grace.is_zero() => None,
                Err(_) => {
                    tracing::warn!(
                        primitive = %self.name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        grace_ms = self.grace.as_millis() as u64,
                        "deadline exceeded, waiting out grace period"
                    );
                    tokio::time::timeout(self.grace, &mut work).await.ok()
                }
            }
        };

        match outcome {
            Some(result) => result,
            None => {
                tracing::warn!(
                    primitive = %self.name,
                    limit_ms = limit.as_millis() as u64,
                    "cancelled after deadline and grace period"
                );
                ctx.increment_state("timeout.expired", 1);
                Err(Error::Timeout {
                    primitive: self.inner.name().to_string(),
                    limit,
                })
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Timeout
    }
}
