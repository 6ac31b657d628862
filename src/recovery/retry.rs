//! Retry with exponential backoff and jitter.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::primitive::{Primitive, PrimitiveKind};
use crate::{Error, Result, WorkflowContext};

/// Backoff configuration for [`Retry`].
///
/// # Backoff Calculation
///
/// After failed attempt `n` (0-based) the delay is `min(backoff_base^n, max_backoff)`
/// seconds. With jitter enabled the delay is multiplied by a uniform factor in
/// `[0.5, 1.5)`.
///
/// With defaults (base=2, max=60s, 3 retries): 1s, 2s, 4s.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workflow_primitives::RetryPolicy;
///
/// let policy = RetryPolicy::new(5).with_backoff_base(3.0).without_jitter();
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(9));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts: `max_retries + 1`.
    pub max_retries: u32,
    /// Exponential base in seconds.
    pub backoff_base: f64,
    /// Upper bound on a single delay.
    pub max_backoff: Duration,
    /// Multiply each delay by a uniform factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A default policy with `max_retries` retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Set the exponential base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total attempts including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay after failed attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.max(0.0).powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay after failed attempt `attempt`, with jitter applied if enabled.
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// Re-executes a primitive on failure, sleeping between attempts.
///
/// The primitive is invoked at most `max_retries + 1` times with a clone of the
/// original input. When every attempt fails the last attempt's error is
/// returned. The number of attempts is recorded in
/// `ctx.state["retry.<name>.attempts"]`.
pub struct Retry<P> {
    inner: P,
    policy: RetryPolicy,
    name: String,
}

impl<P> Retry<P>
where
    P: Primitive,
    P::Input: Clone,
{
    /// Wrap `inner` with `policy`.
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        let name = format!("retry({})", inner.name());
        Self {
            inner,
            policy,
            name,
        }
    }

    /// Set the name used in spans, metrics and state keys.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Access the inner primitive.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P> Primitive for Retry<P>
where
    P: Primitive,
    P::Input: Clone,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        let attempts_key = format!("retry.{}.attempts", self.name);
        let mut last_error: Option<Error> = None;

        for attempt in 0..self.policy.max_attempts() {
            ctx.increment_state(&attempts_key, 1);
            match self.inner.execute(ctx, input.clone()).await {
                Ok(output) => {
                    if attempt > 0 {
                        tracing::debug!(primitive = %self.name, attempt, "retry succeeded");
                    }
                    return Ok(output);
                }
                Err(e) => {
                    if attempt < self.policy.max_retries {
                        let delay = self.policy.backoff_duration(attempt);
                        tracing::debug!(
                            primitive = %self.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        tracing::warn!(
                            primitive = %self.name,
                            attempts = self.policy.max_attempts(),
                            error = %e,
                            "retries exhausted"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::Execution(format!("{} made no attempts", self.name))
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Retry
    }
}
