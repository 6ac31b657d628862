//! Parallel fan-out over branches sharing one input.

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::Instrument;

use super::{BoxPrimitive, Primitive, PrimitiveKind};
use crate::{Error, Result, WorkflowContext};

/// A primitive that runs every branch concurrently over a clone of the same input.
///
/// Each branch executes against its own child context derived with
/// [`WorkflowContext::create_child_context`], so branches never share mutable
/// state. Outputs are returned in branch order regardless of completion order.
///
/// The first branch error fails the whole primitive. Sibling branches still
/// in flight are dropped at that point, which cancels them at their next
/// await point.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{LambdaPrimitive, PrimitiveExt, Primitive, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let fan_out = LambdaPrimitive::new(|x: i32| async move { Ok::<i32, workflow_primitives::Error>(x + 1) })
///     .and(LambdaPrimitive::new(|x: i32| async move { Ok::<i32, workflow_primitives::Error>(x * 10) }));
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(fan_out.execute(&mut ctx, 3).await.unwrap(), vec![4, 30]);
/// # });
/// ```
pub struct Parallel<I, O> {
    branches: Vec<BoxPrimitive<I, O>>,
    name: String,
}

impl<I, O> Parallel<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Create a fan-out from a non-empty list of branches.
    pub fn new(branches: Vec<BoxPrimitive<I, O>>) -> Result<Self> {
        if branches.is_empty() {
            return Err(Error::Config(
                "Parallel requires at least one branch".to_string(),
            ));
        }
        Ok(Self::from_boxed(branches))
    }

    pub(crate) fn from_boxed(branches: Vec<BoxPrimitive<I, O>>) -> Self {
        Self {
            branches,
            name: "parallel".to_string(),
        }
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a branch.
    #[must_use]
    pub fn and<P>(mut self, branch: P) -> Self
    where
        P: Primitive<Input = I, Output = O> + 'static,
    {
        self.branches.push(Box::new(branch));
        self
    }

    /// Add every branch of `other`, producing one flat fan-out.
    #[must_use]
    pub fn merge(mut self, other: Parallel<I, O>) -> Self {
        self.branches.extend(other.branches);
        self
    }

    /// Number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Always `false`; construction rejects empty fan-outs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

#[async_trait]
impl<I, O> Primitive for Parallel<I, O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = Vec<O>;

    async fn execute(&self, ctx: &mut WorkflowContext, input: I) -> Result<Vec<O>> {
        let mut children: Vec<WorkflowContext> = self
            .branches
            .iter()
            .map(|_| ctx.create_child_context())
            .collect();

        // Branches poll on this task, so the current tracing span is attached
        // to each one explicitly.
        let parent_span = tracing::Span::current();
        let futures = self
            .branches
            .iter()
            .zip(children.iter_mut())
            .enumerate()
            .map(|(index, (branch, child))| {
                let input = input.clone();
                let span = tracing::debug_span!(
                    parent: &parent_span,
                    "parallel_branch",
                    parallel = %self.name,
                    branch = branch.name(),
                    index
                );
                async move { branch.execute(child, input).await }.instrument(span)
            });

        let outputs = try_join_all(futures).await;
        drop(children);
        match outputs {
            Ok(outputs) => {
                ctx.checkpoint(format!("{}.joined", self.name));
                Ok(outputs)
            }
            Err(e) => {
                tracing::debug!(parallel = %self.name, error = %e, "parallel branch failed");
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LambdaPrimitive, PrimitiveExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn delayed(value: u64, delay_ms: u64) -> BoxPrimitive<u64, u64> {
        LambdaPrimitive::new(move |x: u64| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, Error>(x + value)
        })
        .boxed()
    }

    /// Records the branch's causation and parent span, and mutates its own state.
    struct Inspect;

    #[async_trait]
    impl Primitive for Inspect {
        type Input = ();
        type Output = (Option<String>, Option<String>, u64);

        async fn execute(&self, ctx: &mut WorkflowContext, _input: ()) -> Result<Self::Output> {
            let n = ctx.increment_state("touched", 1);
            Ok((
                ctx.causation_id().map(str::to_string),
                ctx.parent_span_id.clone(),
                n,
            ))
        }
    }

    #[test]
    fn empty_parallel_is_a_config_error() {
        assert!(Parallel::<i32, i32>::new(Vec::new()).err().unwrap().is_config());
    }

    #[tokio::test(start_paused = true)]
    async fn output_order_matches_branch_order() {
        let parallel = Parallel::new(vec![delayed(1, 30), delayed(2, 10), delayed(3, 20)]).unwrap();
        let mut ctx = WorkflowContext::new();
        let out = parallel.execute(&mut ctx, 100).await.unwrap();
        assert_eq!(out, vec![101, 102, 103]);
    }

    #[tokio::test(start_paused = true)]
    async fn branches_run_concurrently() {
        let parallel = Parallel::new((0..5).map(|i| delayed(i, 100)).collect()).unwrap();
        let start = tokio::time::Instant::now();
        let mut ctx = WorkflowContext::new();
        let out = parallel.execute(&mut ctx, 0).await.unwrap();
        assert_eq!(out.len(), 5);
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn branches_get_independent_child_contexts() {
        let mut ctx = WorkflowContext::new();
        ctx.span_id = "00f067aa0ba902b7".to_string();
        ctx.set_state("touched", 10);

        let parallel = Inspect.and(Inspect);
        let out = parallel.execute(&mut ctx, ()).await.unwrap();

        for (causation, parent_span, touched) in out {
            assert_eq!(causation.as_deref(), Some(ctx.correlation_id()));
            assert_eq!(parent_span.as_deref(), Some("00f067aa0ba902b7"));
            assert_eq!(touched, 11);
        }
        assert_eq!(ctx.get_state("touched"), Some(&serde_json::Value::from(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_fails_the_whole_fan_out() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        let slow = LambdaPrimitive::new(move |x: u64| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(x)
            }
        });
        let failing = LambdaPrimitive::new(|_x: u64| async move {
            Err::<u64, _>(Error::Execution("branch failed".into()))
        });

        let parallel = slow.and(failing).and(delayed(1, 1));
        let mut ctx = WorkflowContext::new();
        let err = parallel.execute(&mut ctx, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "Execution error: branch failed");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn merge_flattens_nested_fan_outs() {
        let a = Parallel::new(vec![delayed(1, 0), delayed(2, 0)]).unwrap();
        let b = Parallel::new(vec![delayed(3, 0)]).unwrap();
        let merged = a.merge(b);
        assert_eq!(merged.len(), 3);
        let mut ctx = WorkflowContext::new();
        assert_eq!(merged.execute(&mut ctx, 0).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn output_length_matches_branch_count() {
        for k in 1..8u64 {
            let parallel = Parallel::new((0..k).map(|i| delayed(i, 0)).collect()).unwrap();
            let mut ctx = WorkflowContext::new();
            let out = parallel.execute(&mut ctx, 0).await.unwrap();
            assert_eq!(out, (0..k).collect::<Vec<_>>());
        }
    }
}
