//! String-keyed routing.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{BoxPrimitive, Primitive, PrimitiveKind};
use crate::{Result, WorkflowContext};

type Selector<T> = Box<dyn Fn(&T, &WorkflowContext) -> String + Send + Sync>;

/// A primitive that dispatches to a case selected by a string-valued selector.
///
/// Unmatched keys go to the default branch when one is set, and otherwise the
/// input passes through unchanged.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::{LambdaPrimitive, Primitive, Switch, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let router = Switch::new(|s: &String, _ctx: &WorkflowContext| s.split(':').next().unwrap_or("").to_string())
///     .case("sum", LambdaPrimitive::new(|s: String| async move { Ok::<String, workflow_primitives::Error>(format!("summary of {s}")) }))
///     .default(LambdaPrimitive::new(|s: String| async move { Ok::<String, workflow_primitives::Error>(format!("echo {s}")) }));
///
/// let mut ctx = WorkflowContext::new();
/// assert_eq!(router.execute(&mut ctx, "sum:doc".into()).await.unwrap(), "summary of sum:doc");
/// assert_eq!(router.execute(&mut ctx, "other".into()).await.unwrap(), "echo other");
/// # });
/// ```
pub struct Switch<T> {
    selector: Selector<T>,
    cases: HashMap<String, BoxPrimitive<T, T>>,
    default: Option<BoxPrimitive<T, T>>,
    name: String,
}

impl<T: Send + 'static> Switch<T> {
    /// Create a switch with no cases.
    pub fn new<F>(selector: F) -> Self
    where
        F: Fn(&T, &WorkflowContext) -> String + Send + Sync + 'static,
    {
        Self {
            selector: Box::new(selector),
            cases: HashMap::new(),
            default: None,
            name: "switch".to_string(),
        }
    }

    /// Register a case. A later case with the same key replaces the earlier one.
    #[must_use]
    pub fn case<P>(mut self, key: impl Into<String>, primitive: P) -> Self
    where
        P: Primitive<Input = T, Output = T> + 'static,
    {
        self.cases.insert(key.into(), Box::new(primitive));
        self
    }

    /// Set the branch used when no case matches.
    #[must_use]
    pub fn default<P>(mut self, primitive: P) -> Self
    where
        P: Primitive<Input = T, Output = T> + 'static,
    {
        self.default = Some(Box::new(primitive));
        self
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registered case keys.
    #[must_use]
    pub fn case_keys(&self) -> Vec<&str> {
        self.cases.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl<T: Send + 'static> Primitive for Switch<T> {
    type Input = T;
    type Output = T;

    async fn execute(&self, ctx: &mut WorkflowContext, input: T) -> Result<T> {
        let key = (self.selector)(&input, ctx);
        match self.cases.get(&key).or(self.default.as_ref()) {
            Some(branch) => {
                tracing::trace!(switch = %self.name, key = %key, branch = branch.name(), "switch dispatch");
                branch.execute(ctx, input).await
            }
            None => Ok(input),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Switch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, LambdaPrimitive};

    fn append(suffix: &'static str) -> impl Primitive<Input = String, Output = String> {
        LambdaPrimitive::new(move |s: String| async move { Ok::<_, Error>(s + suffix) })
    }

    fn by_prefix(s: &String, _: &WorkflowContext) -> String {
        s.chars().next().map(String::from).unwrap_or_default()
    }

    #[tokio::test]
    async fn dispatches_to_matching_case() {
        let switch = Switch::new(by_prefix).case("a", append("-A")).case("b", append("-B"));
        let mut ctx = WorkflowContext::new();
        assert_eq!(switch.execute(&mut ctx, "apple".into()).await.unwrap(), "apple-A");
        assert_eq!(switch.execute(&mut ctx, "banana".into()).await.unwrap(), "banana-B");
    }

    #[tokio::test]
    async fn falls_back_to_default_then_pass_through() {
        let with_default = Switch::new(by_prefix).case("a", append("-A")).default(append("-D"));
        let without_default = Switch::new(by_prefix).case("a", append("-A"));
        let mut ctx = WorkflowContext::new();
        assert_eq!(with_default.execute(&mut ctx, "cherry".into()).await.unwrap(), "cherry-D");
        assert_eq!(without_default.execute(&mut ctx, "cherry".into()).await.unwrap(), "cherry");
    }

    #[tokio::test]
    async fn selector_can_read_context_tags() {
        let switch = Switch::new(|_: &String, ctx: &WorkflowContext| {
            ctx.tags.get("route").cloned().unwrap_or_default()
        })
        .case("fast", append("-fast"));
        let mut ctx = WorkflowContext::new().with_tag("route", "fast");
        assert_eq!(switch.execute(&mut ctx, "req".into()).await.unwrap(), "req-fast");
        assert_eq!(switch.case_keys(), vec!["fast"]);
    }
}
