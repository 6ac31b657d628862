//! End-to-end scenarios across composition, recovery and observability.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use workflow_primitives::config::{Environment, ObservabilityConfig};
use workflow_primitives::export::HealthStatus;
use workflow_primitives::metrics::{OverflowStrategy, SloDefinition};
use workflow_primitives::tracer::InMemoryTracer;
use workflow_primitives::{
    Cache, Error, LambdaPrimitive, Observability, Parallel, Primitive, PrimitiveExt, RetryPolicy,
    Timeout, WorkflowContext,
};

fn observability_with(tracer: Arc<InMemoryTracer>, config: ObservabilityConfig) -> Arc<Observability> {
    Arc::new(
        Observability::builder()
            .config(config)
            .tracer(tracer)
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn cache_hit_skips_inner_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let lookup = LambdaPrimitive::new(move |input: Value| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Value, Error>(json!({ "answer": input["query"] }))
        }
    })
    .with_name("lookup");
    let cached = Cache::new(lookup, Duration::from_secs(60));

    let mut ctx = WorkflowContext::new();
    let first = cached.execute(&mut ctx, json!({ "query": "x" })).await.unwrap();
    let second = cached.execute(&mut ctx, json!({ "query": "x" })).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cached.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
    assert!((stats.hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn timeout_with_grace_fails_slow_primitive() {
    let slow = LambdaPrimitive::new(|_: ()| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<&'static str, Error>("done")
    })
    .with_name("slow");
    let bounded = Timeout::new(slow, 0.5).unwrap().with_grace_period(0.1).unwrap();

    let started = tokio::time::Instant::now();
    let mut ctx = WorkflowContext::new();
    let err = bounded.execute(&mut ctx, ()).await.unwrap_err();

    assert!(err.is_timeout());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600) && elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn label_cardinality_is_capped_per_key() {
    let mut config = ObservabilityConfig::default();
    config.cardinality.max_label_values = 2;
    config.cardinality.overflow = OverflowStrategy::Hash;
    let observability = observability_with(Arc::new(InMemoryTracer::new()), config);

    let mut ctx = WorkflowContext::new();
    for name in ["A", "B", "C"] {
        let step = LambdaPrimitive::new(|x: u8| async move { Ok::<u8, Error>(x) })
            .with_name(name)
            .instrumented(Arc::clone(&observability));
        step.execute(&mut ctx, 1).await.unwrap();
    }

    let text = observability.render_prometheus().unwrap();
    assert!(text.contains(r#"primitive_name="A""#));
    assert!(text.contains(r#"primitive_name="B""#));
    assert!(!text.contains(r#"primitive_name="C""#));
    assert!(text.contains(r#"primitive_name="h_"#));

    let limiter = observability.metrics().cardinality();
    assert_eq!(limiter.dropped("primitive_name"), 1);
    assert!(observability.metrics().primitive_stats("C").is_none());
    assert_eq!(observability.health().status, HealthStatus::Degraded);
}

#[tokio::test]
async fn label_cardinality_is_capped_without_prometheus() {
    let mut config = ObservabilityConfig::default();
    config.prometheus_enabled = false;
    config.cardinality.max_label_values = 2;
    let observability = observability_with(Arc::new(InMemoryTracer::new()), config);

    let mut ctx = WorkflowContext::new();
    for name in ["A", "B", "C"] {
        let step = LambdaPrimitive::new(|x: u8| async move { Ok::<u8, Error>(x) })
            .with_name(name)
            .instrumented(Arc::clone(&observability));
        step.execute(&mut ctx, 1).await.unwrap();
    }

    let metrics = observability.metrics();
    let names: Vec<String> = metrics.all_primitive_stats().into_iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"A".to_string()) && names.contains(&"B".to_string()));
    assert!(!names.contains(&"C".to_string()));
    assert_eq!(metrics.cardinality().dropped("primitive_name"), 1);
    assert_eq!(observability.health().status, HealthStatus::Degraded);
}

#[tokio::test(start_paused = true)]
async fn timed_out_instrumented_step_is_recorded_and_unwound() {
    let tracer = Arc::new(InMemoryTracer::new());
    let observability = observability_with(Arc::clone(&tracer), ObservabilityConfig::default());
    let slow = LambdaPrimitive::new(|_: ()| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<(), Error>(())
    })
    .with_name("slow")
    .instrumented(Arc::clone(&observability));
    let bounded = Timeout::new(slow, 0.5).unwrap();

    let mut ctx = WorkflowContext::new();
    assert!(bounded.execute(&mut ctx, ()).await.unwrap_err().is_timeout());

    assert!(ctx.span_id.is_empty());
    assert!(ctx.checkpoints().iter().any(|c| c.name == "slow.end"));
    let stats = observability.metrics().primitive_stats("slow").unwrap();
    assert_eq!((stats.executions, stats.failures), (1, 1));
    assert_eq!(tracer.spans_named("workflow.slow.execute").len(), 1);

    let text = observability.render_prometheus().unwrap();
    assert!(text.contains(
        r#"workflow_primitive_executions_total{primitive_name="slow",primitive_type="custom",status="error"} 1"#
    ));
    assert!(text.contains("workflow_primitive_active 0"));
}

#[tokio::test]
async fn parallel_branches_are_children_of_the_fan_out_span() {
    let tracer = Arc::new(InMemoryTracer::new());
    let observability = observability_with(Arc::clone(&tracer), ObservabilityConfig::default());

    let branch = |name: &'static str, factor: i32| {
        LambdaPrimitive::new(move |x: i32| async move { Ok::<i32, Error>(x * factor) })
            .with_name(name)
            .instrumented(Arc::clone(&observability))
            .boxed()
    };
    let fan_out = Parallel::new(vec![branch("double", 2), branch("triple", 3)])
        .unwrap()
        .with_name("fan_out")
        .instrumented(Arc::clone(&observability));

    let mut ctx = WorkflowContext::new().with_session_id("s-1");
    assert_eq!(fan_out.execute(&mut ctx, 5).await.unwrap(), vec![10, 15]);

    let parent = &tracer.spans_named("workflow.fan_out.execute")[0];
    for child in ["workflow.double.execute", "workflow.triple.execute"] {
        let span = &tracer.spans_named(child)[0];
        assert_eq!(span.trace_id, parent.trace_id);
        assert_eq!(span.parent_span_id.as_deref(), Some(parent.span_id.as_str()));
        assert_eq!(span.attribute("session.id"), Some("s-1"));
        assert_eq!(span.attribute("causation.id"), Some(ctx.correlation_id()));
    }
}

#[tokio::test]
async fn inbound_traceparent_continues_remote_trace() {
    let tracer = Arc::new(InMemoryTracer::new());
    let observability = observability_with(Arc::clone(&tracer), ObservabilityConfig::default());
    let step = LambdaPrimitive::new(|x: i32| async move { Ok::<i32, Error>(x) })
        .with_name("handler")
        .instrumented(observability);

    let mut ctx = WorkflowContext::from_traceparent(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
    )
    .unwrap();
    step.execute(&mut ctx, 1).await.unwrap();

    let span = &tracer.spans()[0];
    assert_eq!(span.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(span.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
    assert_eq!(
        ctx.traceparent().as_deref(),
        Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
    );
}

#[tokio::test(start_paused = true)]
async fn retried_flaky_call_feeds_slo_and_metrics() {
    let observability = observability_with(Arc::new(InMemoryTracer::new()), ObservabilityConfig::default());
    observability
        .register_slo(SloDefinition::error_rate("flaky-availability", "flaky", 0.5, 0.5))
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flaky = LambdaPrimitive::new(move |x: i32| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Execution("transient".into()))
            } else {
                Ok(x)
            }
        }
    })
    .with_name("flaky")
    .instrumented(Arc::clone(&observability))
    .with_retry(RetryPolicy::new(3).without_jitter());

    let mut ctx = WorkflowContext::new();
    assert_eq!(flaky.execute(&mut ctx, 7).await.unwrap(), 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let stats = observability.metrics().primitive_stats("flaky").unwrap();
    assert_eq!((stats.executions, stats.failures), (3, 2));
    let slo = observability.metrics().slo_status("flaky-availability").unwrap();
    assert_eq!(slo.total, 3);
    assert!(!slo.compliant);
    assert_eq!(observability.health().status, HealthStatus::Unhealthy);

    let text = observability.render_prometheus().unwrap();
    assert!(text.contains(r#"workflow_slo_error_budget_remaining{slo="flaky-availability"} 0"#));
}

#[tokio::test]
async fn production_profile_still_keeps_errors() {
    let tracer = Arc::new(InMemoryTracer::new());
    let mut config = ObservabilityConfig::for_environment(Environment::Production);
    config.sampling.adaptive.min_rate = 0.0;
    config.sampling.rate = 0.0;
    let observability = observability_with(Arc::clone(&tracer), config);

    let failing = LambdaPrimitive::new(|_: i32| async move {
        Err::<i32, Error>(Error::Execution("provider down".into()))
    })
    .with_name("llm")
    .instrumented(Arc::clone(&observability));
    let ok = LambdaPrimitive::new(|x: i32| async move { Ok::<i32, Error>(x) })
        .with_name("echo")
        .instrumented(Arc::clone(&observability));

    let mut ctx = WorkflowContext::new();
    for _ in 0..10 {
        ok.execute(&mut ctx, 1).await.unwrap();
    }
    assert!(failing.execute(&mut ctx, 1).await.is_err());

    let spans = tracer.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "workflow.llm.execute");
    assert_eq!(spans[0].sampling.sampler, "tail");
    assert!((observability.sampler().effective_rate() - 1.0 / 11.0).abs() < 1e-9);
}
