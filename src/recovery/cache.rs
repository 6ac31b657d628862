//! Key-based memoization with TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::primitive::{Primitive, PrimitiveKind};
use crate::{Result, WorkflowContext};

/// Storage seam for [`Cache`].
///
/// Implementations must be safe to call concurrently. Errors returned from a
/// backend are logged by the cache and treated as a miss; they never fail the
/// wrapped call.
#[async_trait]
pub trait CacheBackend<V>: Send + Sync {
    /// Fetch a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Remove expired entries, returning how many were removed.
    async fn evict_expired(&self) -> Result<usize>;

    /// Number of stored entries, including expired ones not yet swept.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// In-process [`CacheBackend`] storing `(value, stored_at)` pairs.
///
/// Expired entries are ignored on read and only removed by
/// [`evict_expired`](CacheBackend::evict_expired) or [`clear`](CacheBackend::clear).
pub struct InMemoryCacheBackend<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for InMemoryCacheBackend<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> InMemoryCacheBackend<V> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<V> CacheBackend<V> for InMemoryCacheBackend<V>
where
    V: Clone + Send + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        let entries = self.entries.lock();
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn evict_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Hit/miss counters for a [`Cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls answered from the store.
    pub hits: u64,
    /// Calls that invoked the wrapped primitive.
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when there were no calls.
    pub hit_rate: f64,
    /// Entries currently held by the backend.
    pub size: usize,
}

type KeyFn<I> = Box<dyn Fn(&I, &WorkflowContext) -> Option<String> + Send + Sync>;

/// Derive the default cache key from an input and context.
///
/// The key basis is the input's `prompt` field when it serializes to an object
/// containing one, otherwise the input's canonical JSON. It is combined with
/// the context's player id and hashed with SHA-256. Returns `None` when the
/// input cannot be serialized.
pub fn default_cache_key<I: Serialize>(input: &I, ctx: &WorkflowContext) -> Option<String> {
    let basis = match serde_json::to_value(input).ok()? {
        Value::Object(map) => match map.get("prompt") {
            Some(Value::String(prompt)) => prompt.clone(),
            Some(prompt) => prompt.to_string(),
            None => Value::Object(map).to_string(),
        },
        Value::String(s) => s,
        other => other.to_string(),
    };
    let player = ctx.player_id.as_deref().unwrap_or("anonymous");

    let mut hasher = Sha256::new();
    hasher.update(player.as_bytes());
    hasher.update([0u8]);
    hasher.update(basis.as_bytes());
    Some(format!("{player}:{}", hex::encode(hasher.finalize())))
}

/// Memoizes a primitive's output per key for a fixed TTL.
///
/// A live hit returns the stored value without invoking the wrapped primitive.
/// A miss (or expired entry) invokes it and stores the result. Errors are never
/// cached. `ctx.state["cache.hits"]` and `ctx.state["cache.misses"]` are
/// incremented per call.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use workflow_primitives::{LambdaPrimitive, Primitive, PrimitiveExt, WorkflowContext};
///
/// # tokio_test::block_on(async {
/// let cached = LambdaPrimitive::new(|q: String| async move { Ok::<usize, workflow_primitives::Error>(q.len()) })
///     .with_cache(Duration::from_secs(60));
///
/// let mut ctx = WorkflowContext::new();
/// cached.execute(&mut ctx, "hello".into()).await.unwrap();
/// cached.execute(&mut ctx, "hello".into()).await.unwrap();
/// assert_eq!(cached.stats().hits, 1);
/// # });
/// ```
pub struct Cache<P: Primitive> {
    inner: P,
    ttl: Duration,
    backend: Option<Arc<dyn CacheBackend<P::Output>>>,
    key_fn: KeyFn<P::Input>,
    hits: AtomicU64,
    misses: AtomicU64,
    name: String,
}

impl<P> Cache<P>
where
    P: Primitive,
    P::Output: Clone + Sync,
{
    /// Cache `inner` for `ttl` with the default key and an in-memory store.
    pub fn new(inner: P, ttl: Duration) -> Self
    where
        P::Input: Serialize,
    {
        Self::with_key_fn(inner, ttl, |input: &P::Input, ctx: &WorkflowContext| {
            default_cache_key(input, ctx)
        })
    }

    /// Cache `inner` for `ttl` keyed by `key_fn`. Returning `None` bypasses the cache.
    pub fn with_key_fn<F>(inner: P, ttl: Duration, key_fn: F) -> Self
    where
        F: Fn(&P::Input, &WorkflowContext) -> Option<String> + Send + Sync + 'static,
    {
        let name = format!("cache({})", inner.name());
        Self {
            inner,
            ttl,
            backend: Some(Arc::new(InMemoryCacheBackend::new())),
            key_fn: Box::new(key_fn),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            name,
        }
    }

    /// Replace the store.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend<P::Output>>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Remove the store; every call becomes a miss.
    #[must_use]
    pub fn without_backend(mut self) -> Self {
        self.backend = None;
        self
    }

    /// Set the name used in spans and metrics.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            size: self.backend.as_ref().map_or(0, |b| b.len()),
        }
    }

    /// Fraction of calls served from the store.
    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate
    }

    /// Drop every stored entry.
    pub async fn clear(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.clear().await {
                tracing::warn!(cache = %self.name, error = %e, "cache clear failed");
            }
        }
    }

    /// Remove expired entries, returning how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.evict_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(cache = %self.name, error = %e, "cache sweep failed");
                0
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<P::Output> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(cache = %self.name, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: P::Output) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set(key, value, self.ttl).await {
                tracing::warn!(cache = %self.name, error = %e, "cache write failed");
            }
        }
    }
}

#[async_trait]
impl<P> Primitive for Cache<P>
where
    P: Primitive,
    P::Output: Clone + Sync,
{
    type Input = P::Input;
    type Output = P::Output;

    async fn execute(&self, ctx: &mut WorkflowContext, input: P::Input) -> Result<P::Output> {
        let key = (self.key_fn)(&input, ctx);

        if let Some(key) = key.as_deref() {
            if let Some(value) = self.lookup(key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ctx.increment_state("cache.hits", 1);
                tracing::trace!(cache = %self.name, "cache hit");
                return Ok(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        ctx.increment_state("cache.misses", 1);
        let output = self.inner.execute(ctx, input).await?;
        if let Some(key) = key.as_deref() {
            self.store(key, output.clone()).await;
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Cache
    }
}
