//! Recovery primitives.
//!
//! These wrap another primitive and intercept its failures according to a
//! fixed policy: [`Retry`] re-attempts, [`Fallback`] substitutes an alternate,
//! [`Saga`] compensates, [`Timeout`] bounds duration and [`Cache`] skips the
//! call entirely on a live hit.

pub mod cache;
pub mod fallback;
pub mod retry;
pub mod saga;
pub mod timeout;

pub use cache::{default_cache_key, Cache, CacheBackend, CacheStats, InMemoryCacheBackend};
pub use fallback::Fallback;
pub use retry::{Retry, RetryPolicy};
pub use saga::Saga;
pub use timeout::Timeout;
