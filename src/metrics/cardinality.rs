//! Bounding the number of distinct metric label values.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Replacement applied to label values past the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// `h_` followed by the first 8 hex characters of the value's SHA-256.
    #[default]
    Hash,
    /// The literal `other`.
    Other,
}

/// Distinct values and overflow count for one label key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyCardinality {
    /// Admitted distinct values.
    pub distinct: usize,
    /// Observations replaced because the cap was reached.
    pub dropped: u64,
}

/// Snapshot of the limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardinalityStats {
    /// Cap per key.
    pub max_label_values: usize,
    /// Per-key counts.
    pub keys: BTreeMap<String, KeyCardinality>,
    /// Sum of `dropped` across keys.
    pub total_dropped: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    admitted: HashMap<String, HashSet<String>>,
    dropped: HashMap<String, u64>,
}

/// Admits up to `max_label_values` distinct values per label key.
///
/// Values seen before are always returned unchanged. New values past the cap
/// are replaced according to the [`OverflowStrategy`] and counted as dropped,
/// once per occurrence.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::metrics::{CardinalityLimiter, OverflowStrategy};
///
/// let limiter = CardinalityLimiter::new(2, OverflowStrategy::Other);
/// assert_eq!(limiter.limit("primitive_name", "A"), "A");
/// assert_eq!(limiter.limit("primitive_name", "B"), "B");
/// assert_eq!(limiter.limit("primitive_name", "C"), "other");
/// assert_eq!(limiter.dropped("primitive_name"), 1);
/// ```
#[derive(Debug)]
pub struct CardinalityLimiter {
    max_label_values: usize,
    strategy: OverflowStrategy,
    state: RwLock<LimiterState>,
}

impl CardinalityLimiter {
    /// Limiter admitting `max_label_values` values per key.
    #[must_use]
    pub fn new(max_label_values: usize, strategy: OverflowStrategy) -> Self {
        Self {
            max_label_values,
            strategy,
            state: RwLock::new(LimiterState::default()),
        }
    }

    /// Cap per key.
    #[must_use]
    pub fn max_label_values(&self) -> usize {
        self.max_label_values
    }

    /// Overflow replacement in use.
    #[must_use]
    pub fn strategy(&self) -> OverflowStrategy {
        self.strategy
    }

    /// Value to use for `key`: `value` itself or its overflow replacement.
    pub fn limit<'a>(&self, key: &str, value: &'a str) -> Cow<'a, str> {
        {
            let state = self.state.read();
            if state.admitted.get(key).is_some_and(|set| set.contains(value)) {
                return Cow::Borrowed(value);
            }
        }

        let mut state = self.state.write();
        let admitted = state.admitted.entry(key.to_string()).or_default();
        if admitted.contains(value) {
            return Cow::Borrowed(value);
        }
        if admitted.len() < self.max_label_values {
            admitted.insert(value.to_string());
            return Cow::Borrowed(value);
        }
        *state.dropped.entry(key.to_string()).or_insert(0) += 1;
        drop(state);
        tracing::debug!(key, value, "label value over cardinality cap");
        Cow::Owned(self.overflow_value(value))
    }

    /// Overflow observations for `key`.
    #[must_use]
    pub fn dropped(&self, key: &str) -> u64 {
        self.state.read().dropped.get(key).copied().unwrap_or(0)
    }

    /// Snapshot of every key.
    #[must_use]
    pub fn stats(&self) -> CardinalityStats {
        let state = self.state.read();
        let mut keys: BTreeMap<String, KeyCardinality> = state
            .admitted
            .iter()
            .map(|(k, set)| {
                (
                    k.clone(),
                    KeyCardinality {
                        distinct: set.len(),
                        dropped: 0,
                    },
                )
            })
            .collect();
        for (k, dropped) in &state.dropped {
            keys.entry(k.clone()).or_default().dropped = *dropped;
        }
        CardinalityStats {
            max_label_values: self.max_label_values,
            total_dropped: state.dropped.values().sum(),
            keys,
        }
    }

    /// Forget admitted values and drop counts.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.admitted.clear();
        state.dropped.clear();
    }

    fn overflow_value(&self, value: &str) -> String {
        match self.strategy {
            OverflowStrategy::Hash => {
                let digest = Sha256::digest(value.as_bytes());
                format!("h_{}", &hex::encode(digest)[..8])
            }
            OverflowStrategy::Other => "other".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn third_value_is_hashed_with_cap_of_two() {
        let limiter = CardinalityLimiter::new(2, OverflowStrategy::Hash);
        assert_eq!(limiter.limit("primitive_name", "A"), "A");
        assert_eq!(limiter.limit("primitive_name", "B"), "B");
        let replaced = limiter.limit("primitive_name", "C");
        assert!(replaced.starts_with("h_"));
        assert_eq!(replaced.len(), 10);
        assert_eq!(limiter.dropped("primitive_name"), 1);

        assert_eq!(limiter.limit("primitive_name", "C"), replaced);
        assert_eq!(limiter.dropped("primitive_name"), 2);
        assert_eq!(limiter.limit("primitive_name", "A"), "A");
    }

    #[test]
    fn keys_are_capped_independently() {
        let limiter = CardinalityLimiter::new(1, OverflowStrategy::Other);
        assert_eq!(limiter.limit("a", "x"), "x");
        assert_eq!(limiter.limit("b", "y"), "y");
        assert_eq!(limiter.limit("a", "z"), "other");

        let stats = limiter.stats();
        assert_eq!(stats.total_dropped, 1);
        assert_eq!(stats.keys["a"], KeyCardinality { distinct: 1, dropped: 1 });
        assert_eq!(stats.keys["b"].dropped, 0);

        limiter.reset();
        assert_eq!(limiter.stats().keys.len(), 0);
    }

    #[test]
    fn concurrent_admission_respects_cap() {
        let limiter = Arc::new(CardinalityLimiter::new(10, OverflowStrategy::Other));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let value = format!("v{t}-{i}");
                        let _ = limiter.limit("k", &value);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = limiter.stats();
        assert_eq!(stats.keys["k"].distinct, 10);
        assert_eq!(stats.total_dropped, 390);
    }
}
