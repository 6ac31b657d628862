//! Spend and savings per operation.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;

/// Accumulated cost of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostEntry {
    /// Total spend.
    pub cost: f64,
    /// Total avoided spend, e.g. from cache hits.
    pub savings: f64,
}

impl CostEntry {
    /// `cost - savings`.
    #[must_use]
    pub fn net(&self) -> f64 {
        self.cost - self.savings
    }
}

/// Totals across all operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    /// Sum of costs.
    pub total_cost: f64,
    /// Sum of savings.
    pub total_savings: f64,
    /// `total_cost - total_savings`.
    pub net_cost: f64,
    /// Per-operation entries.
    pub by_operation: BTreeMap<String, CostEntry>,
}

/// Accumulates cost and savings keyed by operation name.
#[derive(Debug, Default)]
pub struct CostTracker {
    entries: Mutex<HashMap<String, CostEntry>>,
}

impl CostTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add spend for `operation`. Negative or non-finite amounts are ignored
    /// and reported as `false`.
    pub fn record_cost(&self, operation: &str, amount: f64) -> bool {
        let Some(amount) = accepted(operation, amount) else {
            return false;
        };
        self.entries.lock().entry(operation.to_string()).or_default().cost += amount;
        true
    }

    /// Add savings for `operation`, with the same validation as [`record_cost`](Self::record_cost).
    pub fn record_savings(&self, operation: &str, amount: f64) -> bool {
        let Some(amount) = accepted(operation, amount) else {
            return false;
        };
        self.entries.lock().entry(operation.to_string()).or_default().savings += amount;
        true
    }

    /// Entry for one operation.
    #[must_use]
    pub fn get(&self, operation: &str) -> Option<CostEntry> {
        self.entries.lock().get(operation).copied()
    }

    /// Totals and per-operation breakdown.
    #[must_use]
    pub fn summary(&self) -> CostSummary {
        let entries = self.entries.lock();
        let by_operation: BTreeMap<String, CostEntry> =
            entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        drop(entries);
        let total_cost = by_operation.values().map(|e| e.cost).sum();
        let total_savings = by_operation.values().map(|e| e.savings).sum();
        CostSummary {
            total_cost,
            total_savings,
            net_cost: total_cost - total_savings,
            by_operation,
        }
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Whether `amount` can be added to a cost or savings total.
pub(crate) fn is_valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount >= 0.0
}

fn accepted(operation: &str, amount: f64) -> Option<f64> {
    if is_valid_amount(amount) {
        Some(amount)
    } else {
        tracing::warn!(operation, amount, "ignoring invalid cost amount");
        None
    }
}
