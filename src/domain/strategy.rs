//! Target weighting of selected candidates.

use std::collections::BTreeMap;

/// Turns a candidate list into target weights. Weights need not sum to one;
/// the engine normalizes them.
pub trait WeightingPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn weights(&self, candidates: &[String]) -> BTreeMap<String, f64>;
}

/// `1/N` for each of `N` candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl WeightingPolicy for EqualWeight {
    fn name(&self) -> &str {
        "equal weight"
    }

    fn weights(&self, candidates: &[String]) -> BTreeMap<String, f64> {
        if candidates.is_empty() {
            return BTreeMap::new();
        }
        let weight = 1.0 / candidates.len() as f64;
        candidates.iter().map(|c| (c.clone(), weight)).collect()
    }
}

/// Scale weights to sum to one. Non-positive totals give no weights.
pub fn normalized(weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let total: f64 = weights.values().sum();
    if !(total > 0.0) {
        return BTreeMap::new();
    }
    weights
        .iter()
        .map(|(code, w)| (code.clone(), w / total))
        .collect()
}
