//! Static validator set with performance multipliers.

use crate::providers::{ValidatorPerformance, ValidatorTopology};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Validator set keyed by node id, each with a performance multiplier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorSet {
    performance: BTreeMap<String, Decimal>,
}

impl ValidatorSet {
    /// Builds a set in which every listed node performs perfectly.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            performance: nodes
                .into_iter()
                .map(|node| (node.into(), Decimal::ONE))
                .collect(),
        }
    }

    /// Adds `node_id` or updates its performance multiplier.
    pub fn set_performance(&mut self, node_id: &str, score: Decimal) {
        self.performance.insert(node_id.to_string(), score);
    }

    /// Removes `node_id` from the set.
    pub fn remove(&mut self, node_id: &str) {
        self.performance.remove(node_id);
    }
}

impl ValidatorTopology for ValidatorSet {
    fn is_validator_node(&self, node_id: &str) -> bool {
        self.performance.contains_key(node_id)
    }

    fn all_node_ids(&self) -> Vec<String> {
        self.performance.keys().cloned().collect()
    }
}

impl ValidatorPerformance for ValidatorSet {
    fn performance_score(&self, node_id: &str) -> Decimal {
        self.performance
            .get(node_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}
