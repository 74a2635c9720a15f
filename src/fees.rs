//! Recorded fee activity backing the fee-based reward pools.

use crate::providers::FeesTracker;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fee contribution scores and market proposers for one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeActivity {
    /// Asset -> market -> party -> contribution score.
    #[serde(default)]
    pub scores: BTreeMap<String, BTreeMap<String, BTreeMap<String, Decimal>>>,
    /// Market -> parties that proposed it.
    #[serde(default)]
    pub proposers: BTreeMap<String, Vec<String>>,
}

impl FeeActivity {
    /// Records `score` for `party` in `market`, replacing any previous value.
    pub fn record_score(&mut self, asset: &str, market: &str, party: &str, score: Decimal) {
        self.scores
            .entry(asset.to_string())
            .or_default()
            .entry(market.to_string())
            .or_default()
            .insert(party.to_string(), score);
    }

    /// Registers `party` as a proposer of `market`.
    pub fn add_proposer(&mut self, market: &str, party: &str) {
        let proposers = self.proposers.entry(market.to_string()).or_default();
        if !proposers.iter().any(|p| p == party) {
            proposers.push(party.to_string());
        }
    }
}

impl FeesTracker for FeeActivity {
    fn fee_scores(&self, asset: &str, market: &str) -> Vec<(String, Decimal)> {
        self.scores
            .get(asset)
            .and_then(|markets| markets.get(market))
            .map(|parties| parties.iter().map(|(p, s)| (p.clone(), *s)).collect())
            .unwrap_or_default()
    }

    fn market_proposers(&self, market: &str) -> Vec<String> {
        self.proposers.get(market).cloned().unwrap_or_default()
    }
}
