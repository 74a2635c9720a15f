//! Seams to the collaborators that sit outside the economics core.
//!
//! Every read through these traits must be a pure function of its arguments
//! at call time; replicas feed identical inputs and expect identical outputs.

use crate::collateral::{Account, AccountKind, CollateralError, Transfer, TransferResponse};
use crate::num::Amount;
use crate::staking::StakingError;
use rust_decimal::Decimal;

/// Source of party stake balances.
pub trait StakingAccounts {
    /// Current stake balance of `party`.
    fn balance_now(&self, party: &str) -> Result<Amount, StakingError>;

    /// Lowest stake balance `party` held between `from` and `to` inclusive.
    fn balance_for_epoch(&self, party: &str, from: u64, to: u64) -> Result<Amount, StakingError>;
}

/// Validator-set membership.
pub trait ValidatorTopology {
    /// Whether `node_id` is a recognised validator.
    fn is_validator_node(&self, node_id: &str) -> bool;

    /// All validator node identities, in any order.
    fn all_node_ids(&self) -> Vec<String>;
}

/// Per-validator performance multipliers in `[0, 1]`.
pub trait ValidatorPerformance {
    /// Performance multiplier applied to the stake score of `node_id`.
    fn performance_score(&self, node_id: &str) -> Decimal;
}

/// String-valued network parameters.
pub trait NetParams {
    /// Raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Fee contribution data for fee-based reward pools.
pub trait FeesTracker {
    /// Fee contribution score per party for `market` in `asset`.
    fn fee_scores(&self, asset: &str, market: &str) -> Vec<(String, Decimal)>;

    /// Parties that proposed `market`.
    fn market_proposers(&self, market: &str) -> Vec<String>;
}

/// Account store that holds reward pools and executes payouts.
pub trait Collateral {
    /// Reward accounts of `kind`, sorted by account id.
    fn reward_accounts(&self, kind: AccountKind) -> Vec<Account>;

    /// Balance of account `id`.
    fn balance(&self, id: &str) -> Result<Amount, CollateralError>;

    /// Moves funds out of reward account `from` to the listed owners.
    fn transfer_rewards(
        &mut self,
        from: &str,
        transfers: &[Transfer],
    ) -> Result<Vec<TransferResponse>, CollateralError>;
}
