//! Shared data carried between the delegation, scoring and reward engines.

use crate::num::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Epoch notification delivered by the epoch service.
///
/// Times are unix milliseconds. An `end_time` of zero marks the start of the
/// epoch; any other value marks its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Monotonic epoch sequence number.
    pub seq: u64,
    /// Epoch start time.
    pub start_time: u64,
    /// Epoch end time, zero while the epoch is running.
    pub end_time: u64,
}

/// Which edge of an epoch a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochAction {
    /// The epoch just began.
    Start,
    /// The epoch just ended.
    End,
}

impl Epoch {
    /// Classifies the notification by its end time.
    pub fn action(&self) -> EpochAction {
        if self.end_time == 0 {
            EpochAction::Start
        } else {
            EpochAction::End
        }
    }
}

/// Committed stake backing one validator at the moment of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorData {
    /// Validator node identity.
    pub node_id: String,
    /// Stake the validator delegated to itself.
    pub self_stake: Amount,
    /// Sum of stake delegated by other parties.
    pub stake_by_delegators: Amount,
    /// Per-delegator committed amounts, excluding self-stake.
    pub delegators: BTreeMap<String, Amount>,
}

impl ValidatorData {
    /// Self-stake plus delegated stake.
    pub fn total_stake(&self) -> Amount {
        self.self_stake.saturating_add(self.stake_by_delegators)
    }
}

/// Tunables of the stake concentration curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeScoreParams {
    /// Lower bound on the effective validator count.
    pub min_validators: Decimal,
    /// Competition level dividing the validator count.
    pub competition_level: Decimal,
    /// Multiple of the optimal stake beyond which the second penalty applies.
    pub optimal_stake_multiplier: Decimal,
}
