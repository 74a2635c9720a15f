//! Network parameter store and typed readers.
//!
//! Parameters arrive as strings. The readers here parse them on every use so
//! updates apply immediately; a consumed parameter that is missing or does not
//! parse is an [`EngineFault`].

use crate::error::EngineFault;
use crate::num::{parse_amount, parse_decimal, Amount};
use crate::providers::NetParams;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum amount accepted by a single delegation request.
pub const DELEGATION_MIN_AMOUNT: &str = "validators.delegation.minAmount";
/// Maximum committed stake per validator; zero disables the cap.
pub const MAX_STAKE_PER_VALIDATOR: &str = "validators.delegation.maxStakePerValidator";
/// Asset in which staking rewards are paid.
pub const REWARD_ASSET: &str = "reward.asset";
/// Fraction of a validator reward reserved for its delegators.
pub const DELEGATOR_SHARE: &str = "reward.staking.delegation.delegatorShare";
/// Per-participant payout cap per pool; zero disables the cap.
pub const MAX_PAYOUT_PER_PARTICIPANT: &str = "reward.staking.delegation.maxPayoutPerParticipant";
/// Lower bound on the effective validator count used by scoring.
pub const MIN_VALIDATORS: &str = "reward.staking.delegation.minValidators";
/// Competition level used by scoring.
pub const COMPETITION_LEVEL: &str = "reward.staking.delegation.competitionLevel";
/// Optimal stake multiplier used by scoring.
pub const OPTIMAL_STAKE_MULTIPLIER: &str = "reward.staking.delegation.optimalStakeMultiplier";
/// Fraction of a pool balance paid out per epoch.
pub const PAYOUT_FRACTION: &str = "reward.staking.delegation.payoutFraction";
/// Cap on the amount paid out of one pool per epoch; zero disables the cap.
pub const MAX_PAYOUT_PER_EPOCH: &str = "reward.staking.delegation.maxPayoutPerEpoch";
/// Delay in milliseconds between computing and distributing a payout.
pub const PAYOUT_DELAY: &str = "reward.staking.delegation.payoutDelay";

/// In-memory parameter store keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticNetParams {
    values: BTreeMap<String, String>,
}

impl StaticNetParams {
    /// Store seeded with the network defaults.
    pub fn with_defaults() -> Self {
        let mut params = Self::default();
        for (key, value) in [
            (DELEGATION_MIN_AMOUNT, "1"),
            (MAX_STAKE_PER_VALIDATOR, "0"),
            (REWARD_ASSET, "VOTE"),
            (DELEGATOR_SHARE, "0.883"),
            (MAX_PAYOUT_PER_PARTICIPANT, "0"),
            (MIN_VALIDATORS, "5"),
            (COMPETITION_LEVEL, "1.1"),
            (OPTIMAL_STAKE_MULTIPLIER, "3"),
            (PAYOUT_FRACTION, "1"),
            (MAX_PAYOUT_PER_EPOCH, "0"),
            (PAYOUT_DELAY, "0"),
        ] {
            params.set(key, value);
        }
        params
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Applies every entry of `overrides` on top of the current values.
    pub fn extend(&mut self, overrides: &BTreeMap<String, String>) {
        for (key, value) in overrides {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

impl NetParams for StaticNetParams {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

fn raw(params: &dyn NetParams, key: &str) -> Result<String, EngineFault> {
    params
        .get(key)
        .ok_or_else(|| EngineFault::MissingNetParam(key.to_string()))
}

fn invalid(key: &str, value: String) -> EngineFault {
    EngineFault::InvalidNetParam {
        key: key.to_string(),
        value,
    }
}

/// Reads `key` as an unsigned amount.
pub fn read_amount(params: &dyn NetParams, key: &str) -> Result<Amount, EngineFault> {
    let value = raw(params, key)?;
    parse_amount(&value).ok_or_else(|| invalid(key, value))
}

/// Reads `key` as a decimal.
pub fn read_decimal(params: &dyn NetParams, key: &str) -> Result<Decimal, EngineFault> {
    let value = raw(params, key)?;
    parse_decimal(&value).ok_or_else(|| invalid(key, value))
}

/// Reads `key` as a decimal that must lie in `[0, 1]`.
pub fn read_fraction(params: &dyn NetParams, key: &str) -> Result<Decimal, EngineFault> {
    let value = read_decimal(params, key)?;
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(invalid(key, value.to_string()));
    }
    Ok(value)
}

/// Reads `key` as a strictly positive decimal.
pub fn read_positive_decimal(params: &dyn NetParams, key: &str) -> Result<Decimal, EngineFault> {
    let value = read_decimal(params, key)?;
    if value <= Decimal::ZERO {
        return Err(invalid(key, value.to_string()));
    }
    Ok(value)
}

/// Reads `key` as a non-empty string.
pub fn read_string(params: &dyn NetParams, key: &str) -> Result<String, EngineFault> {
    let value = raw(params, key)?;
    if value.trim().is_empty() {
        return Err(invalid(key, value));
    }
    Ok(value)
}
