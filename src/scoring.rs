//! Validator scoring: anti-whaling stake curve times performance, normalised.
//!
//! The stake curve gives each validator its share of total stake, minus a flat
//! penalty for stake above the optimal allocation and a second penalty for
//! stake above a multiple of it. Disproportionately large validators score
//! close to zero.

use crate::error::EngineFault;
use crate::num::{checked_sum, clamp01, to_decimal};
use crate::prng::{SimplePrng, VALIDATOR_SCORE_DOMAIN};
use crate::providers::ValidatorPerformance;
use crate::types::{StakeScoreParams, ValidatorData};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// Stake score of one validator holding `validator_stake` out of `total_stake`.
pub fn validator_score(
    params: &StakeScoreParams,
    num_validators: usize,
    total_stake: Decimal,
    validator_stake: Decimal,
) -> Result<Decimal, EngineFault> {
    if total_stake.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let by_competition = if params.competition_level.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::from(num_validators as u64) / params.competition_level
    };
    let a = params.min_validators.max(by_competition);
    if a.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let overflow = || EngineFault::DecimalOverflow("scoring validator stake".to_string());
    let optimal_stake = total_stake.checked_div(a).ok_or_else(overflow)?;
    let penalty_flat = (validator_stake - optimal_stake).max(Decimal::ZERO);
    let penalty_threshold = params
        .optimal_stake_multiplier
        .checked_mul(optimal_stake)
        .ok_or_else(overflow)?;
    let penalty_down = (validator_stake - penalty_threshold).max(Decimal::ZERO);
    Ok(clamp01((validator_stake - penalty_flat - penalty_down) / total_stake))
}

/// Stake scores for every validator in the snapshot.
///
/// Total stake beyond the decimal range is a fault.
pub fn stake_scores(
    params: &StakeScoreParams,
    validators: &[ValidatorData],
) -> Result<BTreeMap<String, Decimal>, EngineFault> {
    let stakes = validators
        .iter()
        .map(|v| to_decimal(v.total_stake()))
        .collect::<Result<Vec<_>, _>>()?;
    let total_stake = checked_sum(stakes.iter().copied(), "validator stake")?;
    validators
        .iter()
        .zip(stakes)
        .map(|(v, stake)| {
            let score = validator_score(params, validators.len(), total_stake, stake)?;
            Ok((v.node_id.clone(), score))
        })
        .collect()
}

/// Multiplies each stake score by the validator's performance.
pub fn apply_performance(
    scores: &BTreeMap<String, Decimal>,
    performance: &dyn ValidatorPerformance,
) -> Result<BTreeMap<String, Decimal>, EngineFault> {
    scores
        .iter()
        .map(|(node, score)| {
            let scaled = score
                .checked_mul(performance.performance_score(node))
                .ok_or_else(|| {
                    EngineFault::DecimalOverflow(format!("applying performance of {node}"))
                })?;
            Ok((node.clone(), scaled))
        })
        .collect()
}

/// Divides every score by the total so the result sums to at most one.
///
/// Division can round the sum slightly above one. The excess is taken from a
/// single validator drawn with a generator seeded by `block_time`, never
/// pushing that score below zero.
pub fn normalise_scores(
    scores: &BTreeMap<String, Decimal>,
    block_time: u64,
) -> Result<BTreeMap<String, Decimal>, EngineFault> {
    let total = checked_sum(scores.values().copied(), "validator scores")?;
    if total.is_zero() {
        return Ok(scores.keys().map(|k| (k.clone(), Decimal::ZERO)).collect());
    }
    let mut normalised: BTreeMap<String, Decimal> = scores
        .iter()
        .map(|(node, score)| (node.clone(), *score / total))
        .collect();

    let sum = checked_sum(normalised.values().copied(), "normalised scores")?;
    if sum > Decimal::ONE {
        let excess = sum - Decimal::ONE;
        let mut prng = SimplePrng::for_tie_break(block_time, VALIDATOR_SCORE_DOMAIN, &[]);
        let chosen = prng
            .gen_index(normalised.len())
            .and_then(|idx| normalised.keys().nth(idx).cloned());
        if let Some(node) = chosen {
            if let Some(score) = normalised.get_mut(&node) {
                *score = (*score - excess).max(Decimal::ZERO);
                debug!(node = %node, excess = %excess, "removed rounding excess from score");
            }
        }
    }
    Ok(normalised)
}

/// Full pipeline: stake curve, performance, normalisation.
pub fn normalised_validator_scores(
    params: &StakeScoreParams,
    validators: &[ValidatorData],
    performance: &dyn ValidatorPerformance,
    block_time: u64,
) -> Result<BTreeMap<String, Decimal>, EngineFault> {
    let raw = apply_performance(&stake_scores(params, validators)?, performance)?;
    normalise_scores(&raw, block_time)
}
