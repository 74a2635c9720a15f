//! Pure reward split functions.
//!
//! Each calculator turns a pool balance into a [`Payout`]. Splits floor every
//! share, so the payout total never exceeds the balance and any dust stays in
//! the pool.

use super::payout::Payout;
use crate::collateral::AccountKind;
use crate::error::EngineFault;
use crate::num::{checked_sum, floor_amount, mul_div, to_decimal, Amount};
use crate::prng::{SimplePrng, DELEGATOR_WEIGHT_DOMAIN};
use crate::types::ValidatorData;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// Upper bound on capped redistribution rounds among delegators.
pub const MAX_REDISTRIBUTION_ROUNDS: usize = 10;

/// Identifies the pool a calculator draws from.
#[derive(Debug, Clone, Copy)]
pub struct PoolRef<'a> {
    /// Pool kind.
    pub kind: AccountKind,
    /// Reward account id.
    pub account_id: &'a str,
    /// Asset held by the pool.
    pub asset: &'a str,
    /// Epoch being rewarded.
    pub epoch_seq: u64,
    /// Chain time of the computation; also seeds rounding tie-breaks.
    pub block_time: u64,
}

impl PoolRef<'_> {
    fn empty_payout(&self) -> Payout {
        Payout::new(
            self.kind,
            self.account_id,
            self.asset,
            self.epoch_seq,
            self.block_time,
        )
    }
}

fn cap_to_max(amount: Amount, max_payout: Amount, already: Amount) -> Amount {
    if max_payout == 0 {
        amount
    } else {
        amount.min(max_payout.saturating_sub(already))
    }
}

/// Delegator weights `amount / stake_by_delegators`, zero holdings excluded.
///
/// When division rounds the total above one, the excess is taken from one
/// delegator drawn with a generator seeded by `block_time` and the node id.
pub fn delegator_weights(
    validator: &ValidatorData,
    block_time: u64,
) -> Result<BTreeMap<String, Decimal>, EngineFault> {
    let by_delegators = to_decimal(validator.stake_by_delegators)?;
    if by_delegators.is_zero() {
        return Ok(BTreeMap::new());
    }
    let mut weights = validator
        .delegators
        .iter()
        .filter(|(_, amount)| **amount > 0)
        .map(|(party, amount)| Ok((party.clone(), to_decimal(*amount)? / by_delegators)))
        .collect::<Result<BTreeMap<String, Decimal>, EngineFault>>()?;

    let sum = checked_sum(weights.values().copied(), "delegator weights")?;
    if sum > Decimal::ONE {
        let excess = sum - Decimal::ONE;
        let mut prng = SimplePrng::for_tie_break(
            block_time,
            DELEGATOR_WEIGHT_DOMAIN,
            validator.node_id.as_bytes(),
        );
        let chosen = prng
            .gen_index(weights.len())
            .and_then(|idx| weights.keys().nth(idx).cloned());
        if let Some(party) = chosen {
            if let Some(weight) = weights.get_mut(&party) {
                *weight = (*weight - excess).max(Decimal::ZERO);
            }
        }
    }
    Ok(weights)
}

/// Spreads `pool` over delegators by weight in capped rounds.
///
/// Each round hands out `floor(remaining * weight)` per delegator, clamped to
/// what the delegator may still receive under `max_payout`. Clamped amounts
/// carry into the next round under the same weights. Stops after
/// [`MAX_REDISTRIBUTION_ROUNDS`], when a round awards nothing, or when the
/// remainder drops below 0.1% of a non-zero `max_payout`. Returns what was
/// left undistributed.
pub fn distribute_to_delegators(
    payout: &mut Payout,
    pool: Amount,
    weights: &BTreeMap<String, Decimal>,
    max_payout: Amount,
) -> Result<Amount, EngineFault> {
    let stop_below = if max_payout > 0 {
        floor_amount(to_decimal(max_payout)? * Decimal::new(1, 3))
    } else {
        0
    };
    let mut remaining = pool;
    for round in 0..MAX_REDISTRIBUTION_ROUNDS {
        let round_balance = to_decimal(remaining)?;
        let mut awarded: Amount = 0;
        for (party, weight) in weights {
            let amount = floor_amount(round_balance * *weight);
            let amount = cap_to_max(amount, max_payout, payout.amount_for(party));
            if amount == 0 {
                continue;
            }
            payout.credit(party, amount);
            awarded += amount;
        }
        remaining = remaining.saturating_sub(awarded);
        debug!(round, awarded = %awarded, remaining = %remaining, "delegator distribution round");
        if awarded == 0 || (max_payout > 0 && remaining < stop_below) {
            break;
        }
    }
    Ok(remaining)
}

/// Splits `balance` across validators by normalised score and then between
/// each validator and its delegators.
///
/// A validator keeps `1 - delegator_share * stake_by_delegators / total_stake`
/// of its share; the rest is spread over its delegators. A non-zero
/// `max_payout` caps every participant; capped validator amounts are forfeited.
pub fn calculate_rewards_by_stake(
    pool: PoolRef<'_>,
    balance: Amount,
    scores: &BTreeMap<String, Decimal>,
    validators: &[ValidatorData],
    delegator_share: Decimal,
    max_payout: Amount,
) -> Result<Payout, EngineFault> {
    let mut payout = pool.empty_payout();
    if balance == 0 {
        return Ok(payout);
    }
    let reward_balance = to_decimal(balance)?;

    let mut ordered: Vec<&ValidatorData> = validators.iter().collect();
    ordered.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    for validator in ordered {
        let score = scores.get(&validator.node_id).copied().unwrap_or(Decimal::ZERO);
        if score <= Decimal::ZERO {
            continue;
        }
        let validator_reward = reward_balance * score;
        if validator_reward.is_zero() {
            continue;
        }

        let delegators_reward = mul_div(
            validator_reward * delegator_share,
            to_decimal(validator.stake_by_delegators)?,
            to_decimal(validator.total_stake())?,
        )?;
        let own = floor_amount(validator_reward - delegators_reward);
        let capped = cap_to_max(own, max_payout, payout.amount_for(&validator.node_id));
        if capped < own {
            let forfeited = own - capped;
            debug!(node = %validator.node_id, forfeited = %forfeited, "validator reward capped");
        }
        payout.credit(&validator.node_id, capped);

        let delegator_pool = floor_amount(delegators_reward);
        if delegator_pool == 0 {
            continue;
        }
        let weights = delegator_weights(validator, pool.block_time)?;
        let left = distribute_to_delegators(&mut payout, delegator_pool, &weights, max_payout)?;
        if left > 0 {
            debug!(node = %validator.node_id, left = %left, "delegator reward left in pool");
        }
    }
    Ok(payout)
}

/// Splits `balance` proportionally to each party's fee contribution score.
pub fn calculate_rewards_by_contribution(
    pool: PoolRef<'_>,
    balance: Amount,
    scores: &[(String, Decimal)],
) -> Result<Payout, EngineFault> {
    let mut payout = pool.empty_payout();
    let mut ordered: Vec<&(String, Decimal)> =
        scores.iter().filter(|(_, s)| *s > Decimal::ZERO).collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    let total = checked_sum(ordered.iter().map(|(_, s)| *s), "contribution scores")?;
    if balance == 0 || total.is_zero() {
        return Ok(payout);
    }
    let reward_balance = to_decimal(balance)?;
    for (party, score) in ordered {
        payout.credit(party, floor_amount(mul_div(reward_balance, *score, total)?));
    }
    Ok(payout)
}

/// Splits `balance` equally among the market's proposers.
pub fn calculate_rewards_for_proposers(
    pool: PoolRef<'_>,
    balance: Amount,
    proposers: &[String],
) -> Payout {
    let mut payout = pool.empty_payout();
    let mut ordered: Vec<&String> = proposers.iter().filter(|p| !p.is_empty()).collect();
    ordered.sort();
    ordered.dedup();
    if balance == 0 || ordered.is_empty() {
        return payout;
    }
    let share = balance / ordered.len() as Amount;
    for party in ordered {
        payout.credit(party, share);
    }
    payout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::num::MAX_DECIMAL_AMOUNT;
    use crate::scoring::normalise_scores;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;

    fn pool() -> PoolRef<'static> {
        PoolRef {
            kind: AccountKind::GlobalReward,
            account_id: "global_reward/VOTE/!",
            asset: "VOTE",
            epoch_seq: 1,
            block_time: 1_000,
        }
    }

    fn validator(node: &str, self_stake: Amount, delegators: &[(&str, Amount)]) -> ValidatorData {
        let delegators: BTreeMap<String, Amount> =
            delegators.iter().map(|(p, a)| (p.to_string(), *a)).collect();
        ValidatorData {
            node_id: node.to_string(),
            self_stake,
            stake_by_delegators: delegators.values().sum(),
            delegators,
        }
    }

    fn fixture() -> Vec<ValidatorData> {
        vec![
            validator("node1", 0, &[("party1", 6000), ("party2", 4000)]),
            validator("node2", 20000, &[]),
            validator("node3", 30000, &[("party1", 40000)]),
            validator("node4", 0, &[]),
        ]
    }

    fn scores(values: [(&str, i64, u32); 4]) -> BTreeMap<String, Decimal> {
        values
            .iter()
            .map(|(node, num, scale)| (node.to_string(), Decimal::new(*num, *scale)))
            .collect()
    }

    fn quarter_half_quarter() -> BTreeMap<String, Decimal> {
        scores([("node1", 25, 2), ("node2", 5, 1), ("node3", 25, 2), ("node4", 0, 0)])
    }

    fn share() -> Decimal {
        Decimal::new(3, 1)
    }

    fn assert_uncapped(payout: &Payout) {
        assert_eq!(payout.party_to_amount.len(), 5);
        assert_eq!(payout.amount_for("party1"), 87857);
        assert_eq!(payout.amount_for("party2"), 30000);
        assert_eq!(payout.amount_for("node1"), 175000);
        assert_eq!(payout.amount_for("node2"), 500000);
        assert_eq!(payout.amount_for("node3"), 207142);
        assert_eq!(payout.total_reward, 999999);
    }

    #[test]
    fn empty_balance_or_zero_scores_pay_nothing() {
        let payout =
            calculate_rewards_by_stake(pool(), 0, &quarter_half_quarter(), &fixture(), share(), 0)
                .unwrap();
        assert_eq!(payout.total_reward, 0);
        assert!(payout.party_to_amount.is_empty());

        let zeros = scores([("node1", 0, 0), ("node2", 0, 0), ("node3", 0, 0), ("node4", 0, 0)]);
        let payout = calculate_rewards_by_stake(pool(), 100_000, &zeros, &[], share(), 0).unwrap();
        assert_eq!(payout.total_reward, 0);
    }

    #[test]
    fn single_delegator_takes_delegator_share() {
        let validators = vec![validator("node1", 0, &[("party1", 100)])];
        let scores: BTreeMap<String, Decimal> = [("node1".to_string(), Decimal::ONE)].into();
        let payout =
            calculate_rewards_by_stake(pool(), 1_000_000, &scores, &validators, share(), 0)
                .unwrap();
        assert_eq!(payout.amount_for("party1"), 300_000);
        assert_eq!(payout.amount_for("node1"), 700_000);
        assert_eq!(payout.total_reward, 1_000_000);
    }

    #[test]
    fn zero_holdings_are_filtered_out() {
        let validators = vec![validator("node1", 1000, &[("zohar", 0), ("jeremy", 500)])];
        let scores: BTreeMap<String, Decimal> = [("node1".to_string(), Decimal::ONE)].into();
        let payout =
            calculate_rewards_by_stake(pool(), 100_000, &scores, &validators, share(), 0)
                .unwrap();
        assert_eq!(payout.total_reward, 100_000);
        assert_eq!(payout.party_to_amount.len(), 2);
        assert!(!payout.party_to_amount.contains_key("zohar"));
        assert_eq!(payout.amount_for("jeremy"), 10_000);
        assert_eq!(payout.amount_for("node1"), 90_000);
    }

    #[test]
    fn uncapped_and_unbreached_caps_agree() {
        for max in [0, 1_000_000] {
            let payout = calculate_rewards_by_stake(
                pool(),
                1_000_000,
                &quarter_half_quarter(),
                &fixture(),
                share(),
                max,
            )
            .unwrap();
            assert_uncapped(&payout);
        }
    }

    #[test]
    fn small_cap_limits_everyone() {
        let scores = scores([("node1", 2, 1), ("node2", 4, 1), ("node3", 4, 1), ("node4", 0, 0)]);
        let payout =
            calculate_rewards_by_stake(pool(), 1_000_000, &scores, &fixture(), share(), 20_000)
                .unwrap();
        assert_eq!(payout.party_to_amount.len(), 5);
        for party in ["party1", "party2", "node1", "node2", "node3"] {
            assert_eq!(payout.amount_for(party), 20_000);
        }
        assert_eq!(payout.total_reward, 100_000);
    }

    #[test]
    fn capped_delegator_surplus_flows_to_others_over_rounds() {
        let payout = calculate_rewards_by_stake(
            pool(),
            1_000_000,
            &quarter_half_quarter(),
            &fixture(),
            share(),
            40_000,
        )
        .unwrap();
        assert_eq!(payout.amount_for("party1"), 40_000);
        assert_eq!(payout.amount_for("party2"), 34_949);
        assert_eq!(payout.amount_for("node1"), 40_000);
        assert_eq!(payout.amount_for("node2"), 40_000);
        assert_eq!(payout.amount_for("node3"), 40_000);
        assert_eq!(payout.total_reward, 194_949);
    }

    #[test]
    fn large_cap_stops_after_first_round() {
        let payout = calculate_rewards_by_stake(
            pool(),
            1_000_000,
            &quarter_half_quarter(),
            &fixture(),
            share(),
            1_000_000_000,
        )
        .unwrap();
        assert_uncapped(&payout);
    }

    #[test]
    fn validator_order_does_not_change_the_payout() {
        let mut validators = fixture();
        let expected = calculate_rewards_by_stake(
            pool(),
            1_000_000,
            &quarter_half_quarter(),
            &validators,
            share(),
            40_000,
        )
        .unwrap();
        validators.shuffle(&mut rand::thread_rng());
        let shuffled = calculate_rewards_by_stake(
            pool(),
            1_000_000,
            &quarter_half_quarter(),
            &validators,
            share(),
            40_000,
        )
        .unwrap();
        assert_eq!(shuffled, expected);
    }

    #[test]
    fn delegator_weights_never_exceed_one() {
        let delegators: Vec<(String, Amount)> = (0..7).map(|i| (format!("p{i}"), 1)).collect();
        let refs: Vec<(&str, Amount)> = delegators.iter().map(|(p, a)| (p.as_str(), *a)).collect();
        let validator = validator("node1", 0, &refs);
        let weights = delegator_weights(&validator, 99).unwrap();
        let sum = weights.values().fold(Decimal::ZERO, |acc, w| acc + *w);
        assert!(sum <= Decimal::ONE);
        assert_eq!(weights.len(), 7);
        assert_eq!(weights, delegator_weights(&validator, 99).unwrap());
    }

    #[test]
    fn contribution_split_is_proportional() {
        let pool = PoolRef {
            kind: AccountKind::MakerFeeReward,
            account_id: "maker_fee_reward/USD/m1",
            asset: "USD",
            ..pool()
        };
        let scores = vec![
            ("party2".to_string(), Decimal::ONE),
            ("party1".to_string(), Decimal::from(2u64)),
            ("party3".to_string(), Decimal::ZERO),
        ];
        let payout = calculate_rewards_by_contribution(pool, 1000, &scores).unwrap();
        assert_eq!(payout.amount_for("party1"), 666);
        assert_eq!(payout.amount_for("party2"), 333);
        assert!(!payout.party_to_amount.contains_key("party3"));
        assert_eq!(payout.total_reward, 999);
    }

    #[test]
    fn proposers_share_equally() {
        let pool = PoolRef {
            kind: AccountKind::MarketProposerReward,
            account_id: "market_proposer_reward/VOTE/m1",
            ..pool()
        };
        let proposers = vec!["bob".to_string(), "alice".to_string(), "bob".to_string()];
        let payout = calculate_rewards_for_proposers(pool, 101, &proposers);
        assert_eq!(payout.amount_for("alice"), 50);
        assert_eq!(payout.amount_for("bob"), 50);
        assert_eq!(payout.total_reward, 100);
        assert_eq!(calculate_rewards_for_proposers(pool, 101, &[]).total_reward, 0);
    }

    #[test]
    fn balance_beyond_decimal_range_is_a_fault() {
        let scores: BTreeMap<String, Decimal> = [("node2".to_string(), Decimal::ONE)].into();
        assert_eq!(
            calculate_rewards_by_stake(
                pool(),
                MAX_DECIMAL_AMOUNT + 1,
                &scores,
                &fixture(),
                share(),
                0
            ),
            Err(EngineFault::AmountOutOfRange(MAX_DECIMAL_AMOUNT + 1))
        );
    }

    type RawValidator = (Amount, Vec<(usize, Amount)>, u32);

    fn raw_validators() -> impl Strategy<Value = Vec<RawValidator>> {
        proptest::collection::vec(
            (
                0..1_000_000u128,
                proptest::collection::vec((0..4usize, 0..1_000_000u128), 0..5),
                0..100u32,
            ),
            1..6,
        )
    }

    proptest! {
        #[test]
        fn stake_payout_is_bounded_by_pool_and_cap(
            raw in raw_validators(),
            share_pct in 0..=100i64,
            balance in 0..1_000_000_000_000u128,
            max in prop_oneof![Just(0u128), 1..10_000_000u128],
        ) {
            // node0 also delegates so one participant can be paid in both roles
            let parties = ["party0", "party1", "party2", "node0"];
            let mut validators = Vec::new();
            let mut raw_scores = BTreeMap::new();
            for (i, (self_stake, delegators, score)) in raw.iter().enumerate() {
                let delegators: BTreeMap<String, Amount> = delegators
                    .iter()
                    .map(|(p, a)| (parties[*p].to_string(), *a))
                    .collect();
                let node_id = format!("node{i}");
                raw_scores.insert(node_id.clone(), Decimal::from(*score));
                validators.push(ValidatorData {
                    node_id,
                    self_stake: *self_stake,
                    stake_by_delegators: delegators.values().sum(),
                    delegators,
                });
            }
            let scores = normalise_scores(&raw_scores, 1_000).unwrap();
            let delegator_share = Decimal::new(share_pct, 2);

            let payout = calculate_rewards_by_stake(
                pool(),
                balance,
                &scores,
                &validators,
                delegator_share,
                max,
            )
            .unwrap();

            let paid: Amount = payout.party_to_amount.values().sum();
            prop_assert_eq!(paid, payout.total_reward);
            prop_assert!(payout.total_reward <= balance);
            for (party, amount) in &payout.party_to_amount {
                prop_assert!(*amount > 0, "zero entry kept for {}", party);
                if max > 0 {
                    prop_assert!(*amount <= max, "{} paid {} above cap {}", party, amount, max);
                }
            }
        }
    }
}
