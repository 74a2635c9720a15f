//! Reward engine: turns reward pool balances into payouts at epoch end.
//!
//! Pools are visited kind by kind in [`REWARD_ACCOUNT_KINDS`] order and, within
//! a kind, by account id. Each pool pays out a fraction of what is not already
//! promised to queued payouts. Payouts are either transferred at once or held
//! until the chain clock passes their delivery time.

mod calculator;
mod payout;

pub use calculator::{
    calculate_rewards_by_contribution, calculate_rewards_by_stake,
    calculate_rewards_for_proposers, delegator_weights, distribute_to_delegators, PoolRef,
    MAX_REDISTRIBUTION_ROUNDS,
};
pub use payout::Payout;

use crate::collateral::{Account, AccountKind, TransferResponse, REWARD_ACCOUNT_KINDS};
use crate::error::EngineFault;
use crate::netparams::{
    read_amount, read_decimal, read_fraction, read_positive_decimal, read_string,
    COMPETITION_LEVEL, DELEGATOR_SHARE, MAX_PAYOUT_PER_EPOCH, MAX_PAYOUT_PER_PARTICIPANT,
    MIN_VALIDATORS, OPTIMAL_STAKE_MULTIPLIER, PAYOUT_DELAY, PAYOUT_FRACTION, REWARD_ASSET,
};
use crate::num::{floor_amount, to_decimal, Amount};
use crate::providers::{Collateral, FeesTracker, NetParams, ValidatorPerformance};
use crate::scoring::normalised_validator_scores;
use crate::types::{Epoch, EpochAction, StakeScoreParams, ValidatorData};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Reward parameters read at epoch end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardParams {
    /// Asset the global reward pool pays in.
    pub reward_asset: String,
    /// Share of a validator reward set aside for delegators.
    pub delegator_share: Decimal,
    /// Per-participant cap for stake-based pools, zero for none.
    pub max_payout_per_participant: Amount,
    /// Fraction of an available pool balance paid per epoch.
    pub payout_fraction: Decimal,
    /// Cap on a single pool's payout per epoch, zero for none.
    pub max_payout_per_epoch: Amount,
    /// Milliseconds between computing and delivering a payout.
    pub payout_delay: u64,
    /// Stake curve tunables.
    pub score: StakeScoreParams,
}

impl RewardParams {
    /// Reads every reward parameter; any missing or malformed key is a fault.
    pub fn from_netparams(params: &dyn NetParams) -> Result<Self, EngineFault> {
        let delay = read_amount(params, PAYOUT_DELAY)?;
        Ok(Self {
            reward_asset: read_string(params, REWARD_ASSET)?,
            delegator_share: read_fraction(params, DELEGATOR_SHARE)?,
            max_payout_per_participant: read_amount(params, MAX_PAYOUT_PER_PARTICIPANT)?,
            payout_fraction: read_fraction(params, PAYOUT_FRACTION)?,
            max_payout_per_epoch: read_amount(params, MAX_PAYOUT_PER_EPOCH)?,
            payout_delay: u64::try_from(delay).map_err(|_| EngineFault::InvalidNetParam {
                key: PAYOUT_DELAY.to_string(),
                value: delay.to_string(),
            })?,
            score: StakeScoreParams {
                min_validators: read_decimal(params, MIN_VALIDATORS)?,
                competition_level: read_positive_decimal(params, COMPETITION_LEVEL)?,
                optimal_stake_multiplier: read_positive_decimal(params, OPTIMAL_STAKE_MULTIPLIER)?,
            },
        })
    }
}

/// Collaborators consulted while rewarding an epoch.
pub struct RewardContext<'a> {
    /// Network parameters.
    pub params: &'a dyn NetParams,
    /// Validator performance multipliers.
    pub performance: &'a dyn ValidatorPerformance,
    /// Fee contribution data.
    pub fees: &'a dyn FeesTracker,
    /// Pools and payout destination.
    pub collateral: &'a mut dyn Collateral,
}

/// Payouts queued under one delivery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayouts {
    /// Chain time at or after which the payouts are delivered.
    pub deliver_at: u64,
    /// Payouts in queue order.
    pub payouts: Vec<Payout>,
}

/// Serialised reward engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCheckpoint {
    /// Current epoch sequence.
    pub epoch_seq: u64,
    /// Queued payouts, ascending by delivery time.
    pub pending: Vec<PendingPayouts>,
}

impl RewardCheckpoint {
    /// Canonical JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes bytes produced by [`RewardCheckpoint::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Payouts computed for an epoch and the transfers executed immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochRewards {
    /// Payouts computed, whether delivered now or queued.
    pub payouts: Vec<Payout>,
    /// Transfers of payouts delivered without delay.
    pub transfers: Vec<TransferResponse>,
}

/// Owner of queued payouts.
#[derive(Debug, Clone, Default)]
pub struct RewardEngine {
    epoch_seq: u64,
    pending_payouts: BTreeMap<u64, Vec<Payout>>,
}

impl RewardEngine {
    /// Engine with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch sequence.
    pub fn epoch_seq(&self) -> u64 {
        self.epoch_seq
    }

    /// Amount already promised out of `account_id` by queued payouts.
    pub fn total_pending_from(&self, account_id: &str) -> Amount {
        self.pending_payouts
            .values()
            .flatten()
            .filter(|p| p.from_account == account_id)
            .fold(0, |acc: Amount, p| acc.saturating_add(p.total_reward))
    }

    /// Number of queued payouts.
    pub fn pending_count(&self) -> usize {
        self.pending_payouts.values().map(Vec::len).sum()
    }

    /// Handles an epoch notification.
    ///
    /// A start records the sequence. An end rewards the epoch from
    /// `validators`, the committed snapshot taken at its close.
    pub fn on_epoch_event(
        &mut self,
        ctx: &mut RewardContext<'_>,
        epoch: &Epoch,
        validators: &[ValidatorData],
    ) -> Result<EpochRewards, EngineFault> {
        let mut outcome = EpochRewards::default();
        if epoch.action() == EpochAction::Start {
            self.epoch_seq = epoch.seq;
            return Ok(outcome);
        }
        let params = RewardParams::from_netparams(ctx.params)?;
        let scores = normalised_validator_scores(
            &params.score,
            validators,
            ctx.performance,
            epoch.end_time,
        )?;
        info!(epoch = epoch.seq, validators = validators.len(), "rewarding epoch");

        for kind in REWARD_ACCOUNT_KINDS {
            for account in ctx.collateral.reward_accounts(kind) {
                if account.kind != kind {
                    return Err(EngineFault::UnsupportedAccountType(account.id));
                }
                let Some(payout) =
                    self.payout_for_account(ctx, &params, &account, epoch, &scores, validators)?
                else {
                    continue;
                };
                outcome.payouts.push(payout.clone());
                if params.payout_delay == 0 {
                    let transfers = self.distribute(ctx.collateral, &payout);
                    outcome.transfers.extend(transfers);
                } else {
                    let deliver_at = epoch.end_time.saturating_add(params.payout_delay);
                    debug!(account = %payout.from_account, deliver_at, "payout queued");
                    self.pending_payouts.entry(deliver_at).or_default().push(payout);
                }
            }
        }
        Ok(outcome)
    }

    fn payout_for_account(
        &self,
        ctx: &RewardContext<'_>,
        params: &RewardParams,
        account: &Account,
        epoch: &Epoch,
        scores: &BTreeMap<String, Decimal>,
        validators: &[ValidatorData],
    ) -> Result<Option<Payout>, EngineFault> {
        if account.balance == 0 {
            return Ok(None);
        }
        if account.kind == AccountKind::GlobalReward && account.asset != params.reward_asset {
            debug!(account = %account.id, "global reward pool not in reward asset");
            return Ok(None);
        }
        let available = account
            .balance
            .saturating_sub(self.total_pending_from(&account.id));
        let mut effective = floor_amount(to_decimal(available)? * params.payout_fraction);
        if params.max_payout_per_epoch > 0 {
            effective = effective.min(params.max_payout_per_epoch);
        }
        if effective == 0 {
            return Ok(None);
        }

        let pool = PoolRef {
            kind: account.kind,
            account_id: &account.id,
            asset: &account.asset,
            epoch_seq: epoch.seq,
            block_time: epoch.end_time,
        };
        let payout = match account.kind {
            AccountKind::GlobalReward => calculate_rewards_by_stake(
                pool,
                effective,
                scores,
                validators,
                params.delegator_share,
                params.max_payout_per_participant,
            )?,
            AccountKind::FeesInfrastructure => calculate_rewards_by_stake(
                pool,
                effective,
                scores,
                validators,
                params.delegator_share,
                0,
            )?,
            AccountKind::MakerFeeReward => calculate_rewards_by_contribution(
                pool,
                effective,
                &ctx.fees.fee_scores(&account.asset, &account.market),
            )?,
            AccountKind::MarketProposerReward => calculate_rewards_for_proposers(
                pool,
                effective,
                &ctx.fees.market_proposers(&account.market),
            ),
            AccountKind::General => return Ok(None),
        };
        if payout.total_reward == 0 {
            return Ok(None);
        }
        info!(
            account = %account.id,
            available = %available,
            paid = %payout.total_reward,
            parties = payout.party_to_amount.len(),
            "payout computed"
        );
        Ok(Some(payout))
    }

    /// Delivers every queued payout due at or before `now`.
    pub fn on_chain_time_update(
        &mut self,
        collateral: &mut dyn Collateral,
        now: u64,
    ) -> Vec<TransferResponse> {
        let later = self.pending_payouts.split_off(&now.saturating_add(1));
        let due = std::mem::replace(&mut self.pending_payouts, later);
        let mut responses = Vec::new();
        for payout in due.into_values().flatten() {
            responses.extend(self.distribute(collateral, &payout));
        }
        responses
    }

    /// Transfers `payout` out of its pool.
    ///
    /// A failed transfer abandons this payout only; the error is logged.
    pub fn distribute(
        &self,
        collateral: &mut dyn Collateral,
        payout: &Payout,
    ) -> Vec<TransferResponse> {
        match collateral.transfer_rewards(&payout.from_account, &payout.transfers()) {
            Ok(responses) => {
                debug!(
                    account = %payout.from_account,
                    total = %payout.total_reward,
                    "payout distributed"
                );
                responses
            }
            Err(err) => {
                error!(account = %payout.from_account, error = %err, "failed to distribute payout");
                Vec::new()
            }
        }
    }

    /// Serialisable snapshot of queued payouts.
    pub fn checkpoint(&self) -> RewardCheckpoint {
        RewardCheckpoint {
            epoch_seq: self.epoch_seq,
            pending: self
                .pending_payouts
                .iter()
                .map(|(deliver_at, payouts)| PendingPayouts {
                    deliver_at: *deliver_at,
                    payouts: payouts.clone(),
                })
                .collect(),
        }
    }

    /// Replaces the engine state with `checkpoint`.
    pub fn load(&mut self, checkpoint: &RewardCheckpoint) {
        self.epoch_seq = checkpoint.epoch_seq;
        self.pending_payouts.clear();
        for entry in &checkpoint.pending {
            self.pending_payouts
                .entry(entry.deliver_at)
                .or_default()
                .extend(entry.payouts.iter().cloned());
        }
    }
}
