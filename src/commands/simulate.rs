use super::CommandError;
use crate::checkpoint::{write_checkpoint, CheckpointEnvelope};
use crate::collateral::{AccountKind, CollateralLedger, TransferResponse, NO_MARKET};
use crate::delegation::{DelegationContext, DelegationEngine, DelegationError};
use crate::fees::FeeActivity;
use crate::netparams::StaticNetParams;
use crate::num::Amount;
use crate::rewards::{Payout, RewardContext, RewardEngine, RewardParams};
use crate::scoring::normalised_validator_scores;
use crate::staking::StakeLedger;
use crate::topology::ValidatorSet;
use crate::types::{Epoch, ValidatorData};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stake ledger file inside a ledger directory.
pub const STAKE_LEDGER_FILE: &str = "stakes.json";
/// Collateral ledger file inside a ledger directory.
pub const COLLATERAL_LEDGER_FILE: &str = "collateral.json";

fn no_market() -> String {
    NO_MARKET.to_string()
}

/// Stake balance of a party from `time` on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeUpdate {
    /// Staking party.
    pub party: String,
    /// Unix milliseconds at which the balance takes effect.
    pub time: u64,
    /// New balance.
    pub balance: Amount,
}

/// Funds added to a reward pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolFunding {
    /// Pool kind.
    pub kind: AccountKind,
    /// Pool asset.
    pub asset: String,
    /// Pool market.
    #[serde(default = "no_market")]
    pub market: String,
    /// Amount added.
    pub amount: Amount,
}

/// Delegation request filed during an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Delegate at epoch end.
    Delegate {
        /// Requesting party.
        party: String,
        /// Target node.
        node: String,
        /// Amount.
        amount: Amount,
    },
    /// Undelegate at epoch end; zero means everything.
    Undelegate {
        /// Requesting party.
        party: String,
        /// Target node.
        node: String,
        /// Amount.
        #[serde(default)]
        amount: Amount,
    },
    /// Undelegate immediately; zero means everything.
    UndelegateNow {
        /// Requesting party.
        party: String,
        /// Target node.
        node: String,
        /// Amount.
        #[serde(default)]
        amount: Amount,
    },
}

/// One epoch of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioEpoch {
    /// Epoch sequence.
    pub seq: u64,
    /// Start time.
    pub start_time: u64,
    /// End time.
    pub end_time: u64,
    /// Network parameter updates applied as the epoch starts.
    #[serde(default)]
    pub netparams: BTreeMap<String, String>,
    /// Stake changes applied as the epoch starts.
    #[serde(default)]
    pub stakes: Vec<StakeUpdate>,
    /// Pool top-ups applied as the epoch starts.
    #[serde(default)]
    pub funding: Vec<PoolFunding>,
    /// Requests filed during the epoch, in order.
    #[serde(default)]
    pub requests: Vec<Request>,
}

/// Replayable input for [`run_simulation`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Validators and their performance.
    pub validators: ValidatorSet,
    /// Initial stake balances.
    #[serde(default)]
    pub stakes: Vec<StakeUpdate>,
    /// Initial pool balances.
    #[serde(default)]
    pub funding: Vec<PoolFunding>,
    /// Fee contribution and proposer data.
    #[serde(default)]
    pub fees: FeeActivity,
    /// Epochs to replay.
    #[serde(default)]
    pub epochs: Vec<ScenarioEpoch>,
}

impl Scenario {
    /// Reads a scenario file.
    pub fn load(path: &Path) -> Result<Self, CommandError> {
        let contents = fs::read_to_string(path)
            .map_err(|err| CommandError::Io(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|err| CommandError::Parse(format!("{}: {err}", path.display())))
    }
}

/// Result of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// The request.
    pub request: Request,
    /// Rejection message, if rejected.
    pub error: Option<String>,
}

/// What happened during one simulated epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Epoch sequence.
    pub epoch: u64,
    /// Request outcomes in filing order.
    pub requests: Vec<RequestOutcome>,
    /// Committed snapshot the epoch was rewarded with.
    pub validators: Vec<ValidatorData>,
    /// Normalised validator scores.
    pub scores: BTreeMap<String, Decimal>,
    /// Payouts computed at epoch end.
    pub payouts: Vec<Payout>,
    /// Transfers executed during the epoch.
    pub transfers: Vec<TransferResponse>,
    /// Checkpoint written after the epoch.
    pub checkpoint: Option<PathBuf>,
}

/// Directories a simulation reads from and writes to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationDirs<'a> {
    /// Receives one checkpoint per epoch.
    pub checkpoints: Option<&'a Path>,
    /// Holds [`STAKE_LEDGER_FILE`] and [`COLLATERAL_LEDGER_FILE`]. Ledgers are
    /// read from it before the run and written back after the last epoch, so
    /// a later scenario can continue the same timeline.
    pub ledgers: Option<&'a Path>,
}

struct World {
    params: StaticNetParams,
    validators: ValidatorSet,
    staking: StakeLedger,
    collateral: CollateralLedger,
    fees: FeeActivity,
}

impl World {
    fn delegation_ctx(&self) -> DelegationContext<'_> {
        DelegationContext {
            staking: &self.staking,
            topology: &self.validators,
            params: &self.params,
        }
    }

    fn apply_stakes(&mut self, stakes: &[StakeUpdate]) -> Result<(), CommandError> {
        for update in stakes {
            self.staking
                .set_balance(&update.party, update.time, update.balance)?;
        }
        Ok(())
    }

    fn apply_funding(&mut self, funding: &[PoolFunding]) -> Result<(), CommandError> {
        for top_up in funding {
            let id = self
                .collateral
                .ensure_reward_account(top_up.kind, &top_up.asset, &top_up.market)?;
            self.collateral.increment_balance(&id, top_up.amount)?;
        }
        Ok(())
    }
}

fn file_request(
    engine: &mut DelegationEngine,
    ctx: &DelegationContext<'_>,
    request: &Request,
) -> Result<(), DelegationError> {
    match request {
        Request::Delegate {
            party,
            node,
            amount,
        } => engine.delegate(ctx, party, node, *amount),
        Request::Undelegate {
            party,
            node,
            amount,
        } => engine.undelegate_at_end_of_epoch(ctx, party, node, *amount),
        Request::UndelegateNow {
            party,
            node,
            amount,
        } => engine.undelegate_now(ctx, party, node, *amount),
    }
}

/// Replays `scenario` through fresh engines.
///
/// Ledgers start empty unless `dirs.ledgers` holds saved ones.
/// Rejected requests are reported in the summary. Engine faults abort the run.
pub fn run_simulation(
    scenario: &Scenario,
    params: StaticNetParams,
    dirs: SimulationDirs<'_>,
) -> Result<Vec<EpochSummary>, CommandError> {
    let (staking, collateral) = match dirs.ledgers {
        Some(dir) => (
            StakeLedger::load(&dir.join(STAKE_LEDGER_FILE))?,
            CollateralLedger::load(&dir.join(COLLATERAL_LEDGER_FILE))?,
        ),
        None => (StakeLedger::default(), CollateralLedger::default()),
    };
    let mut world = World {
        params,
        validators: scenario.validators.clone(),
        staking,
        collateral,
        fees: scenario.fees.clone(),
    };
    world.apply_stakes(&scenario.stakes)?;
    world.apply_funding(&scenario.funding)?;

    let mut delegation = DelegationEngine::new();
    let mut rewards = RewardEngine::new();
    let mut summaries = Vec::with_capacity(scenario.epochs.len());

    for step in &scenario.epochs {
        world.params.extend(&step.netparams);
        world.apply_stakes(&step.stakes)?;
        world.apply_funding(&step.funding)?;

        let start = Epoch {
            seq: step.seq,
            start_time: step.start_time,
            end_time: 0,
        };
        let end = Epoch {
            end_time: step.end_time,
            ..start
        };
        info!(epoch = step.seq, "epoch started");
        delegation.on_epoch_event(&start);
        {
            let mut ctx = RewardContext {
                params: &world.params,
                performance: &world.validators,
                fees: &world.fees,
                collateral: &mut world.collateral,
            };
            rewards.on_epoch_event(&mut ctx, &start, &[])?;
        }
        let mut transfers = rewards.on_chain_time_update(&mut world.collateral, step.start_time);

        let mut outcomes = Vec::with_capacity(step.requests.len());
        for request in &step.requests {
            let result = file_request(&mut delegation, &world.delegation_ctx(), request);
            if let Err(DelegationError::Fault(fault)) = &result {
                return Err(fault.clone().into());
            }
            if let Err(err) = &result {
                debug!(?request, error = %err, "request rejected");
            }
            outcomes.push(RequestOutcome {
                request: request.clone(),
                error: result.err().map(|err| err.to_string()),
            });
        }

        let snapshot = delegation.on_epoch_end(&world.delegation_ctx(), &end)?;
        let reward_params = RewardParams::from_netparams(&world.params)?;
        let scores = normalised_validator_scores(
            &reward_params.score,
            &snapshot,
            &world.validators,
            step.end_time,
        )?;
        let epoch_rewards = {
            let mut ctx = RewardContext {
                params: &world.params,
                performance: &world.validators,
                fees: &world.fees,
                collateral: &mut world.collateral,
            };
            rewards.on_epoch_event(&mut ctx, &end, &snapshot)?
        };
        transfers.extend(epoch_rewards.transfers);
        transfers.extend(rewards.on_chain_time_update(&mut world.collateral, step.end_time));

        let checkpoint = match dirs.checkpoints {
            Some(dir) => {
                let envelope = CheckpointEnvelope::new(
                    step.seq,
                    delegation.checkpoint(),
                    rewards.checkpoint(),
                )?;
                Some(write_checkpoint(dir, &envelope)?)
            }
            None => None,
        };

        summaries.push(EpochSummary {
            epoch: step.seq,
            requests: outcomes,
            validators: snapshot,
            scores,
            payouts: epoch_rewards.payouts,
            transfers,
            checkpoint,
        });
    }

    if let Some(dir) = dirs.ledgers {
        world.staking.save(&dir.join(STAKE_LEDGER_FILE))?;
        world.collateral.save(&dir.join(COLLATERAL_LEDGER_FILE))?;
        info!(dir = %dir.display(), "ledgers saved");
    }
    Ok(summaries)
}
