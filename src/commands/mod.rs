use crate::checkpoint::CheckpointError;
use crate::collateral::CollateralError;
use crate::error::EngineFault;
use crate::netparams::StaticNetParams;
use crate::rewards::RewardParams;
use crate::scoring::normalised_validator_scores;
use crate::staking::StakingError;
use crate::topology::ValidatorSet;
use crate::types::ValidatorData;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Scenario replay through the delegation and reward engines.
pub mod simulate;

/// Failures surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("engine fault: {0}")]
    /// The engines hit an unrecoverable condition.
    Fault(#[from] EngineFault),
    #[error(transparent)]
    /// Stake ledger update failed.
    Staking(#[from] StakingError),
    #[error(transparent)]
    /// Collateral ledger update failed.
    Collateral(#[from] CollateralError),
    #[error(transparent)]
    /// Checkpoint could not be written or read.
    Checkpoint(#[from] CheckpointError),
    #[error("io error: {0}")]
    /// An input file could not be read.
    Io(String),
    #[error("parse error: {0}")]
    /// An input file is malformed.
    Parse(String),
}

/// Normalised scores for a `ValidatorData` array stored at `path`.
///
/// Every listed validator is taken to perform perfectly.
pub fn score_snapshot(
    path: &Path,
    params: &StaticNetParams,
) -> Result<BTreeMap<String, Decimal>, CommandError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| CommandError::Io(format!("{}: {err}", path.display())))?;
    let validators: Vec<ValidatorData> = serde_json::from_str(&contents)
        .map_err(|err| CommandError::Parse(format!("{}: {err}", path.display())))?;
    let reward_params = RewardParams::from_netparams(params)?;
    let performance = ValidatorSet::new(validators.iter().map(|v| v.node_id.clone()));
    Ok(normalised_validator_scores(
        &reward_params.score,
        &validators,
        &performance,
        0,
    )?)
}
