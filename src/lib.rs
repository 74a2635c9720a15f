#![deny(missing_docs)]

//! # stakehouse
//!
//! **stakehouse** is the economics core of a validator-operated ledger: it
//! keeps track of who delegated stake to which validator, scores validators
//! with an anti-whaling stake curve, and splits reward pools between
//! validators and their delegators.
//!
//! Every computation is a pure function of its inputs. Maps are ordered,
//! decimal arithmetic goes through [`rust_decimal`], and the single place
//! where a tie must be broken draws from a generator seeded by the block time.
//! Replicas fed the same inputs therefore produce byte-identical payouts and
//! checkpoints.
//!
//! ## Engines
//!
//! * [`DelegationEngine`] validates delegation requests during an epoch and,
//!   at its end, sheds delegation no longer backed by stake, snapshots the
//!   committed state and applies the queued requests.
//! * [`scoring`] turns a snapshot into normalised validator scores.
//! * [`RewardEngine`] pays each reward pool out by score, fee contribution or
//!   market proposal, honouring per-participant and per-epoch caps.
//!
//! ## Usage
//!
//! ```rust
//! use stakehouse::{
//!     DelegationContext, DelegationEngine, Epoch, StakeLedger, StaticNetParams, ValidatorSet,
//! };
//!
//! let params = StaticNetParams::with_defaults();
//! let validators = ValidatorSet::new(["node1"]);
//! let mut staking = StakeLedger::default();
//! staking.deposit("party1", 0, 100).unwrap();
//!
//! let ctx = DelegationContext {
//!     staking: &staking,
//!     topology: &validators,
//!     params: &params,
//! };
//! let mut engine = DelegationEngine::new();
//! engine.delegate(&ctx, "party1", "node1", 60).unwrap();
//!
//! let epoch = Epoch { seq: 1, start_time: 0, end_time: 10 };
//! let snapshot = engine.on_epoch_end(&ctx, &epoch).unwrap();
//! assert_eq!(snapshot[0].total_stake(), 0);
//! assert_eq!(engine.party_delegation("party1").unwrap().total, 60);
//! ```

pub mod checkpoint;
pub mod collateral;
/// Command implementations behind the `stakehouse` binary.
pub mod commands;
pub mod config;
pub mod delegation;
pub mod error;
pub mod fees;
pub mod netparams;
pub mod num;
pub mod prng;
pub mod providers;
pub mod rewards;
pub mod scoring;
pub mod staking;
pub mod topology;
pub mod types;

pub use checkpoint::{
    load_latest_checkpoint, write_checkpoint, CheckpointEnvelope, CheckpointError,
    CHECKPOINT_SCHEMA,
};
pub use collateral::{Account, AccountKind, CollateralError, CollateralLedger, Transfer};
pub use config::{Config, ConfigError};
pub use delegation::{DelegationCheckpoint, DelegationContext, DelegationEngine, DelegationError};
pub use error::EngineFault;
pub use fees::FeeActivity;
pub use netparams::StaticNetParams;
pub use num::Amount;
pub use prng::SimplePrng;
pub use providers::{
    Collateral, FeesTracker, NetParams, StakingAccounts, ValidatorPerformance, ValidatorTopology,
};
pub use rewards::{EpochRewards, Payout, RewardCheckpoint, RewardContext, RewardEngine};
pub use scoring::normalised_validator_scores;
pub use staking::{StakeLedger, StakingError};
pub use topology::ValidatorSet;
pub use types::{Epoch, EpochAction, StakeScoreParams, ValidatorData};
