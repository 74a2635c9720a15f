//! Unrecoverable engine faults.
//!
//! A fault means replicas could diverge if processing continued. Callers must
//! halt the node when they see one instead of retrying or skipping the step.

use crate::num::Amount;
use thiserror::Error;

/// Fatal condition raised by the economics engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("network parameter {0} is not set")]
    /// A consumed network parameter is absent.
    MissingNetParam(String),
    #[error("network parameter {key} has invalid value {value:?}")]
    /// A consumed network parameter failed to parse or is out of range.
    InvalidNetParam {
        /// Parameter key.
        key: String,
        /// Raw value that failed validation.
        value: String,
    },
    #[error("unsupported account type for {0}")]
    /// A reward pool was addressed through an account of the wrong type.
    UnsupportedAccountType(String),
    #[error("amount {0} exceeds the supported decimal range")]
    /// An amount too large to lift into decimal arithmetic.
    AmountOutOfRange(Amount),
    #[error("decimal overflow while {0}")]
    /// Decimal arithmetic overflowed.
    DecimalOverflow(String),
    #[error("party and validator delegation state disagree for party {party} on node {node}")]
    /// Party-side and validator-side delegation mappings are inconsistent.
    DelegationStateMismatch {
        /// Delegating party.
        party: String,
        /// Validator node.
        node: String,
    },
}
