//! Serialised form of delegation state.
//!
//! Active entries are ordered by party then node. Pending entries list every
//! delegation before any undelegation, each group ordered by party then node.

use crate::num::Amount;
use serde::{Deserialize, Serialize};

/// Committed amount from a party to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEntry {
    /// Delegating party.
    pub party: String,
    /// Validator node.
    pub node: String,
    /// Committed amount.
    pub amount: Amount,
    /// Epoch in which the entry was captured.
    pub epoch_seq: u64,
}

/// Direction of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    /// Delegation applied at epoch end.
    Delegate,
    /// Undelegation applied at epoch end.
    Undelegate,
}

/// Outstanding request from a party against a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Requesting party.
    pub party: String,
    /// Validator node.
    pub node: String,
    /// Requested amount.
    pub amount: Amount,
    /// Request direction.
    pub kind: PendingKind,
    /// Epoch in which the request was filed.
    pub epoch_seq: u64,
}

/// Complete delegation engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationCheckpoint {
    /// Current epoch sequence.
    pub epoch_seq: u64,
    /// Committed delegation.
    pub active: Vec<DelegationEntry>,
    /// Pending requests.
    pub pending: Vec<PendingEntry>,
    /// Parties in auto-delegation mode, sorted.
    pub auto_delegation: Vec<String>,
}

impl DelegationCheckpoint {
    /// Canonical JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a checkpoint produced by [`DelegationCheckpoint::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
