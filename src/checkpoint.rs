//! Hash-sealed checkpoint envelopes written to and read from a directory.

use crate::delegation::DelegationCheckpoint;
use crate::rewards::RewardCheckpoint;
use blake2::digest::{consts::U32, Digest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

type Blake2b256 = blake2::Blake2b<U32>;

/// Schema tag written into every checkpoint file.
pub const CHECKPOINT_SCHEMA: &str = "stakehouse.checkpoint.v1";

/// Engine state captured at an epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    /// Checkpoint schema identifier (`stakehouse.checkpoint.v1`).
    pub schema: String,
    /// Epoch after which the state was captured.
    pub epoch: u64,
    /// Hex BLAKE2b-256 digest of the canonical payload.
    pub hash: String,
    /// Delegation engine state.
    pub delegation: DelegationCheckpoint,
    /// Reward engine state.
    pub rewards: RewardCheckpoint,
}

#[derive(Serialize)]
struct Payload<'a> {
    epoch: u64,
    delegation: &'a DelegationCheckpoint,
    rewards: &'a RewardCheckpoint,
}

/// Errors that may occur while handling checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    /// Underlying I/O or encoding error.
    Io(String),
    #[error("invalid checkpoint schema: {0}")]
    /// The checkpoint schema tag was unexpected.
    InvalidSchema(String),
    #[error("checkpoint hash mismatch: recorded {recorded}, computed {computed}")]
    /// The payload does not match its recorded digest.
    HashMismatch {
        /// Digest stored in the file.
        recorded: String,
        /// Digest of the payload as read.
        computed: String,
    },
}

fn payload_hash(
    epoch: u64,
    delegation: &DelegationCheckpoint,
    rewards: &RewardCheckpoint,
) -> Result<String, CheckpointError> {
    let payload = Payload {
        epoch,
        delegation,
        rewards,
    };
    let bytes = serde_json::to_vec(&payload).map_err(|err| CheckpointError::Io(err.to_string()))?;
    let mut hasher = Blake2b256::new();
    hasher.update(CHECKPOINT_SCHEMA.as_bytes());
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

impl CheckpointEnvelope {
    /// Wraps engine state, stamping schema and digest.
    pub fn new(
        epoch: u64,
        delegation: DelegationCheckpoint,
        rewards: RewardCheckpoint,
    ) -> Result<Self, CheckpointError> {
        let hash = payload_hash(epoch, &delegation, &rewards)?;
        Ok(Self {
            schema: CHECKPOINT_SCHEMA.to_string(),
            epoch,
            hash,
            delegation,
            rewards,
        })
    }

    /// Checks the schema tag and recomputes the digest.
    pub fn verify(&self) -> Result<(), CheckpointError> {
        if self.schema != CHECKPOINT_SCHEMA {
            return Err(CheckpointError::InvalidSchema(self.schema.clone()));
        }
        let computed = payload_hash(self.epoch, &self.delegation, &self.rewards)?;
        if computed != self.hash {
            return Err(CheckpointError::HashMismatch {
                recorded: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// Writes `checkpoint_<epoch>.json` into `dir` through a temporary file.
pub fn write_checkpoint(
    dir: &Path,
    checkpoint: &CheckpointEnvelope,
) -> Result<PathBuf, CheckpointError> {
    fs::create_dir_all(dir).map_err(|err| CheckpointError::Io(err.to_string()))?;
    let path = dir.join(format!("checkpoint_{}.json", checkpoint.epoch));
    let tmp_path = dir.join(format!("checkpoint_{}.json.tmp", checkpoint.epoch));
    let contents = serde_json::to_string_pretty(checkpoint)
        .map_err(|err| CheckpointError::Io(err.to_string()))?;
    fs::write(&tmp_path, contents).map_err(|err| CheckpointError::Io(err.to_string()))?;
    fs::rename(&tmp_path, &path).map_err(|err| CheckpointError::Io(err.to_string()))?;
    Ok(path)
}

/// Returns the verified checkpoint with the highest epoch in `dir`, if any.
pub fn load_latest_checkpoint(dir: &Path) -> Result<Option<CheckpointEnvelope>, CheckpointError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let epoch = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| stem.strip_prefix("checkpoint_"))
            .and_then(|epoch| epoch.parse::<u64>().ok());
        if let Some(epoch) = epoch {
            if best.as_ref().map(|(b, _)| epoch > *b).unwrap_or(true) {
                best = Some((epoch, path));
            }
        }
    }
    let Some((_, path)) = best else {
        return Ok(None);
    };
    let contents = fs::read_to_string(&path).map_err(|err| CheckpointError::Io(err.to_string()))?;
    let checkpoint: CheckpointEnvelope =
        serde_json::from_str(&contents).map_err(|err| CheckpointError::Io(err.to_string()))?;
    checkpoint.verify()?;
    Ok(Some(checkpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::DelegationEntry;

    fn temp_dir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("{name}_{ts}"));
        p
    }

    fn envelope(epoch: u64) -> CheckpointEnvelope {
        let delegation = DelegationCheckpoint {
            epoch_seq: epoch,
            active: vec![DelegationEntry {
                party: "party1".into(),
                node: "node1".into(),
                amount: 10,
                epoch_seq: epoch,
            }],
            ..DelegationCheckpoint::default()
        };
        CheckpointEnvelope::new(epoch, delegation, RewardCheckpoint::default()).unwrap()
    }

    #[test]
    fn latest_checkpoint_wins() {
        let dir = temp_dir("stakehouse_checkpoints");
        write_checkpoint(&dir, &envelope(2)).unwrap();
        write_checkpoint(&dir, &envelope(10)).unwrap();
        write_checkpoint(&dir, &envelope(9)).unwrap();
        let latest = load_latest_checkpoint(&dir).unwrap().unwrap();
        assert_eq!(latest, envelope(10));
        assert!(!dir.join("checkpoint_10.json.tmp").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_directory_has_no_checkpoint() {
        assert_eq!(load_latest_checkpoint(&temp_dir("absent")).unwrap(), None);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut checkpoint = envelope(1);
        checkpoint.delegation.active[0].amount = 11;
        assert!(matches!(
            checkpoint.verify(),
            Err(CheckpointError::HashMismatch { .. })
        ));

        let mut checkpoint = envelope(1);
        checkpoint.schema = "other".into();
        assert_eq!(
            checkpoint.verify(),
            Err(CheckpointError::InvalidSchema("other".into()))
        );
    }

    #[test]
    fn hash_depends_on_epoch() {
        assert_ne!(envelope(1).hash, envelope(2).hash);
        assert_eq!(envelope(1).hash.len(), 64);
    }
}
