//! Durable stake balance ledger with per-party balance history.
//!
//! Each party keeps a time-ordered list of balance checkpoints. The epoch
//! balance is the lowest balance the party held at any point of the epoch, so
//! stake removed mid-epoch cannot back that epoch's delegation.

use crate::num::Amount;
use crate::providers::StakingAccounts;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use thiserror::Error;

/// Errors raised by the stake ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StakingError {
    #[error("no staking account for party {0}")]
    /// The party never held stake.
    UnknownParty(String),
    #[error("insufficient stake: requested {requested}, available {available}")]
    /// A removal exceeded the current balance.
    InsufficientStake {
        /// Amount requested.
        requested: Amount,
        /// Balance available.
        available: Amount,
    },
    #[error("balance update at {time} precedes last update at {last}")]
    /// Updates must arrive in non-decreasing time order.
    OutOfOrder {
        /// Time of the rejected update.
        time: u64,
        /// Time of the latest recorded update.
        last: u64,
    },
    #[error("io error: {0}")]
    /// Underlying filesystem or encoding failure.
    Io(String),
}

/// Balance held from `time` until the next checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheckpoint {
    /// Unix milliseconds at which the balance took effect.
    pub time: u64,
    /// Balance from that time on.
    pub balance: Amount,
}

/// Balance history of one party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeAccount {
    /// Checkpoints in ascending time order.
    pub history: Vec<BalanceCheckpoint>,
}

impl StakeAccount {
    /// Latest recorded balance.
    pub fn current(&self) -> Amount {
        self.history.last().map(|c| c.balance).unwrap_or(0)
    }

    /// Balance in effect at `time`.
    pub fn balance_at(&self, time: u64) -> Amount {
        self.history
            .iter()
            .take_while(|c| c.time <= time)
            .last()
            .map(|c| c.balance)
            .unwrap_or(0)
    }

    /// Lowest balance in effect anywhere in `[from, to]`.
    pub fn min_in_range(&self, from: u64, to: u64) -> Amount {
        self.history
            .iter()
            .filter(|c| c.time > from && c.time <= to)
            .map(|c| c.balance)
            .fold(self.balance_at(from), Amount::min)
    }

    fn record(&mut self, time: u64, balance: Amount) -> Result<(), StakingError> {
        match self.history.last_mut() {
            Some(last) if time < last.time => {
                return Err(StakingError::OutOfOrder {
                    time,
                    last: last.time,
                })
            }
            Some(last) if time == last.time => last.balance = balance,
            _ => self.history.push(BalanceCheckpoint { time, balance }),
        }
        Ok(())
    }
}

/// Stake ledger keyed by party identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeLedger {
    accounts: BTreeMap<String, StakeAccount>,
}

impl StakeLedger {
    /// Load from JSON; missing file -> empty ledger.
    pub fn load(path: &Path) -> Result<Self, StakingError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| StakingError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| StakingError::Io(e.to_string()))
    }

    /// Persist to JSON.
    pub fn save(&self, path: &Path) -> Result<(), StakingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StakingError::Io(e.to_string()))?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| StakingError::Io(e.to_string()))?;
        fs::write(path, data).map_err(|e| StakingError::Io(e.to_string()))
    }

    /// Account for `party`, if it ever held stake.
    pub fn account(&self, party: &str) -> Option<&StakeAccount> {
        self.accounts.get(party)
    }

    /// Adds `amount` to the balance of `party` at `time`.
    pub fn deposit(&mut self, party: &str, time: u64, amount: Amount) -> Result<(), StakingError> {
        let account = self.accounts.entry(party.to_string()).or_default();
        let balance = account.current().saturating_add(amount);
        account.record(time, balance)
    }

    /// Removes `amount` from the balance of `party` at `time`.
    pub fn remove(&mut self, party: &str, time: u64, amount: Amount) -> Result<(), StakingError> {
        let account = self
            .accounts
            .get_mut(party)
            .ok_or_else(|| StakingError::UnknownParty(party.to_string()))?;
        let available = account.current();
        if available < amount {
            return Err(StakingError::InsufficientStake {
                requested: amount,
                available,
            });
        }
        account.record(time, available - amount)
    }

    /// Sets the balance of `party` at `time` outright.
    pub fn set_balance(
        &mut self,
        party: &str,
        time: u64,
        balance: Amount,
    ) -> Result<(), StakingError> {
        self.accounts
            .entry(party.to_string())
            .or_default()
            .record(time, balance)
    }
}

impl StakingAccounts for StakeLedger {
    fn balance_now(&self, party: &str) -> Result<Amount, StakingError> {
        self.accounts
            .get(party)
            .map(StakeAccount::current)
            .ok_or_else(|| StakingError::UnknownParty(party.to_string()))
    }

    fn balance_for_epoch(&self, party: &str, from: u64, to: u64) -> Result<Amount, StakingError> {
        self.accounts
            .get(party)
            .map(|account| account.min_in_range(from, to))
            .ok_or_else(|| StakingError::UnknownParty(party.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("{name}_{ts}"));
        p
    }

    #[test]
    fn epoch_balance_is_minimum_over_the_window() {
        let mut ledger = StakeLedger::default();
        ledger.deposit("party1", 0, 100).unwrap();
        ledger.remove("party1", 50, 80).unwrap();
        ledger.deposit("party1", 70, 80).unwrap();
        assert_eq!(ledger.balance_now("party1"), Ok(100));
        assert_eq!(ledger.balance_for_epoch("party1", 10, 100), Ok(20));
        assert_eq!(ledger.balance_for_epoch("party1", 70, 100), Ok(100));
        assert_eq!(ledger.balance_for_epoch("party1", 0, 40), Ok(100));
    }

    #[test]
    fn unknown_party_has_no_account() {
        let ledger = StakeLedger::default();
        assert_eq!(
            ledger.balance_now("ghost"),
            Err(StakingError::UnknownParty("ghost".into()))
        );
    }

    #[test]
    fn removal_beyond_balance_is_rejected() {
        let mut ledger = StakeLedger::default();
        ledger.deposit("party1", 0, 5).unwrap();
        assert_eq!(
            ledger.remove("party1", 1, 6),
            Err(StakingError::InsufficientStake {
                requested: 6,
                available: 5
            })
        );
        assert_eq!(ledger.balance_now("party1"), Ok(5));
    }

    #[test]
    fn updates_must_not_go_back_in_time() {
        let mut ledger = StakeLedger::default();
        ledger.deposit("party1", 10, 5).unwrap();
        assert!(matches!(
            ledger.deposit("party1", 5, 5),
            Err(StakingError::OutOfOrder { time: 5, last: 10 })
        ));
        ledger.deposit("party1", 10, 5).unwrap();
        assert_eq!(ledger.account("party1").unwrap().history.len(), 1);
        assert_eq!(ledger.balance_now("party1"), Ok(10));
    }

    #[test]
    fn ledger_survives_save_and_load() {
        let path = temp_path("stake_ledger.json");
        let mut ledger = StakeLedger::default();
        ledger.deposit("party1", 1, 10).unwrap();
        ledger.save(&path).unwrap();
        let loaded = StakeLedger::load(&path).unwrap();
        assert_eq!(loaded, ledger);
        let _ = std::fs::remove_file(path);
        assert_eq!(
            StakeLedger::load(&temp_path("missing")).unwrap(),
            StakeLedger::default()
        );
    }
}
