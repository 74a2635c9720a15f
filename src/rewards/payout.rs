use crate::collateral::{AccountKind, Transfer};
use crate::num::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amounts owed to parties out of one reward pool for one epoch.
///
/// `total_reward` always equals the sum of `party_to_amount`, and zero
/// amounts are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Pool kind the payout draws from.
    pub reward_kind: AccountKind,
    /// Source reward account id.
    pub from_account: String,
    /// Asset paid.
    pub asset: String,
    /// Epoch being rewarded.
    pub epoch_seq: u64,
    /// Chain time at which the payout was computed.
    pub timestamp: u64,
    /// Party to amount.
    pub party_to_amount: BTreeMap<String, Amount>,
    /// Sum of all amounts.
    pub total_reward: Amount,
}

impl Payout {
    /// Empty payout from `from_account`.
    pub fn new(
        reward_kind: AccountKind,
        from_account: &str,
        asset: &str,
        epoch_seq: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            reward_kind,
            from_account: from_account.to_string(),
            asset: asset.to_string(),
            epoch_seq,
            timestamp,
            party_to_amount: BTreeMap::new(),
            total_reward: 0,
        }
    }

    /// Adds `amount` to what `party` is owed.
    pub fn credit(&mut self, party: &str, amount: Amount) {
        if amount == 0 {
            return;
        }
        let entry = self.party_to_amount.entry(party.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
        self.total_reward = self.total_reward.saturating_add(amount);
    }

    /// What `party` is owed so far.
    pub fn amount_for(&self, party: &str) -> Amount {
        self.party_to_amount.get(party).copied().unwrap_or(0)
    }

    /// One transfer per party, ordered by party.
    pub fn transfers(&self) -> Vec<Transfer> {
        self.party_to_amount
            .iter()
            .map(|(party, amount)| Transfer {
                owner: party.clone(),
                asset: self.asset.clone(),
                amount: *amount,
            })
            .collect()
    }
}
