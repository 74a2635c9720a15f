//! Committed and pending delegation books.
//!
//! Both books keep only non-zero relationships: an entry that reaches zero is
//! deleted, so iteration and serialisation see active pairs only.

use crate::error::EngineFault;
use crate::num::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Committed delegation towards one validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDelegation {
    /// Sum of `party_to_amount`.
    pub total: Amount,
    /// Delegating party to committed amount.
    pub party_to_amount: BTreeMap<String, Amount>,
}

/// Committed delegation of one party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDelegation {
    /// Sum of `node_to_amount`.
    pub total: Amount,
    /// Validator node to committed amount.
    pub node_to_amount: BTreeMap<String, Amount>,
}

/// Requests filed by one party during the running epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPartyDelegation {
    /// Sum of `node_to_delegate`.
    pub total_delegation: Amount,
    /// Sum of `node_to_undelegate`.
    pub total_undelegation: Amount,
    /// Node to amount awaiting delegation.
    pub node_to_delegate: BTreeMap<String, Amount>,
    /// Node to amount awaiting undelegation.
    pub node_to_undelegate: BTreeMap<String, Amount>,
}

fn subtract_entry(map: &mut BTreeMap<String, Amount>, key: &str, amount: Amount) {
    if let Some(value) = map.get_mut(key) {
        *value = value.saturating_sub(amount);
        if *value == 0 {
            map.remove(key);
        }
    }
}

fn add_entry(map: &mut BTreeMap<String, Amount>, key: &str, amount: Amount) {
    if amount > 0 {
        let value = map.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(amount);
    }
}

// Nets `amount` against the opposite-direction entry for `node` first and
// records only the remainder on the requested side.
fn net_request(
    node: &str,
    amount: Amount,
    opposite: &mut BTreeMap<String, Amount>,
    opposite_total: &mut Amount,
    own: &mut BTreeMap<String, Amount>,
    own_total: &mut Amount,
) {
    let offset = opposite.get(node).copied().unwrap_or(0).min(amount);
    subtract_entry(opposite, node, offset);
    *opposite_total -= offset;
    let remainder = amount - offset;
    add_entry(own, node, remainder);
    *own_total += remainder;
}

impl PendingPartyDelegation {
    /// Records a delegation request, netting a pending undelegation first.
    pub fn add_delegation(&mut self, node: &str, amount: Amount) {
        net_request(
            node,
            amount,
            &mut self.node_to_undelegate,
            &mut self.total_undelegation,
            &mut self.node_to_delegate,
            &mut self.total_delegation,
        );
    }

    /// Records an undelegation request, netting a pending delegation first.
    pub fn add_undelegation(&mut self, node: &str, amount: Amount) {
        net_request(
            node,
            amount,
            &mut self.node_to_delegate,
            &mut self.total_delegation,
            &mut self.node_to_undelegate,
            &mut self.total_undelegation,
        );
    }

    /// Withdraws up to `amount` from the pending delegation to `node`.
    pub fn take_delegation(&mut self, node: &str, amount: Amount) -> Amount {
        let taken = self.delegation_to(node).min(amount);
        subtract_entry(&mut self.node_to_delegate, node, taken);
        self.total_delegation -= taken;
        taken
    }

    /// Pending delegation towards `node`.
    pub fn delegation_to(&self, node: &str) -> Amount {
        self.node_to_delegate.get(node).copied().unwrap_or(0)
    }

    /// Pending undelegation from `node`.
    pub fn undelegation_from(&self, node: &str) -> Amount {
        self.node_to_undelegate.get(node).copied().unwrap_or(0)
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.node_to_delegate.is_empty() && self.node_to_undelegate.is_empty()
    }
}

/// Committed delegation indexed from both the party and the validator side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedBook {
    parties: BTreeMap<String, PartyDelegation>,
    nodes: BTreeMap<String, ValidatorDelegation>,
}

impl CommittedBook {
    /// Committed amount from `party` to `node`.
    pub fn amount(&self, party: &str, node: &str) -> Amount {
        self.parties
            .get(party)
            .and_then(|p| p.node_to_amount.get(node))
            .copied()
            .unwrap_or(0)
    }

    /// Total committed by `party`.
    pub fn party_total(&self, party: &str) -> Amount {
        self.parties.get(party).map(|p| p.total).unwrap_or(0)
    }

    /// Total committed to `node`.
    pub fn node_total(&self, node: &str) -> Amount {
        self.nodes.get(node).map(|n| n.total).unwrap_or(0)
    }

    /// Party-side view of `party`.
    pub fn party(&self, party: &str) -> Option<&PartyDelegation> {
        self.parties.get(party)
    }

    /// Validator-side view of `node`.
    pub fn node(&self, node: &str) -> Option<&ValidatorDelegation> {
        self.nodes.get(node)
    }

    /// All parties with committed delegation, sorted.
    pub fn parties(&self) -> impl Iterator<Item = (&String, &PartyDelegation)> {
        self.parties.iter()
    }

    /// Fails when the two sides disagree on the `(party, node)` amount.
    pub fn verify_pair(&self, party: &str, node: &str) -> Result<Amount, EngineFault> {
        let party_side = self.amount(party, node);
        let node_side = self
            .nodes
            .get(node)
            .and_then(|n| n.party_to_amount.get(party))
            .copied()
            .unwrap_or(0);
        if party_side != node_side {
            return Err(EngineFault::DelegationStateMismatch {
                party: party.to_string(),
                node: node.to_string(),
            });
        }
        Ok(party_side)
    }

    /// Adds `amount` to the `(party, node)` pair on both sides.
    pub fn increase(&mut self, party: &str, node: &str, amount: Amount) {
        if amount == 0 {
            return;
        }
        let p = self.parties.entry(party.to_string()).or_default();
        add_entry(&mut p.node_to_amount, node, amount);
        p.total = p.total.saturating_add(amount);
        let n = self.nodes.entry(node.to_string()).or_default();
        add_entry(&mut n.party_to_amount, party, amount);
        n.total = n.total.saturating_add(amount);
    }

    /// Removes up to `amount` from the pair and returns what was removed.
    pub fn decrease(
        &mut self,
        party: &str,
        node: &str,
        amount: Amount,
    ) -> Result<Amount, EngineFault> {
        let committed = self.verify_pair(party, node)?;
        let taken = committed.min(amount);
        if taken == 0 {
            return Ok(0);
        }
        if let Some(p) = self.parties.get_mut(party) {
            subtract_entry(&mut p.node_to_amount, node, taken);
            p.total -= taken;
            if p.total == 0 {
                self.parties.remove(party);
            }
        }
        if let Some(n) = self.nodes.get_mut(node) {
            subtract_entry(&mut n.party_to_amount, party, taken);
            n.total -= taken;
            if n.total == 0 {
                self.nodes.remove(node);
            }
        }
        Ok(taken)
    }

    /// Checks totals and cross-side agreement for every entry.
    pub fn check_consistency(&self) -> Result<(), EngineFault> {
        for (party, p) in &self.parties {
            let sum: Amount = p.node_to_amount.values().sum();
            if sum != p.total || p.total == 0 {
                return Err(mismatch(party, ""));
            }
            for node in p.node_to_amount.keys() {
                self.verify_pair(party, node)?;
            }
        }
        for (node, n) in &self.nodes {
            let sum: Amount = n.party_to_amount.values().sum();
            if sum != n.total || n.total == 0 {
                return Err(mismatch("", node));
            }
            for party in n.party_to_amount.keys() {
                self.verify_pair(party, node)?;
            }
        }
        Ok(())
    }
}

fn mismatch(party: &str, node: &str) -> EngineFault {
    EngineFault::DelegationStateMismatch {
        party: party.to_string(),
        node: node.to_string(),
    }
}
