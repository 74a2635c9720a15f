//! Delegation engine: committed and pending stake delegation.
//!
//! Requests filed during an epoch are validated against the party's stake
//! balance and recorded as pending. At epoch end the engine sheds delegation
//! no longer backed by stake, snapshots the committed state for rewarding,
//! and then applies the pending requests for the next epoch.

mod checkpoint;
mod state;

pub use checkpoint::{DelegationCheckpoint, DelegationEntry, PendingEntry, PendingKind};
pub use state::{PartyDelegation, PendingPartyDelegation, ValidatorDelegation};

use crate::error::EngineFault;
use crate::netparams::{read_amount, DELEGATION_MIN_AMOUNT, MAX_STAKE_PER_VALIDATOR};
use crate::num::{prorate, to_decimal, Amount};
use crate::providers::{NetParams, StakingAccounts, ValidatorTopology};
use crate::types::{Epoch, EpochAction, ValidatorData};
use rust_decimal::Decimal;
use state::CommittedBook;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Committed-to-balance ratio at which a party enters auto-delegation mode.
const AUTO_DELEGATION_RATIO: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

/// Request validation failures.
///
/// The first five variants are ordinary rejections of a single request.
/// [`DelegationError::Fault`] is unrecoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("invalid node ID")]
    /// The node is not a recognised validator.
    InvalidNodeId,
    #[error("cannot find staking account for the party")]
    /// The party has no queryable stake balance.
    PartyHasNoStakingAccount,
    #[error("delegation amount is lower than the minimum amount for delegation for a validator")]
    /// The request is below the network minimum.
    AmountLtMinAmountForDelegation,
    #[error("insufficient balance for delegation")]
    /// The party's undelegated stake does not cover the request.
    InsufficientBalanceForDelegation,
    #[error("incorrect token amount for undelegation")]
    /// The request exceeds what can be undelegated.
    IncorrectTokenAmountForUndelegation,
    #[error(transparent)]
    /// Unrecoverable engine fault.
    Fault(#[from] EngineFault),
}

/// Collaborators consulted by the delegation engine.
#[derive(Clone, Copy)]
pub struct DelegationContext<'a> {
    /// Stake balances.
    pub staking: &'a dyn StakingAccounts,
    /// Validator set.
    pub topology: &'a dyn ValidatorTopology,
    /// Network parameters.
    pub params: &'a dyn NetParams,
}

/// Owner of all delegation state.
#[derive(Debug, Clone, Default)]
pub struct DelegationEngine {
    epoch_seq: u64,
    committed: CommittedBook,
    pending: BTreeMap<String, PendingPartyDelegation>,
    auto_delegation: BTreeSet<String>,
}

impl DelegationEngine {
    /// Creates an engine with no delegation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch sequence.
    pub fn epoch_seq(&self) -> u64 {
        self.epoch_seq
    }

    /// Records the sequence of a starting epoch.
    pub fn on_epoch_event(&mut self, epoch: &Epoch) {
        if epoch.action() == EpochAction::Start {
            self.epoch_seq = epoch.seq;
        }
    }

    /// Committed delegation of `party`.
    pub fn party_delegation(&self, party: &str) -> Option<&PartyDelegation> {
        self.committed.party(party)
    }

    /// Committed delegation towards `node`.
    pub fn validator_delegation(&self, node: &str) -> Option<&ValidatorDelegation> {
        self.committed.node(node)
    }

    /// Requests `party` filed during the running epoch.
    pub fn pending_for(&self, party: &str) -> Option<&PendingPartyDelegation> {
        self.pending.get(party)
    }

    /// Whether `party` is in auto-delegation mode.
    pub fn is_auto_delegating(&self, party: &str) -> bool {
        self.auto_delegation.contains(party)
    }

    fn pending_delegation(&self, party: &str, node: &str) -> Amount {
        self.pending
            .get(party)
            .map(|p| p.delegation_to(node))
            .unwrap_or(0)
    }

    fn pending_undelegation(&self, party: &str, node: &str) -> Amount {
        self.pending
            .get(party)
            .map(|p| p.undelegation_from(node))
            .unwrap_or(0)
    }

    fn prune_pending(&mut self, party: &str) {
        if self.pending.get(party).map_or(false, |p| p.is_empty()) {
            self.pending.remove(party);
        }
    }

    /// Files a request to delegate `amount` from `party` to `node` at epoch end.
    pub fn delegate(
        &mut self,
        ctx: &DelegationContext<'_>,
        party: &str,
        node: &str,
        amount: Amount,
    ) -> Result<(), DelegationError> {
        if !ctx.topology.is_validator_node(node) {
            return Err(DelegationError::InvalidNodeId);
        }
        let balance = ctx
            .staking
            .balance_now(party)
            .map_err(|_| DelegationError::PartyHasNoStakingAccount)?;
        let min_amount = read_amount(ctx.params, DELEGATION_MIN_AMOUNT)?;
        if amount < min_amount {
            return Err(DelegationError::AmountLtMinAmountForDelegation);
        }

        let (pending_delegation, pending_undelegation) = self
            .pending
            .get(party)
            .map(|p| (p.total_delegation, p.total_undelegation))
            .unwrap_or((0, 0));
        let available = balance
            .saturating_add(pending_undelegation)
            .saturating_sub(self.committed.party_total(party).saturating_add(pending_delegation));
        if amount > available {
            return Err(DelegationError::InsufficientBalanceForDelegation);
        }

        self.pending
            .entry(party.to_string())
            .or_default()
            .add_delegation(node, amount);
        self.prune_pending(party);
        debug!(party, node, amount = %amount, "delegation request accepted");
        Ok(())
    }

    /// Files a request to undelegate `amount` from `node` at epoch end.
    ///
    /// An `amount` of zero undelegates everything committed or pending to the
    /// node, and is rejected once part of that is already queued for undelegation.
    pub fn undelegate_at_end_of_epoch(
        &mut self,
        ctx: &DelegationContext<'_>,
        party: &str,
        node: &str,
        amount: Amount,
    ) -> Result<(), DelegationError> {
        if !ctx.topology.is_validator_node(node) {
            return Err(DelegationError::InvalidNodeId);
        }
        let held = self
            .committed
            .amount(party, node)
            .saturating_add(self.pending_delegation(party, node));
        let undelegatable = held.saturating_sub(self.pending_undelegation(party, node));
        // "everything" means all that is held, so it cannot follow a partial request
        let amount = if amount == 0 { held } else { amount };
        if amount == 0 || amount > undelegatable {
            return Err(DelegationError::IncorrectTokenAmountForUndelegation);
        }

        self.pending
            .entry(party.to_string())
            .or_default()
            .add_undelegation(node, amount);
        self.prune_pending(party);
        self.auto_delegation.remove(party);
        debug!(party, node, amount = %amount, "undelegation request accepted");
        Ok(())
    }

    /// Undelegates `amount` from `node` immediately.
    ///
    /// Pending delegation to the node is withdrawn first, then committed
    /// delegation. An `amount` of zero removes both entirely.
    pub fn undelegate_now(
        &mut self,
        ctx: &DelegationContext<'_>,
        party: &str,
        node: &str,
        amount: Amount,
    ) -> Result<(), DelegationError> {
        if !ctx.topology.is_validator_node(node) {
            return Err(DelegationError::InvalidNodeId);
        }
        let committed = self.committed.verify_pair(party, node)?;
        let pending = self.pending_delegation(party, node);
        let available = committed.saturating_add(pending);
        let amount = if amount == 0 { available } else { amount };
        if amount == 0 || amount > available {
            return Err(DelegationError::IncorrectTokenAmountForUndelegation);
        }

        let from_pending = match self.pending.get_mut(party) {
            Some(p) => p.take_delegation(node, amount),
            None => 0,
        };
        self.prune_pending(party);
        self.committed.decrease(party, node, amount - from_pending)?;
        self.auto_delegation.remove(party);
        debug!(
            party,
            node,
            amount = %amount,
            from_pending = %from_pending,
            "undelegated immediately"
        );
        Ok(())
    }

    /// Committed state per validator, sorted by node id.
    ///
    /// Every validator in the topology is listed, with zeros when nothing is
    /// delegated to it. A node delegating to itself is reported as self-stake.
    pub fn validator_data(&self, topology: &dyn ValidatorTopology) -> Vec<ValidatorData> {
        let mut nodes = topology.all_node_ids();
        nodes.sort();
        nodes.dedup();
        nodes
            .into_iter()
            .map(|node_id| {
                let mut data = ValidatorData {
                    node_id,
                    ..ValidatorData::default()
                };
                if let Some(delegation) = self.committed.node(&data.node_id) {
                    for (party, amount) in &delegation.party_to_amount {
                        if *party == data.node_id {
                            data.self_stake = *amount;
                        } else {
                            data.delegators.insert(party.clone(), *amount);
                        }
                    }
                    data.stake_by_delegators = delegation.total - data.self_stake;
                }
                data
            })
            .collect()
    }

    /// Closes `epoch` and returns the committed state to reward it with.
    ///
    /// Forced undelegation runs first, then the snapshot is taken, then the
    /// pending requests are applied and cleared.
    pub fn on_epoch_end(
        &mut self,
        ctx: &DelegationContext<'_>,
        epoch: &Epoch,
    ) -> Result<Vec<ValidatorData>, EngineFault> {
        let max_per_validator = read_amount(ctx.params, MAX_STAKE_PER_VALIDATOR)?;
        info!(epoch = epoch.seq, "processing delegation at epoch end");

        self.reconcile_with_stake(ctx, epoch.start_time, epoch.end_time)?;
        let snapshot = self.validator_data(ctx.topology);

        let auto_candidates = self.auto_delegation_candidates(ctx);
        self.process_pending(ctx, max_per_validator)?;
        self.process_auto_delegation(&auto_candidates, max_per_validator)?;
        self.refresh_auto_delegation_mode(ctx)?;
        Ok(snapshot)
    }

    // Sheds delegation that the party's lowest stake balance over the epoch no
    // longer covers, proportionally across its validators in node order.
    fn reconcile_with_stake(
        &mut self,
        ctx: &DelegationContext<'_>,
        from: u64,
        to: u64,
    ) -> Result<(), EngineFault> {
        let parties: Vec<(String, PartyDelegation)> = self
            .committed
            .parties()
            .map(|(party, delegation)| (party.clone(), delegation.clone()))
            .collect();

        for (party, delegation) in parties {
            let balance = match ctx.staking.balance_for_epoch(&party, from, to) {
                Ok(balance) => balance,
                Err(err) => {
                    error!(party = %party, error = %err, "failed to read epoch stake balance");
                    continue;
                }
            };
            if balance >= delegation.total {
                continue;
            }
            let shortfall = delegation.total - balance;
            let mut taken: Amount = 0;
            for (node, amount) in &delegation.node_to_amount {
                let share = prorate(*amount, shortfall, delegation.total)?;
                taken += self.committed.decrease(&party, node, share)?;
            }
            while taken < shortfall {
                let before = taken;
                for node in delegation.node_to_amount.keys() {
                    if taken == shortfall {
                        break;
                    }
                    taken += self.committed.decrease(&party, node, 1)?;
                }
                if taken == before {
                    break;
                }
            }
            self.auto_delegation.remove(&party);
            info!(party = %party, shortfall = %shortfall, "forced undelegation");
        }
        Ok(())
    }

    fn process_pending(
        &mut self,
        ctx: &DelegationContext<'_>,
        max_per_validator: Amount,
    ) -> Result<(), EngineFault> {
        let pending = std::mem::take(&mut self.pending);

        for (party, requests) in &pending {
            for (node, amount) in &requests.node_to_undelegate {
                let removed = self.committed.decrease(party, node, *amount)?;
                if removed < *amount {
                    debug!(
                        party = %party,
                        node = %node,
                        requested = %amount,
                        removed = %removed,
                        "undelegation clamped to committed amount"
                    );
                }
            }
            if !requests.node_to_undelegate.is_empty() {
                self.auto_delegation.remove(party);
            }
        }

        for (party, requests) in &pending {
            if requests.node_to_delegate.is_empty() {
                continue;
            }
            let balance = match ctx.staking.balance_now(party) {
                Ok(balance) => balance,
                Err(err) => {
                    error!(party = %party, error = %err, "failed to read stake balance");
                    continue;
                }
            };
            let committed = self.committed.party_total(party);
            if balance < committed {
                warn!(
                    party = %party,
                    balance = %balance,
                    committed = %committed,
                    "stake balance below committed delegation"
                );
                continue;
            }
            let mut available = balance - committed;
            for (node, requested) in &requests.node_to_delegate {
                let mut amount = *requested;
                if max_per_validator > 0 {
                    let room = max_per_validator.saturating_sub(self.committed.node_total(node));
                    amount = amount.min(room);
                }
                if amount == 0 || amount > available {
                    debug!(
                        party = %party,
                        node = %node,
                        amount = %amount,
                        available = %available,
                        "pending delegation skipped"
                    );
                    continue;
                }
                self.committed.increase(party, node, amount);
                available -= amount;
            }
        }
        Ok(())
    }

    // Parties in auto mode that filed nothing this epoch and hold undelegated stake.
    fn auto_delegation_candidates(&self, ctx: &DelegationContext<'_>) -> BTreeMap<String, Amount> {
        let mut candidates = BTreeMap::new();
        for party in &self.auto_delegation {
            if self.pending.contains_key(party) {
                continue;
            }
            let committed = self.committed.party_total(party);
            if committed == 0 {
                continue;
            }
            if let Ok(balance) = ctx.staking.balance_now(party) {
                if balance > committed {
                    candidates.insert(party.clone(), balance - committed);
                }
            }
        }
        candidates
    }

    fn process_auto_delegation(
        &mut self,
        candidates: &BTreeMap<String, Amount>,
        max_per_validator: Amount,
    ) -> Result<(), EngineFault> {
        for (party, available) in candidates {
            let Some(delegation) = self.committed.party(party).cloned() else {
                continue;
            };
            for (node, amount) in &delegation.node_to_amount {
                let mut share = prorate(*available, *amount, delegation.total)?;
                if max_per_validator > 0 {
                    let room = max_per_validator.saturating_sub(self.committed.node_total(node));
                    share = share.min(room);
                }
                if share > 0 {
                    self.committed.increase(party, node, share);
                }
            }
            debug!(party = %party, available = %available, "auto-delegated new stake");
        }
        Ok(())
    }

    fn refresh_auto_delegation_mode(
        &mut self,
        ctx: &DelegationContext<'_>,
    ) -> Result<(), EngineFault> {
        let parties: Vec<(String, Amount)> = self
            .committed
            .parties()
            .filter(|(party, _)| !self.auto_delegation.contains(*party))
            .map(|(party, d)| (party.clone(), d.total))
            .collect();
        for (party, committed) in parties {
            let Ok(balance) = ctx.staking.balance_now(&party) else {
                continue;
            };
            if balance == 0 {
                continue;
            }
            if to_decimal(committed)? / to_decimal(balance)? >= AUTO_DELEGATION_RATIO {
                debug!(party = %party, "entered auto-delegation mode");
                self.auto_delegation.insert(party);
            }
        }
        Ok(())
    }

    /// Serialisable snapshot of the full engine state.
    pub fn checkpoint(&self) -> DelegationCheckpoint {
        let active = self
            .committed
            .parties()
            .flat_map(|(party, delegation)| {
                delegation
                    .node_to_amount
                    .iter()
                    .map(move |(node, amount)| DelegationEntry {
                        party: party.clone(),
                        node: node.clone(),
                        amount: *amount,
                        epoch_seq: self.epoch_seq,
                    })
            })
            .collect();

        let pending_entries = |kind: PendingKind| {
            self.pending.iter().flat_map(move |(party, requests)| {
                let map = match kind {
                    PendingKind::Delegate => &requests.node_to_delegate,
                    PendingKind::Undelegate => &requests.node_to_undelegate,
                };
                map.iter().map(move |(node, amount)| PendingEntry {
                    party: party.clone(),
                    node: node.clone(),
                    amount: *amount,
                    kind,
                    epoch_seq: self.epoch_seq,
                })
            })
        };
        let pending = pending_entries(PendingKind::Delegate)
            .chain(pending_entries(PendingKind::Undelegate))
            .collect();

        DelegationCheckpoint {
            epoch_seq: self.epoch_seq,
            active,
            pending,
            auto_delegation: self.auto_delegation.iter().cloned().collect(),
        }
    }

    /// Replaces the engine state with `checkpoint`.
    pub fn load(&mut self, checkpoint: &DelegationCheckpoint) -> Result<(), EngineFault> {
        let mut committed = CommittedBook::default();
        for entry in &checkpoint.active {
            committed.increase(&entry.party, &entry.node, entry.amount);
        }
        committed.check_consistency()?;

        let mut pending: BTreeMap<String, PendingPartyDelegation> = BTreeMap::new();
        for entry in &checkpoint.pending {
            let requests = pending.entry(entry.party.clone()).or_default();
            match entry.kind {
                PendingKind::Delegate => requests.add_delegation(&entry.node, entry.amount),
                PendingKind::Undelegate => requests.add_undelegation(&entry.node, entry.amount),
            }
        }
        pending.retain(|_, requests| !requests.is_empty());

        self.epoch_seq = checkpoint.epoch_seq;
        self.committed = committed;
        self.pending = pending;
        self.auto_delegation = checkpoint.auto_delegation.iter().cloned().collect();
        info!(
            epoch = self.epoch_seq,
            entries = checkpoint.active.len(),
            "delegation state restored"
        );
        Ok(())
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.committed.check_consistency(), Ok(()));
        for (party, requests) in &self.pending {
            assert!(!requests.is_empty(), "empty pending entry kept for {party}");
            let delegated: Amount = requests.node_to_delegate.values().sum();
            let undelegated: Amount = requests.node_to_undelegate.values().sum();
            assert_eq!(requests.total_delegation, delegated);
            assert_eq!(requests.total_undelegation, undelegated);
            for node in requests.node_to_delegate.keys() {
                assert_eq!(requests.undelegation_from(node), 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netparams::StaticNetParams;
    use crate::staking::StakeLedger;
    use crate::topology::ValidatorSet;
    use proptest::prelude::*;

    struct Fixture {
        staking: StakeLedger,
        topology: ValidatorSet,
        params: StaticNetParams,
    }

    impl Fixture {
        fn new() -> Self {
            let mut params = StaticNetParams::with_defaults();
            params.set(DELEGATION_MIN_AMOUNT, "2");
            Self {
                staking: StakeLedger::default(),
                topology: ValidatorSet::new(["node1", "node2", "node3"]),
                params,
            }
        }

        fn ctx(&self) -> DelegationContext<'_> {
            DelegationContext {
                staking: &self.staking,
                topology: &self.topology,
                params: &self.params,
            }
        }

        fn fund(&mut self, party: &str, time: u64, balance: Amount) {
            self.staking.set_balance(party, time, balance).unwrap();
        }
    }

    fn epoch(seq: u64) -> Epoch {
        Epoch {
            seq,
            start_time: seq * 100,
            end_time: seq * 100 + 99,
        }
    }

    fn commit(
        engine: &mut DelegationEngine,
        fx: &Fixture,
        party: &str,
        node: &str,
        amount: Amount,
    ) {
        engine.delegate(&fx.ctx(), party, node, amount).unwrap();
        engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();
    }

    #[test]
    fn delegate_validates_and_records_pending() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();

        engine.delegate(&fx.ctx(), "party1", "node1", 10).unwrap();
        assert_eq!(engine.pending_for("party1").unwrap().total_delegation, 10);
        assert_eq!(
            engine.delegate(&fx.ctx(), "party1", "node1", 11),
            Err(DelegationError::InsufficientBalanceForDelegation)
        );
        assert_eq!(engine.pending_for("party1").unwrap().total_delegation, 10);
    }

    #[test]
    fn delegate_rejections_leave_state_untouched() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();

        assert_eq!(
            engine.delegate(&fx.ctx(), "party1", "node9", 5),
            Err(DelegationError::InvalidNodeId)
        );
        assert_eq!(
            engine.delegate(&fx.ctx(), "ghost", "node1", 5),
            Err(DelegationError::PartyHasNoStakingAccount)
        );
        assert_eq!(
            engine.delegate(&fx.ctx(), "party1", "node1", 1),
            Err(DelegationError::AmountLtMinAmountForDelegation)
        );
        assert!(engine.pending_for("party1").is_none());
        assert_eq!(engine.checkpoint(), DelegationCheckpoint::default());
    }

    #[test]
    fn unparsable_min_amount_is_a_fault() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        fx.params.set(DELEGATION_MIN_AMOUNT, "lots");
        let mut engine = DelegationEngine::new();
        assert!(matches!(
            engine.delegate(&fx.ctx(), "party1", "node1", 5),
            Err(DelegationError::Fault(EngineFault::InvalidNetParam { .. }))
        ));
    }

    #[test]
    fn pending_undelegation_frees_balance_for_delegation() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 10);

        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 4)
            .unwrap();
        engine.delegate(&fx.ctx(), "party1", "node2", 4).unwrap();
        assert_eq!(
            engine.delegate(&fx.ctx(), "party1", "node2", 2),
            Err(DelegationError::InsufficientBalanceForDelegation)
        );
        engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();
        assert_eq!(engine.party_delegation("party1").unwrap().node_to_amount["node1"], 6);
        assert_eq!(engine.party_delegation("party1").unwrap().node_to_amount["node2"], 4);
        engine.check_invariants();
    }

    #[test]
    fn delegate_then_undelegate_same_amount_cancels() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party1", "node1", 7).unwrap();
        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 7)
            .unwrap();
        assert!(engine.pending_for("party1").is_none());
    }

    #[test]
    fn undelegate_rejects_amounts_beyond_holdings() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 5);
        engine.delegate(&fx.ctx(), "party1", "node1", 3).unwrap();

        assert_eq!(
            engine.undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 9),
            Err(DelegationError::IncorrectTokenAmountForUndelegation)
        );
        assert_eq!(
            engine.undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node2", 0),
            Err(DelegationError::IncorrectTokenAmountForUndelegation)
        );
        assert_eq!(
            engine.undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node7", 1),
            Err(DelegationError::InvalidNodeId)
        );
    }

    #[test]
    fn undelegate_zero_removes_everything_at_epoch_end() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 5);
        engine.delegate(&fx.ctx(), "party1", "node1", 3).unwrap();

        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 0)
            .unwrap();
        let pending = engine.pending_for("party1").unwrap();
        assert_eq!(pending.delegation_to("node1"), 0);
        assert_eq!(pending.undelegation_from("node1"), 5);

        engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();
        assert!(engine.party_delegation("party1").is_none());
        assert!(engine.pending_for("party1").is_none());
    }

    #[test]
    fn undelegate_everything_after_partial_request_is_rejected() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 10);

        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 4)
            .unwrap();
        assert_eq!(
            engine.undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 0),
            Err(DelegationError::IncorrectTokenAmountForUndelegation)
        );
        // the remainder can still be named explicitly
        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 6)
            .unwrap();
        assert_eq!(engine.pending_for("party1").unwrap().undelegation_from("node1"), 10);
    }

    #[test]
    fn undelegate_now_takes_pending_before_committed() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 5);
        engine.delegate(&fx.ctx(), "party1", "node1", 3).unwrap();

        engine.undelegate_now(&fx.ctx(), "party1", "node1", 4).unwrap();
        assert!(engine.pending_for("party1").is_none());
        assert_eq!(engine.party_delegation("party1").unwrap().total, 4);

        engine.undelegate_now(&fx.ctx(), "party1", "node1", 0).unwrap();
        assert!(engine.party_delegation("party1").is_none());
        assert!(engine.validator_delegation("node1").is_none());
        assert_eq!(
            engine.undelegate_now(&fx.ctx(), "party1", "node1", 0),
            Err(DelegationError::IncorrectTokenAmountForUndelegation)
        );
    }

    #[test]
    fn forced_undelegation_sheds_shortfall_proportionally() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party1", "node1", 6).unwrap();
        engine.delegate(&fx.ctx(), "party1", "node2", 4).unwrap();
        engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();

        fx.fund("party1", 150, 2);
        let snapshot = engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();

        // floor(6*8/10) = 4 and floor(4*8/10) = 3, then one more unit from node1
        let delegation = engine.party_delegation("party1").unwrap();
        assert_eq!(delegation.total, 2);
        assert_eq!(delegation.node_to_amount["node1"], 1);
        assert_eq!(delegation.node_to_amount["node2"], 1);
        assert_eq!(snapshot[0].delegators["party1"], 1);
        assert_eq!(snapshot[1].delegators["party1"], 1);
        engine.check_invariants();
    }

    #[test]
    fn forced_undelegation_leaves_auto_delegation_mode() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 10);
        assert!(engine.is_auto_delegating("party1"));

        // stake dips inside the epoch and recovers before it ends
        fx.fund("party1", 120, 2);
        fx.fund("party1", 150, 10);
        engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();

        assert_eq!(engine.party_delegation("party1").unwrap().total, 2);
        assert!(!engine.is_auto_delegating("party1"));
        engine.check_invariants();
    }

    #[test]
    fn snapshot_is_taken_before_pending_requests_apply() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        fx.fund("node2", 0, 50);
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party1", "node1", 10).unwrap();
        engine.delegate(&fx.ctx(), "node2", "node2", 50).unwrap();

        let snapshot = engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();
        assert!(snapshot.iter().all(|v| v.total_stake() == 0));
        assert_eq!(snapshot.len(), 3);

        let snapshot = engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();
        assert_eq!(snapshot[0].node_id, "node1");
        assert_eq!(snapshot[0].stake_by_delegators, 10);
        assert_eq!(snapshot[1].self_stake, 50);
        assert_eq!(snapshot[1].stake_by_delegators, 0);
        assert!(snapshot[1].delegators.is_empty());
    }

    #[test]
    fn pending_delegation_respects_validator_cap_and_rechecked_balance() {
        let mut fx = Fixture::new();
        fx.params.set(MAX_STAKE_PER_VALIDATOR, "8");
        fx.fund("party1", 0, 10);
        fx.fund("party2", 0, 10);
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party1", "node1", 10).unwrap();
        engine.delegate(&fx.ctx(), "party2", "node1", 5).unwrap();
        engine.delegate(&fx.ctx(), "party2", "node2", 5).unwrap();
        fx.fund("party2", 50, 6);

        engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();
        assert_eq!(engine.validator_delegation("node1").unwrap().total, 8);
        assert_eq!(engine.party_delegation("party1").unwrap().total, 8);
        // node1 is full, node2 fits within the rechecked balance of 6
        assert_eq!(engine.party_delegation("party2").unwrap().total, 5);
        assert!(engine.pending_for("party1").is_none());
    }

    #[test]
    fn pending_undelegation_is_clamped_to_committed() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 10);
        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 8)
            .unwrap();
        fx.fund("party1", 150, 5);

        engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();
        assert!(engine.party_delegation("party1").is_none());
        engine.check_invariants();
    }

    #[test]
    fn processing_empty_pending_is_a_noop() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        commit(&mut engine, &fx, "party1", "node1", 4);
        let before = engine.checkpoint();
        engine.process_pending(&fx.ctx(), 0).unwrap();
        assert_eq!(engine.checkpoint(), before);
    }

    #[test]
    fn auto_delegation_follows_new_stake() {
        let mut fx = Fixture::new();
        fx.fund("party1", 0, 10);
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party1", "node1", 6).unwrap();
        engine.delegate(&fx.ctx(), "party1", "node2", 4).unwrap();
        engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();
        assert!(engine.is_auto_delegating("party1"));

        fx.fund("party1", 150, 20);
        engine.on_epoch_end(&fx.ctx(), &epoch(1)).unwrap();
        let delegation = engine.party_delegation("party1").unwrap();
        assert_eq!(delegation.node_to_amount["node1"], 12);
        assert_eq!(delegation.node_to_amount["node2"], 8);

        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node2", 2)
            .unwrap();
        assert!(!engine.is_auto_delegating("party1"));
    }

    #[test]
    fn checkpoint_is_sorted_and_round_trips() {
        let mut fx = Fixture::new();
        for party in ["party2", "party1"] {
            fx.fund(party, 0, 100);
        }
        let mut engine = DelegationEngine::new();
        engine.delegate(&fx.ctx(), "party2", "node2", 10).unwrap();
        engine.delegate(&fx.ctx(), "party1", "node3", 10).unwrap();
        engine.delegate(&fx.ctx(), "party1", "node1", 10).unwrap();
        engine.on_epoch_end(&fx.ctx(), &epoch(0)).unwrap();
        engine
            .undelegate_at_end_of_epoch(&fx.ctx(), "party1", "node1", 5)
            .unwrap();
        engine.delegate(&fx.ctx(), "party2", "node1", 5).unwrap();

        let checkpoint = engine.checkpoint();
        let active: Vec<(&str, &str)> = checkpoint
            .active
            .iter()
            .map(|e| (e.party.as_str(), e.node.as_str()))
            .collect();
        assert_eq!(
            active,
            vec![("party1", "node1"), ("party1", "node3"), ("party2", "node2")]
        );
        assert_eq!(checkpoint.pending[0].kind, PendingKind::Delegate);
        assert_eq!(checkpoint.pending[1].kind, PendingKind::Undelegate);

        let mut restored = DelegationEngine::new();
        restored.load(&checkpoint).unwrap();
        assert_eq!(
            restored.checkpoint().to_bytes().unwrap(),
            checkpoint.to_bytes().unwrap()
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Delegate(usize, usize, Amount),
        Undelegate(usize, usize, Amount),
        UndelegateNow(usize, usize, Amount),
        Restake(usize, Amount),
        EndEpoch,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 0..3usize, 0..40u128).prop_map(|(p, n, a)| Op::Delegate(p, n, a)),
            (0..3usize, 0..3usize, 0..40u128).prop_map(|(p, n, a)| Op::Undelegate(p, n, a)),
            (0..3usize, 0..3usize, 0..40u128).prop_map(|(p, n, a)| Op::UndelegateNow(p, n, a)),
            (0..3usize, 0..100u128).prop_map(|(p, a)| Op::Restake(p, a)),
            Just(Op::EndEpoch),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_over_random_histories(ops in proptest::collection::vec(op(), 1..60)) {
            let parties = ["party1", "party2", "party3"];
            let nodes = ["node1", "node2", "node3"];
            let mut fx = Fixture::new();
            for party in parties {
                fx.fund(party, 0, 50);
            }
            let mut engine = DelegationEngine::new();
            let mut seq = 0u64;
            for op in ops {
                match op {
                    Op::Delegate(p, n, a) => {
                        let _ = engine.delegate(&fx.ctx(), parties[p], nodes[n], a);
                    }
                    Op::Undelegate(p, n, a) => {
                        let _ = engine.undelegate_at_end_of_epoch(&fx.ctx(), parties[p], nodes[n], a);
                    }
                    Op::UndelegateNow(p, n, a) => {
                        let _ = engine.undelegate_now(&fx.ctx(), parties[p], nodes[n], a);
                    }
                    Op::Restake(p, a) => fx.fund(parties[p], seq * 100 + 50, a),
                    Op::EndEpoch => {
                        let before: BTreeMap<&str, Amount> = parties
                            .iter()
                            .map(|p| (*p, engine.committed.party_total(p)))
                            .collect();
                        engine.reconcile_with_stake(&fx.ctx(), seq * 100, seq * 100 + 99).unwrap();
                        for party in parties {
                            let floor = fx.staking.balance_for_epoch(party, seq * 100, seq * 100 + 99).unwrap();
                            let after = engine.committed.party_total(party);
                            prop_assert_eq!(after, before[party].min(floor));
                        }
                        engine.on_epoch_end(&fx.ctx(), &epoch(seq)).unwrap();
                        prop_assert!(engine.pending.is_empty());
                        seq += 1;
                    }
                }
                engine.check_invariants();
            }
        }
    }
}
