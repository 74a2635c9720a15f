//! In-memory collateral ledger holding general accounts and reward pools.

use crate::num::Amount;
use crate::providers::Collateral;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, path::Path};
use thiserror::Error;
use tracing::debug;

/// Market placeholder for accounts that are not tied to a market.
pub const NO_MARKET: &str = "!";

/// Account categories known to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    /// Spendable party balance.
    General,
    /// Global staking reward pool.
    GlobalReward,
    /// Infrastructure fee pool paid to validators and delegators.
    FeesInfrastructure,
    /// Maker fee reward pool paid by fee contribution.
    MakerFeeReward,
    /// Market proposer bonus pool.
    MarketProposerReward,
}

/// Reward pool kinds in the order they are processed at epoch end.
pub const REWARD_ACCOUNT_KINDS: [AccountKind; 4] = [
    AccountKind::GlobalReward,
    AccountKind::FeesInfrastructure,
    AccountKind::MakerFeeReward,
    AccountKind::MarketProposerReward,
];

impl AccountKind {
    /// Stable lowercase tag used in account ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::General => "general",
            AccountKind::GlobalReward => "global_reward",
            AccountKind::FeesInfrastructure => "fees_infrastructure",
            AccountKind::MakerFeeReward => "maker_fee_reward",
            AccountKind::MarketProposerReward => "market_proposer_reward",
        }
    }

    /// Whether the kind is a reward pool.
    pub fn is_reward(&self) -> bool {
        !matches!(self, AccountKind::General)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account id.
    pub id: String,
    /// Owning party; empty for reward pools.
    pub owner: String,
    /// Asset held by the account.
    pub asset: String,
    /// Market the account belongs to, or [`NO_MARKET`].
    pub market: String,
    /// Account category.
    pub kind: AccountKind,
    /// Current balance.
    pub balance: Amount,
}

/// One leg of a reward payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Receiving party.
    pub owner: String,
    /// Asset moved.
    pub asset: String,
    /// Amount moved.
    pub amount: Amount,
}

/// Ledger movement produced by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    /// Debited account id.
    pub from: String,
    /// Credited account id.
    pub to: String,
    /// Amount moved.
    pub amount: Amount,
    /// Balance of the credited account after the move.
    pub to_balance: Amount,
}

/// Errors raised by the collateral ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollateralError {
    #[error("account {0} does not exist")]
    /// The addressed account is unknown.
    UnknownAccount(String),
    #[error("account {0} is not a reward account")]
    /// Payouts can only leave reward pools.
    NotRewardAccount(String),
    #[error("transfer asset {transfer} does not match account asset {account}")]
    /// A transfer names a different asset than its source pool.
    AssetMismatch {
        /// Asset of the source account.
        account: String,
        /// Asset named by the transfer.
        transfer: String,
    },
    #[error("insufficient balance in {account}: requested {requested}, available {available}")]
    /// The source pool cannot cover the batch.
    InsufficientBalance {
        /// Source account id.
        account: String,
        /// Total requested.
        requested: Amount,
        /// Balance available.
        available: Amount,
    },
    #[error("io error: {0}")]
    /// Underlying filesystem or encoding failure.
    Io(String),
}

/// Account store keyed by account id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralLedger {
    accounts: BTreeMap<String, Account>,
}

impl CollateralLedger {
    /// Load from JSON; missing file -> empty ledger.
    pub fn load(path: &Path) -> Result<Self, CollateralError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|e| CollateralError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CollateralError::Io(e.to_string()))
    }

    /// Persist to JSON.
    pub fn save(&self, path: &Path) -> Result<(), CollateralError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CollateralError::Io(e.to_string()))?;
        }
        let data =
            serde_json::to_vec_pretty(self).map_err(|e| CollateralError::Io(e.to_string()))?;
        fs::write(path, data).map_err(|e| CollateralError::Io(e.to_string()))
    }

    /// Id of the reward pool of `kind` for `asset` in `market`.
    pub fn reward_account_id(kind: AccountKind, asset: &str, market: &str) -> String {
        format!("{kind}/{asset}/{market}")
    }

    /// Id of the general account of `owner` in `asset`.
    pub fn general_account_id(owner: &str, asset: &str) -> String {
        format!("general/{owner}/{asset}")
    }

    /// Returns the reward pool id, creating the pool if needed.
    pub fn ensure_reward_account(
        &mut self,
        kind: AccountKind,
        asset: &str,
        market: &str,
    ) -> Result<String, CollateralError> {
        let id = Self::reward_account_id(kind, asset, market);
        if !kind.is_reward() {
            return Err(CollateralError::NotRewardAccount(id));
        }
        self.accounts.entry(id.clone()).or_insert_with(|| Account {
            id: id.clone(),
            owner: String::new(),
            asset: asset.to_string(),
            market: market.to_string(),
            kind,
            balance: 0,
        });
        Ok(id)
    }

    /// Returns the general account id, creating the account if needed.
    pub fn ensure_general_account(&mut self, owner: &str, asset: &str) -> String {
        let id = Self::general_account_id(owner, asset);
        self.accounts.entry(id.clone()).or_insert_with(|| Account {
            id: id.clone(),
            owner: owner.to_string(),
            asset: asset.to_string(),
            market: NO_MARKET.to_string(),
            kind: AccountKind::General,
            balance: 0,
        });
        id
    }

    /// Credits `amount` to account `id`.
    pub fn increment_balance(&mut self, id: &str, amount: Amount) -> Result<(), CollateralError> {
        let account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| CollateralError::UnknownAccount(id.to_string()))?;
        account.balance = account.balance.saturating_add(amount);
        Ok(())
    }

    /// General balance of `owner` in `asset`, zero when absent.
    pub fn general_balance(&self, owner: &str, asset: &str) -> Amount {
        self.accounts
            .get(&Self::general_account_id(owner, asset))
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    /// Account `id`, if present.
    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }
}

impl Collateral for CollateralLedger {
    fn reward_accounts(&self, kind: AccountKind) -> Vec<Account> {
        self.accounts
            .values()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }

    fn balance(&self, id: &str) -> Result<Amount, CollateralError> {
        self.accounts
            .get(id)
            .map(|a| a.balance)
            .ok_or_else(|| CollateralError::UnknownAccount(id.to_string()))
    }

    fn transfer_rewards(
        &mut self,
        from: &str,
        transfers: &[Transfer],
    ) -> Result<Vec<TransferResponse>, CollateralError> {
        let source = self
            .accounts
            .get(from)
            .ok_or_else(|| CollateralError::UnknownAccount(from.to_string()))?;
        if !source.kind.is_reward() {
            return Err(CollateralError::NotRewardAccount(from.to_string()));
        }
        let asset = source.asset.clone();
        let available = source.balance;
        let mut requested: Amount = 0;
        for transfer in transfers {
            if transfer.asset != asset {
                return Err(CollateralError::AssetMismatch {
                    account: asset,
                    transfer: transfer.asset.clone(),
                });
            }
            requested = requested.saturating_add(transfer.amount);
        }
        if requested > available {
            return Err(CollateralError::InsufficientBalance {
                account: from.to_string(),
                requested,
                available,
            });
        }

        let mut responses = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            let to = self.ensure_general_account(&transfer.owner, &asset);
            if let Some(source) = self.accounts.get_mut(from) {
                source.balance -= transfer.amount;
            }
            let mut to_balance = 0;
            if let Some(target) = self.accounts.get_mut(&to) {
                target.balance = target.balance.saturating_add(transfer.amount);
                to_balance = target.balance;
            }
            debug!(from, to = %to, amount = %transfer.amount, "reward transfer");
            responses.push(TransferResponse {
                from: from.to_string(),
                to,
                amount: transfer.amount,
                to_balance,
            });
        }
        Ok(responses)
    }
}
