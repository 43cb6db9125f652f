//! Balance ledger with lazy historical checkpoints.
//!
//! A snapshot is just an id bump. Balances and total supply are checkpointed
//! on first write after the bump, so untouched accounts cost nothing. Queries
//! against a snapshot id binary-search the checkpoint list and fall back to
//! the live value when no checkpoint covers the id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, sub_u64};
use crate::{AccountId, Result, VaultError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Checkpoint {
    /// Snapshot id this value was current at.
    id: u64,
    value: u64,
}

/// Searches checkpoints for the value as of snapshot `id`.
///
/// Checkpoints are strictly increasing in id. The value at `id` is the first
/// checkpoint with `cp.id >= id`; if none exists the live value applies.
fn value_at(checkpoints: &[Checkpoint], id: u64) -> Option<u64> {
    let pos = checkpoints.partition_point(|cp| cp.id < id);
    checkpoints.get(pos).map(|cp| cp.value)
}

/// Fungible share ledger with point-in-time balance queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotLedger {
    balances: BTreeMap<AccountId, u64>,
    total_supply: u64,
    /// Most recently created snapshot id; 0 means no snapshot exists yet.
    current_id: u64,
    account_checkpoints: BTreeMap<AccountId, Vec<Checkpoint>>,
    supply_checkpoints: Vec<Checkpoint>,
}

impl SnapshotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: AccountId) -> u64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn current_snapshot_id(&self) -> u64 {
        self.current_id
    }

    /// Creates a new snapshot and returns its id (ids start at 1).
    ///
    /// Postconditions:
    /// - `balance_at(a, id)` for the returned id reflects every balance as of
    ///   this call, regardless of later mutation order.
    pub fn snapshot(&mut self) -> Result<u64> {
        self.current_id = add_u64(self.current_id, 1)?;
        Ok(self.current_id)
    }

    /// Balance of `account` as of snapshot `id`.
    pub fn balance_at(&self, account: AccountId, id: u64) -> Result<u64> {
        self.check_snapshot_id(id)?;
        let recorded = self
            .account_checkpoints
            .get(&account)
            .and_then(|cps| value_at(cps, id));
        Ok(recorded.unwrap_or_else(|| self.balance_of(account)))
    }

    /// Total supply as of snapshot `id`.
    pub fn total_supply_at(&self, id: u64) -> Result<u64> {
        self.check_snapshot_id(id)?;
        Ok(value_at(&self.supply_checkpoints, id).unwrap_or(self.total_supply))
    }

    pub fn mint(&mut self, to: AccountId, amount: u64) -> Result<()> {
        if to == AccountId::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        let new_balance = add_u64(self.balance_of(to), amount)?;
        let new_supply = add_u64(self.total_supply, amount)?;
        self.record_account(to);
        self.record_supply();
        self.balances.insert(to, new_balance);
        self.total_supply = new_supply;
        Ok(())
    }

    pub fn burn(&mut self, from: AccountId, amount: u64) -> Result<()> {
        let balance = self.balance_of(from);
        if amount > balance {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: balance,
            });
        }
        self.record_account(from);
        self.record_supply();
        if balance == amount {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, balance - amount);
        }
        self.total_supply = sub_u64(self.total_supply, amount)?;
        Ok(())
    }

    pub fn transfer(&mut self, from: AccountId, to: AccountId, amount: u64) -> Result<()> {
        if to == AccountId::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        let from_balance = self.balance_of(from);
        if amount > from_balance {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: from_balance,
            });
        }
        let to_balance = if from == to {
            from_balance
        } else {
            add_u64(self.balance_of(to), amount)?
        };
        self.record_account(from);
        self.record_account(to);
        if from == to {
            return Ok(());
        }
        if from_balance == amount {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, from_balance - amount);
        }
        self.balances.insert(to, to_balance);
        Ok(())
    }

    fn check_snapshot_id(&self, id: u64) -> Result<()> {
        if id == 0 || id > self.current_id {
            return Err(VaultError::UnknownSnapshotId(id));
        }
        Ok(())
    }

    /// Checkpoints `account`'s live balance if it has not yet been recorded
    /// under the current snapshot id. Must run before every balance write.
    fn record_account(&mut self, account: AccountId) {
        if self.current_id == 0 {
            return;
        }
        let value = self.balance_of(account);
        let cps = self.account_checkpoints.entry(account).or_default();
        if cps.last().map_or(true, |cp| cp.id < self.current_id) {
            cps.push(Checkpoint {
                id: self.current_id,
                value,
            });
        }
    }

    fn record_supply(&mut self) {
        if self.current_id == 0 {
            return;
        }
        if self
            .supply_checkpoints
            .last()
            .map_or(true, |cp| cp.id < self.current_id)
        {
            self.supply_checkpoints.push(Checkpoint {
                id: self.current_id,
                value: self.total_supply,
            });
        }
    }
}
