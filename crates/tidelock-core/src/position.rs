//! Multi-identifier position ledger.
//!
//! One ledger instance tracks one position family (reward futures, vote
//! futures, staked positions, pending redemptions). Identifiers are u64:
//! epoch starts for futures and staking, unlock timestamps for pending
//! redemptions. Balances are non-custodial bookkeeping; value flows happen
//! in the orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, sub_u64};
use crate::{AccountId, Result, VaultError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PositionLedger {
    balances: BTreeMap<u64, BTreeMap<AccountId, u64>>,
    supplies: BTreeMap<u64, u64>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: AccountId, id: u64) -> u64 {
        self.balances
            .get(&id)
            .and_then(|holders| holders.get(&account))
            .copied()
            .unwrap_or(0)
    }

    pub fn supply_of(&self, id: u64) -> u64 {
        self.supplies.get(&id).copied().unwrap_or(0)
    }

    /// Identifiers with nonzero supply, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.supplies.keys().copied()
    }

    pub fn mint(&mut self, to: AccountId, id: u64, amount: u64) -> Result<()> {
        if to == AccountId::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let new_balance = add_u64(self.balance_of(to, id), amount)?;
        let new_supply = add_u64(self.supply_of(id), amount)?;
        self.balances.entry(id).or_default().insert(to, new_balance);
        self.supplies.insert(id, new_supply);
        Ok(())
    }

    pub fn burn(&mut self, from: AccountId, id: u64, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let balance = self.balance_of(from, id);
        if amount > balance {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: balance,
            });
        }
        let new_supply = sub_u64(self.supply_of(id), amount)?;
        let holders = self
            .balances
            .get_mut(&id)
            .ok_or(VaultError::InsufficientBalance {
                requested: amount,
                available: 0,
            })?;
        if balance == amount {
            holders.remove(&from);
        } else {
            holders.insert(from, balance - amount);
        }
        if holders.is_empty() {
            self.balances.remove(&id);
        }
        if new_supply == 0 {
            self.supplies.remove(&id);
        } else {
            self.supplies.insert(id, new_supply);
        }
        Ok(())
    }

    /// Mints the same account across many identifiers, all-or-nothing.
    ///
    /// Preconditions:
    /// - `ids` and `amounts` are the same nonzero length.
    ///
    /// Postconditions:
    /// - On error nothing is minted (validation runs before any write).
    pub fn mint_batch(&mut self, to: AccountId, ids: &[u64], amounts: &[u64]) -> Result<()> {
        self.check_batch(ids, amounts)?;
        if to == AccountId::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        // Duplicate ids within a batch accumulate, so simulate sequentially.
        let mut staged: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
        for (&id, &amount) in ids.iter().zip(amounts) {
            if amount == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let (balance, supply) = staged
                .get(&id)
                .copied()
                .unwrap_or((self.balance_of(to, id), self.supply_of(id)));
            staged.insert(id, (add_u64(balance, amount)?, add_u64(supply, amount)?));
        }
        for (id, (balance, supply)) in staged {
            self.balances.entry(id).or_default().insert(to, balance);
            self.supplies.insert(id, supply);
        }
        Ok(())
    }

    /// Burns the same account across many identifiers, all-or-nothing.
    pub fn burn_batch(&mut self, from: AccountId, ids: &[u64], amounts: &[u64]) -> Result<()> {
        self.check_batch(ids, amounts)?;
        let mut staged: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
        for (&id, &amount) in ids.iter().zip(amounts) {
            if amount == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let (balance, supply) = staged
                .get(&id)
                .copied()
                .unwrap_or((self.balance_of(from, id), self.supply_of(id)));
            if amount > balance {
                return Err(VaultError::InsufficientBalance {
                    requested: amount,
                    available: balance,
                });
            }
            staged.insert(id, (balance - amount, sub_u64(supply, amount)?));
        }
        for (id, (balance, supply)) in staged {
            let holders = self.balances.entry(id).or_default();
            if balance == 0 {
                holders.remove(&from);
            } else {
                holders.insert(from, balance);
            }
            if holders.is_empty() {
                self.balances.remove(&id);
            }
            if supply == 0 {
                self.supplies.remove(&id);
            } else {
                self.supplies.insert(id, supply);
            }
        }
        Ok(())
    }

    fn check_batch(&self, ids: &[u64], amounts: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Err(VaultError::EmptyArray);
        }
        if ids.len() != amounts.len() {
            return Err(VaultError::MismatchedArrayLengths {
                left: ids.len(),
                right: amounts.len(),
            });
        }
        Ok(())
    }
}
