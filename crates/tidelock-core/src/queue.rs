//! Redemption queue bounded by what the Locker can actually unlock.
//!
//! Each lock entry has an unlock timestamp; redemptions promised against that
//! timestamp may never exceed the entry's amount, so the protocol can always
//! honor completed redemptions from unlocked capital alone. Outstanding
//! promises also shield that capital from being re-locked.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, sub_u64};
use crate::{Result, VaultError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RedemptionQueue {
    /// Promised post-fee amounts keyed by unlock timestamp.
    promised: BTreeMap<u64, u64>,
    /// Sum of all promised amounts not yet completed.
    outstanding: u64,
}

impl RedemptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promised_at(&self, unlock_time: u64) -> u64 {
        self.promised.get(&unlock_time).copied().unwrap_or(0)
    }

    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    /// Promises `amount` against the lock entry maturing at `unlock_time`.
    ///
    /// Preconditions:
    /// - `unlockable` is the total amount of the lock entry at `unlock_time`.
    /// - existing promises plus `amount` must fit in `unlockable` (else
    ///   `InsufficientRedemptionAllowance`; fail-closed).
    pub fn initiate(&mut self, unlock_time: u64, amount: u64, unlockable: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let promised = add_u64(self.promised_at(unlock_time), amount)?;
        if promised > unlockable {
            return Err(VaultError::InsufficientRedemptionAllowance {
                unlock_time,
                promised,
                unlockable,
            });
        }
        let outstanding = add_u64(self.outstanding, amount)?;
        self.promised.insert(unlock_time, promised);
        self.outstanding = outstanding;
        Ok(())
    }

    /// Consumes `amount` of the promise at `unlock_time` once it has matured.
    pub fn complete(&mut self, now: u64, unlock_time: u64, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if unlock_time > now {
            return Err(VaultError::BeforeUnlock { unlock_time, now });
        }
        let promised = self.promised_at(unlock_time);
        if amount > promised {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available: promised,
            });
        }
        if promised == amount {
            self.promised.remove(&unlock_time);
        } else {
            self.promised.insert(unlock_time, promised - amount);
        }
        self.outstanding = sub_u64(self.outstanding, amount)?;
        Ok(())
    }
}
