//! Runtime safety bounds.
//!
//! Operator-tunable limits with hard ceilings that configuration cannot
//! exceed. All checks fail closed.

use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

/// Redemption bitmasks are u128, so an epoch can never hold more rewards.
pub const HARD_MAX_REWARDS_PER_EPOCH: usize = 128;
pub const HARD_MAX_BATCH_LEN: usize = 1_024;
pub const HARD_MAX_UNLOCK_ENTRIES: usize = 4_096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeBounds {
    pub max_rewards_per_epoch: usize,
    pub max_batch_len: usize,
    pub max_unlock_entries: usize,
}

impl Default for RuntimeBounds {
    fn default() -> Self {
        Self {
            max_rewards_per_epoch: HARD_MAX_REWARDS_PER_EPOCH,
            max_batch_len: 64,
            max_unlock_entries: 256,
        }
    }
}

impl RuntimeBounds {
    pub fn validate(&self) -> Result<()> {
        if self.max_rewards_per_epoch == 0
            || self.max_rewards_per_epoch > HARD_MAX_REWARDS_PER_EPOCH
        {
            return Err(VaultError::BoundedValueExceeded(format!(
                "max_rewards_per_epoch: {} (hard max {HARD_MAX_REWARDS_PER_EPOCH})",
                self.max_rewards_per_epoch
            )));
        }
        if self.max_batch_len == 0 || self.max_batch_len > HARD_MAX_BATCH_LEN {
            return Err(VaultError::BoundedValueExceeded(format!(
                "max_batch_len: {} (hard max {HARD_MAX_BATCH_LEN})",
                self.max_batch_len
            )));
        }
        if self.max_unlock_entries == 0 || self.max_unlock_entries > HARD_MAX_UNLOCK_ENTRIES {
            return Err(VaultError::BoundedValueExceeded(format!(
                "max_unlock_entries: {} (hard max {HARD_MAX_UNLOCK_ENTRIES})",
                self.max_unlock_entries
            )));
        }
        Ok(())
    }

    pub fn check_batch_len(&self, len: usize) -> Result<()> {
        if len > self.max_batch_len {
            return Err(VaultError::BoundedValueExceeded(format!(
                "batch length: {len} > {}",
                self.max_batch_len
            )));
        }
        Ok(())
    }

    pub fn check_unlock_entries(&self, len: usize) -> Result<()> {
        if len > self.max_unlock_entries {
            return Err(VaultError::BoundedValueExceeded(format!(
                "unlock entries: {len} > {}",
                self.max_unlock_entries
            )));
        }
        Ok(())
    }
}
