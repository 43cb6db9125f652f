//! Fee schedule with delayed activation.
//!
//! Fee changes never take effect immediately: they are queued with an
//! effective timestamp one epoch out, and committed by a separate call once
//! that timestamp passes. Re-queuing a kind overwrites its pending change.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, FeeRate};
use crate::{Result, VaultError};

/// The three scheduled fee knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeeKind {
    /// Cut taken off every reward arrival before the snapshot/futures split.
    Reward,
    /// Redemption fee at zero wait.
    RedemptionMax,
    /// Redemption fee at the maximum wait.
    RedemptionMin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PendingChange {
    rate: FeeRate,
    effective: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeScheduler {
    active: BTreeMap<FeeKind, FeeRate>,
    pending: BTreeMap<FeeKind, PendingChange>,
    /// Hard cap on any queued rate.
    max_fee: FeeRate,
}

impl FeeScheduler {
    pub fn new(
        reward: FeeRate,
        redemption_max: FeeRate,
        redemption_min: FeeRate,
        max_fee: FeeRate,
    ) -> Result<Self> {
        let mut active = BTreeMap::new();
        active.insert(FeeKind::Reward, reward);
        active.insert(FeeKind::RedemptionMax, redemption_max);
        active.insert(FeeKind::RedemptionMin, redemption_min);
        for &rate in active.values() {
            Self::check_cap(rate, max_fee)?;
        }
        if redemption_min > redemption_max {
            return Err(VaultError::InvalidInput(
                "redemption fee min exceeds max".into(),
            ));
        }
        Ok(Self {
            active,
            pending: BTreeMap::new(),
            max_fee,
        })
    }

    pub fn rate(&self, kind: FeeKind) -> FeeRate {
        self.active.get(&kind).copied().unwrap_or(FeeRate::ZERO)
    }

    /// The pending change for `kind`, if any, as (rate, effective timestamp).
    pub fn pending(&self, kind: FeeKind) -> Option<(FeeRate, u64)> {
        self.pending.get(&kind).map(|p| (p.rate, p.effective))
    }

    /// Queues a change to `kind`, effective at `now + delay`.
    ///
    /// Overwrites any earlier pending change for the same kind, restarting
    /// its delay.
    pub fn queue_change(
        &mut self,
        kind: FeeKind,
        rate: FeeRate,
        now: u64,
        delay: u64,
    ) -> Result<u64> {
        Self::check_cap(rate, self.max_fee)?;
        let effective = add_u64(now, delay)?;
        self.pending.insert(kind, PendingChange { rate, effective });
        Ok(effective)
    }

    /// Commits the pending change for `kind` once its delay has elapsed.
    ///
    /// Preconditions:
    /// - a change is pending (else `InvalidInput`).
    /// - `now >= effective` (else `BeforeEffectiveTimestamp`).
    /// - the resulting schedule keeps `RedemptionMin <= RedemptionMax`.
    pub fn apply(&mut self, kind: FeeKind, now: u64) -> Result<FeeRate> {
        let change = self
            .pending
            .get(&kind)
            .copied()
            .ok_or_else(|| VaultError::InvalidInput("no pending fee change".into()))?;
        if now < change.effective {
            return Err(VaultError::BeforeEffectiveTimestamp {
                effective: change.effective,
                now,
            });
        }
        let (min, max) = match kind {
            FeeKind::Reward => (self.rate(FeeKind::RedemptionMin), self.rate(FeeKind::RedemptionMax)),
            FeeKind::RedemptionMax => (self.rate(FeeKind::RedemptionMin), change.rate),
            FeeKind::RedemptionMin => (change.rate, self.rate(FeeKind::RedemptionMax)),
        };
        if min > max {
            return Err(VaultError::InvalidInput(
                "redemption fee min exceeds max".into(),
            ));
        }
        self.pending.remove(&kind);
        self.active.insert(kind, change.rate);
        Ok(change.rate)
    }

    fn check_cap(rate: FeeRate, max_fee: FeeRate) -> Result<()> {
        if rate > max_fee {
            return Err(VaultError::InvalidFeeRate {
                rate: rate.as_u64(),
                max: max_fee.as_u64(),
            });
        }
        Ok(())
    }
}
