//! Deterministic fixed-point helpers used everywhere money is computed.
//!
//! All ratios use u128 intermediates and floor division; truncation never
//! rounds in the depositor's favor. Overflow is a hard error, never a wrap.

use serde::{Deserialize, Serialize};

use crate::{EpochId, Result, VaultError};

/// Fee rates are expressed in parts per `FEE_DENOMINATOR`.
pub const FEE_DENOMINATOR: u64 = 1_000_000;

/// Fee rate in `[0, FEE_DENOMINATOR]` (correct-by-construction; the bound
/// holds through deserialization as well).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub struct FeeRate(u32);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);
    pub const MAX: FeeRate = FeeRate(FEE_DENOMINATOR as u32);

    /// Constructs a bounded fee rate.
    ///
    /// Preconditions:
    /// - `v <= FEE_DENOMINATOR` (else `InvalidFeeRate`; fail-closed).
    ///
    /// Postconditions:
    /// - `self.get()` is always in `[0, FEE_DENOMINATOR]` and can be used
    ///   without re-checking.
    pub fn new(v: u32) -> Result<FeeRate> {
        if (v as u64) <= FEE_DENOMINATOR {
            Ok(FeeRate(v))
        } else {
            Err(VaultError::InvalidFeeRate {
                rate: v as u64,
                max: FEE_DENOMINATOR,
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

impl From<FeeRate> for u32 {
    fn from(rate: FeeRate) -> u32 {
        rate.0
    }
}

impl TryFrom<u32> for FeeRate {
    type Error = VaultError;
    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        FeeRate::new(value)
    }
}

pub fn mul_div_floor_u64(a: u64, b: u64, denom: u64) -> Result<u64> {
    if denom == 0 {
        return Err(VaultError::InvalidInput("division by zero".into()));
    }
    let num = (a as u128)
        .checked_mul(b as u128)
        .ok_or(VaultError::Overflow("mul_div"))?;
    let out = num / (denom as u128);
    u64::try_from(out).map_err(|_| VaultError::Overflow("mul_div quotient"))
}

pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or(VaultError::Overflow("add"))
}

pub fn sub_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_sub(b).ok_or(VaultError::Underflow("sub"))
}

/// Fee taken from `amount` at `rate` (floor division).
pub fn floor_fee(amount: u64, rate: FeeRate) -> Result<u64> {
    mul_div_floor_u64(amount, rate.as_u64(), FEE_DENOMINATOR)
}

/// The epoch containing `now`: `floor(now / duration) * duration`.
///
/// Epochs are identified by their start timestamp, so epoch arithmetic is
/// plain timestamp arithmetic.
pub fn epoch_of(now: u64, epoch_duration: u64) -> Result<EpochId> {
    if epoch_duration == 0 {
        return Err(VaultError::InvalidInput("epoch duration is zero".into()));
    }
    Ok(EpochId(now / epoch_duration * epoch_duration))
}

/// The epoch after the one containing `now`.
pub fn next_epoch(now: u64, epoch_duration: u64) -> Result<EpochId> {
    let current = epoch_of(now, epoch_duration)?;
    Ok(EpochId(add_u64(current.0, epoch_duration)?))
}

/// Number of futures rounds earned for waiting `wait` seconds until
/// `unlock_time`.
///
/// `rounds = floor(wait / duration)`, with one boundary correction: a wait of
/// zero whole epochs still earns one round when it is strictly more than half
/// an epoch and the unlock time is not epoch-aligned. This is a policy choice
/// (no zero-reward dust positions for near-full epochs), preserved exactly.
pub fn futures_rounds(wait: u64, unlock_time: u64, epoch_duration: u64) -> Result<u64> {
    if epoch_duration == 0 {
        return Err(VaultError::InvalidInput("epoch duration is zero".into()));
    }
    let rounds = wait / epoch_duration;
    if rounds == 0 && unlock_time % epoch_duration != 0 && wait > epoch_duration / 2 {
        Ok(1)
    } else {
        Ok(rounds)
    }
}

/// Redemption fee rate, decreasing linearly with wait time:
/// `fee_max - (fee_max - fee_min) * wait / max_redemption_time`.
///
/// `wait` is clamped to `max_redemption_time`, so the rate is always in
/// `[fee_min, fee_max]`.
pub fn redemption_fee_rate(
    fee_min: FeeRate,
    fee_max: FeeRate,
    wait: u64,
    max_redemption_time: u64,
) -> Result<FeeRate> {
    if fee_min > fee_max {
        return Err(VaultError::InvalidInput(
            "redemption fee min exceeds max".into(),
        ));
    }
    if max_redemption_time == 0 {
        return Err(VaultError::InvalidInput(
            "max redemption time is zero".into(),
        ));
    }
    let span = fee_max.as_u64() - fee_min.as_u64();
    let reduction = mul_div_floor_u64(span, wait.min(max_redemption_time), max_redemption_time)?;
    let rate = fee_max.as_u64() - reduction;
    FeeRate::new(rate as u32)
}
