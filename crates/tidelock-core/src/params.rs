//! Protocol parameters (validated at construction).

use serde::{Deserialize, Serialize};

use crate::math::{FeeRate, FEE_DENOMINATOR};
use crate::{Result, VaultError};

/// Immutable deployment parameters.
///
/// Constructed only through [`ProtocolParams::new`], so every instance is
/// internally consistent and accessors can be used without re-validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    epoch_duration: u64,
    max_redemption_time: u64,
    decimals: u32,
    max_fee: FeeRate,
    reward_fee: FeeRate,
    redemption_fee_max: FeeRate,
    redemption_fee_min: FeeRate,
}

impl ProtocolParams {
    /// Preconditions:
    /// - `epoch_duration > 0`
    /// - `max_redemption_time >= epoch_duration`
    /// - `decimals <= 18` (10^decimals must fit in u64)
    /// - `redemption_fee_min <= redemption_fee_max <= max_fee`
    /// - `reward_fee <= max_fee`
    pub fn new(
        epoch_duration: u64,
        max_redemption_time: u64,
        decimals: u32,
        max_fee: FeeRate,
        reward_fee: FeeRate,
        redemption_fee_max: FeeRate,
        redemption_fee_min: FeeRate,
    ) -> Result<Self> {
        if epoch_duration == 0 {
            return Err(VaultError::InvalidInput("epoch duration is zero".into()));
        }
        if max_redemption_time < epoch_duration {
            return Err(VaultError::InvalidInput(
                "max redemption time shorter than one epoch".into(),
            ));
        }
        if decimals > 18 {
            return Err(VaultError::InvalidInput("decimals above 18".into()));
        }
        if redemption_fee_min > redemption_fee_max {
            return Err(VaultError::InvalidInput(
                "redemption fee min exceeds max".into(),
            ));
        }
        for rate in [reward_fee, redemption_fee_max, redemption_fee_min] {
            if rate > max_fee {
                return Err(VaultError::InvalidFeeRate {
                    rate: rate.as_u64(),
                    max: max_fee.as_u64(),
                });
            }
        }
        Ok(Self {
            epoch_duration,
            max_redemption_time,
            decimals,
            max_fee,
            reward_fee,
            redemption_fee_max,
            redemption_fee_min,
        })
    }

    /// Two-week epochs, 17-week maximum redemption, 9 decimals, 10% fee cap.
    pub fn standard() -> Self {
        Self::new(
            1_209_600,
            10_281_600,
            9,
            FeeRate::new((FEE_DENOMINATOR / 10) as u32).expect("cap in range"),
            FeeRate::new(40_000).expect("in range"),
            FeeRate::new(50_000).expect("in range"),
            FeeRate::new(1_000).expect("in range"),
        )
        .expect("standard parameters are valid")
    }

    /// POLICY-SET: epoch length in seconds.
    pub fn epoch_duration(&self) -> u64 {
        self.epoch_duration
    }

    /// POLICY-SET: longest wait a redemption may be scheduled for.
    pub fn max_redemption_time(&self) -> u64 {
        self.max_redemption_time
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// One whole share unit.
    pub fn base_unit(&self) -> u64 {
        10u64.pow(self.decimals)
    }

    /// POLICY-SET: hard cap on any scheduled fee rate.
    pub fn max_fee(&self) -> FeeRate {
        self.max_fee
    }

    /// POLICY-SET: initial reward fee.
    pub fn reward_fee(&self) -> FeeRate {
        self.reward_fee
    }

    /// POLICY-SET: initial redemption fee at zero wait.
    pub fn redemption_fee_max(&self) -> FeeRate {
        self.redemption_fee_max
    }

    /// POLICY-SET: initial redemption fee at maximum wait.
    pub fn redemption_fee_min(&self) -> FeeRate {
        self.redemption_fee_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_parameters_validate() {
        let p = ProtocolParams::standard();
        assert_eq!(p.epoch_duration(), 1_209_600);
        assert_eq!(p.max_redemption_time(), 10_281_600);
        assert_eq!(p.base_unit(), 1_000_000_000);
    }

    #[test]
    fn invalid_combinations_rejected() {
        let cap = FeeRate::new(100_000).unwrap();
        let ok = FeeRate::new(1_000).unwrap();
        assert!(ProtocolParams::new(0, 100, 9, cap, ok, ok, ok).is_err());
        assert!(ProtocolParams::new(100, 99, 9, cap, ok, ok, ok).is_err());
        assert!(ProtocolParams::new(100, 100, 19, cap, ok, ok, ok).is_err());
        // min > max
        let hi = FeeRate::new(2_000).unwrap();
        assert!(ProtocolParams::new(100, 100, 9, cap, ok, ok, hi).is_err());
        // fee above cap
        let over = FeeRate::new(100_001).unwrap();
        assert!(matches!(
            ProtocolParams::new(100, 100, 9, cap, over, ok, ok),
            Err(VaultError::InvalidFeeRate { .. })
        ));
    }
}
