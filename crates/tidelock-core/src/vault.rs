//! Receipt-token vault: share accounting against external holdings.
//!
//! The vault does not custody anything itself. Callers pass the current
//! underlying holdings into every conversion, so the exchange rate is always
//! derived, never stored. Shares live on a [`SnapshotLedger`] so reward
//! epochs can query point-in-time balances.

use serde::{Deserialize, Serialize};

use crate::math::mul_div_floor_u64;
use crate::snapshot::SnapshotLedger;
use crate::{AccountId, Result, VaultError};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptVault {
    ledger: SnapshotLedger,
    /// One whole unit of the share token (10^decimals).
    base_unit: u64,
}

impl ReceiptVault {
    pub fn new(base_unit: u64) -> Result<Self> {
        if base_unit == 0 {
            return Err(VaultError::InvalidInput("zero base unit".into()));
        }
        Ok(Self {
            ledger: SnapshotLedger::new(),
            base_unit,
        })
    }

    pub fn ledger(&self) -> &SnapshotLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut SnapshotLedger {
        &mut self.ledger
    }

    pub fn base_unit(&self) -> u64 {
        self.base_unit
    }

    /// Underlying per whole share, floored. `base_unit` at zero supply so the
    /// first depositor mints 1:1.
    pub fn exchange_rate(&self, holdings: u64) -> Result<u64> {
        let supply = self.ledger.total_supply();
        if supply == 0 {
            return Ok(self.base_unit);
        }
        mul_div_floor_u64(holdings, self.base_unit, supply)
    }

    /// Shares minted for depositing `assets` against pre-deposit `holdings`.
    pub fn preview_deposit(&self, assets: u64, holdings: u64) -> Result<u64> {
        let supply = self.ledger.total_supply();
        if supply == 0 {
            return Ok(assets);
        }
        if holdings == 0 {
            return Err(VaultError::InvalidInput(
                "nonzero supply with zero holdings".into(),
            ));
        }
        mul_div_floor_u64(assets, supply, holdings)
    }

    /// Assets returned for redeeming `shares` against current `holdings`.
    pub fn preview_redeem(&self, shares: u64, holdings: u64) -> Result<u64> {
        let supply = self.ledger.total_supply();
        if supply == 0 {
            return Ok(0);
        }
        mul_div_floor_u64(shares, holdings, supply)
    }

    /// Shares that must be burned to withdraw `assets` (floored).
    pub fn preview_withdraw(&self, assets: u64, holdings: u64) -> Result<u64> {
        let supply = self.ledger.total_supply();
        if supply == 0 {
            return Ok(assets);
        }
        if holdings == 0 {
            return Err(VaultError::InvalidInput(
                "nonzero supply with zero holdings".into(),
            ));
        }
        mul_div_floor_u64(assets, supply, holdings)
    }

    /// Mints shares for `assets` deposited; `holdings` excludes the deposit.
    pub fn deposit(&mut self, to: AccountId, assets: u64, holdings: u64) -> Result<u64> {
        if assets == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let shares = self.preview_deposit(assets, holdings)?;
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.ledger.mint(to, shares)?;
        Ok(shares)
    }

    /// Burns `shares` and returns the assets they were worth.
    pub fn redeem(&mut self, from: AccountId, shares: u64, holdings: u64) -> Result<u64> {
        if shares == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let assets = self.preview_redeem(shares, holdings)?;
        self.ledger.burn(from, shares)?;
        Ok(assets)
    }
}
