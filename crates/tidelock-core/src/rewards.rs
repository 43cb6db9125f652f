//! Per-epoch reward recording and redemption.
//!
//! Every reward arrival is split exactly once, fee first, then pro-rata
//! between snapshotted receipt holders and reward-futures holders. The
//! futures share is the subtraction remainder, never recomputed, so the
//! three parts always sum to the amount received.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::{add_u64, floor_fee, mul_div_floor_u64, sub_u64, FeeRate};
use crate::{AccountId, EpochId, Result, TokenId, VaultError};

/// Exact decomposition of one reward arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardSplit {
    pub fee: u64,
    pub snapshot_share: u64,
    pub futures_share: u64,
}

impl RewardSplit {
    /// Splits `received` at `fee_rate`, then pro-rata by `snapshot_supply`
    /// against `snapshot_supply + futures_supply`.
    ///
    /// Preconditions:
    /// - `snapshot_supply + futures_supply > 0` (someone must be eligible).
    ///
    /// Postconditions:
    /// - `fee + snapshot_share + futures_share == received`.
    pub fn compute(
        received: u64,
        fee_rate: FeeRate,
        snapshot_supply: u64,
        futures_supply: u64,
    ) -> Result<RewardSplit> {
        let eligible = add_u64(snapshot_supply, futures_supply)?;
        if eligible == 0 {
            return Err(VaultError::InvalidInput(
                "no eligible supply for reward split".into(),
            ));
        }
        let fee = floor_fee(received, fee_rate)?;
        let distributable = sub_u64(received, fee)?;
        let snapshot_share = mul_div_floor_u64(distributable, snapshot_supply, eligible)?;
        let futures_share = distributable - snapshot_share;
        Ok(RewardSplit {
            fee,
            snapshot_share,
            futures_share,
        })
    }
}

/// One epoch's recorded rewards. Parallel arrays indexed by reward index;
/// every recording appends, even for a repeated token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochRecord {
    snapshot_id: u64,
    tokens: Vec<TokenId>,
    snapshot_rewards: Vec<u64>,
    /// Remaining (undistributed) futures rewards; drawn down in place.
    futures_rewards: Vec<u64>,
    /// Per-account bitmask of snapshot reward indices already redeemed.
    redeemed: BTreeMap<AccountId, u128>,
}

impl EpochRecord {
    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn snapshot_rewards(&self) -> &[u64] {
        &self.snapshot_rewards
    }

    pub fn futures_rewards(&self) -> &[u64] {
        &self.futures_rewards
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EpochRewardEngine {
    epochs: BTreeMap<EpochId, EpochRecord>,
}

impl EpochRewardEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_of(&self, epoch: EpochId) -> Option<&EpochRecord> {
        self.epochs.get(&epoch)
    }

    /// Binds `epoch` to `snapshot_id` if it has no record yet.
    ///
    /// An epoch's snapshot id is set once; all rewards recorded for the epoch
    /// are redeemed against balances at that snapshot.
    pub fn ensure_epoch(&mut self, epoch: EpochId, snapshot_id: u64) -> Result<()> {
        if snapshot_id == 0 {
            return Err(VaultError::SnapshotRequired { epoch });
        }
        self.epochs.entry(epoch).or_insert_with(|| EpochRecord {
            snapshot_id,
            tokens: Vec::new(),
            snapshot_rewards: Vec::new(),
            futures_rewards: Vec::new(),
            redeemed: BTreeMap::new(),
        });
        Ok(())
    }

    /// Appends one reward arrival to `epoch`, split by [`RewardSplit::compute`].
    ///
    /// `max_rewards` bounds the per-epoch reward count (the redemption
    /// bitmask is u128, so it can never exceed 128).
    pub fn record_reward(
        &mut self,
        epoch: EpochId,
        token: TokenId,
        split: RewardSplit,
        max_rewards: usize,
    ) -> Result<usize> {
        let record = self
            .epochs
            .get_mut(&epoch)
            .ok_or(VaultError::SnapshotRequired { epoch })?;
        if record.tokens.len() >= max_rewards {
            return Err(VaultError::BoundedValueExceeded(format!(
                "rewards per epoch: {} >= {max_rewards}",
                record.tokens.len()
            )));
        }
        record.tokens.push(token);
        record.snapshot_rewards.push(split.snapshot_share);
        record.futures_rewards.push(split.futures_share);
        Ok(record.tokens.len() - 1)
    }

    /// Redeems `account`'s snapshot rewards for the given indices.
    ///
    /// `balance` and `supply` are the receipt balances at the epoch's
    /// snapshot. Each index pays `floor(snapshot_rewards[i] * balance /
    /// supply)` exactly once per account; duplicates in one call and repeats
    /// across calls both fail with `AlreadyRedeemed`. All-or-nothing.
    pub fn redeem_snapshot(
        &mut self,
        epoch: EpochId,
        account: AccountId,
        indices: &[usize],
        balance: u64,
        supply: u64,
    ) -> Result<Vec<(TokenId, u64)>> {
        if indices.is_empty() {
            return Err(VaultError::EmptyArray);
        }
        let record = self
            .epochs
            .get_mut(&epoch)
            .ok_or(VaultError::NoRewards { epoch })?;
        if record.tokens.is_empty() {
            return Err(VaultError::NoRewards { epoch });
        }
        if balance == 0 {
            return Err(VaultError::InsufficientBalance {
                requested: 1,
                available: 0,
            });
        }
        let mut mask = record.redeemed.get(&account).copied().unwrap_or(0);
        let mut payouts = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= record.tokens.len() {
                return Err(VaultError::NoRewards { epoch });
            }
            let bit = 1u128 << index;
            if mask & bit != 0 {
                return Err(VaultError::AlreadyRedeemed { epoch, index });
            }
            mask |= bit;
            let amount = mul_div_floor_u64(record.snapshot_rewards[index], balance, supply)?;
            payouts.push((record.tokens[index], amount));
        }
        record.redeemed.insert(account, mask);
        Ok(payouts)
    }

    /// Redeems the futures share of every reward in `epoch`, pro-rata by
    /// `balance / supply` of the epoch's reward futures.
    ///
    /// Pools are decremented in place, so later redeemers split what remains
    /// against the reduced supply and the pool can never be overdrawn.
    pub fn redeem_futures(
        &mut self,
        epoch: EpochId,
        balance: u64,
        supply: u64,
    ) -> Result<Vec<(TokenId, u64)>> {
        let record = self
            .epochs
            .get_mut(&epoch)
            .ok_or(VaultError::NoRewards { epoch })?;
        if record.tokens.is_empty() {
            return Err(VaultError::NoRewards { epoch });
        }
        if balance == 0 || supply == 0 {
            return Err(VaultError::InsufficientBalance {
                requested: balance,
                available: supply,
            });
        }
        let mut payouts = Vec::with_capacity(record.tokens.len());
        let mut remaining = Vec::with_capacity(record.tokens.len());
        for (index, &pool) in record.futures_rewards.iter().enumerate() {
            let amount = mul_div_floor_u64(pool, balance, supply)?;
            remaining.push(sub_u64(pool, amount)?);
            payouts.push((record.tokens[index], amount));
        }
        record.futures_rewards = remaining;
        Ok(payouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hash32;
    use proptest::prelude::*;

    fn acct(n: u8) -> AccountId {
        AccountId(Hash32([n; 32]))
    }

    fn token(n: u8) -> TokenId {
        TokenId(Hash32([n; 32]))
    }

    fn rate(v: u32) -> FeeRate {
        FeeRate::new(v).unwrap()
    }

    #[test]
    fn split_is_exact_and_conserving() {
        // 1000 at 5% fee, snapshot 300 vs futures 700.
        let s = RewardSplit::compute(1000, rate(50_000), 300, 700).unwrap();
        assert_eq!(s.fee, 50);
        assert_eq!(s.snapshot_share, 285);
        assert_eq!(s.futures_share, 665);
        assert_eq!(s.fee + s.snapshot_share + s.futures_share, 1000);

        // 1000 at 0.5% fee, snapshot 700 vs futures 300: 5 / 696 / 299.
        let s = RewardSplit::compute(1000, rate(5_000), 700, 300).unwrap();
        assert_eq!(s.fee, 5);
        assert_eq!(s.snapshot_share, 696);
        assert_eq!(s.futures_share, 299);
    }

    #[test]
    fn split_remainder_goes_to_futures() {
        // Floor on the snapshot side pushes truncation dust to futures.
        let s = RewardSplit::compute(100, rate(0), 1, 2).unwrap();
        assert_eq!(s.snapshot_share, 33);
        assert_eq!(s.futures_share, 67);
    }

    #[test]
    fn split_rejects_empty_denominator() {
        assert!(matches!(
            RewardSplit::compute(100, rate(0), 0, 0),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn recording_requires_a_bound_epoch() {
        let mut e = EpochRewardEngine::new();
        let split = RewardSplit::compute(10, rate(0), 1, 0).unwrap();
        assert!(matches!(
            e.record_reward(EpochId(0), token(1), split, 128),
            Err(VaultError::SnapshotRequired { .. })
        ));
        assert!(matches!(
            e.ensure_epoch(EpochId(0), 0),
            Err(VaultError::SnapshotRequired { .. })
        ));
    }

    #[test]
    fn snapshot_redemption_pays_pro_rata_once() {
        let mut e = EpochRewardEngine::new();
        let epoch = EpochId(0);
        e.ensure_epoch(epoch, 1).unwrap();
        let split = RewardSplit::compute(1000, rate(50_000), 300, 700).unwrap();
        e.record_reward(epoch, token(1), split, 128).unwrap();

        // Holder owns 100 of 300 snapshotted receipts.
        let out = e.redeem_snapshot(epoch, acct(1), &[0], 100, 300).unwrap();
        assert_eq!(out, vec![(token(1), 95)]);

        assert!(matches!(
            e.redeem_snapshot(epoch, acct(1), &[0], 100, 300),
            Err(VaultError::AlreadyRedeemed { index: 0, .. })
        ));
        // A different holder still can.
        let out = e.redeem_snapshot(epoch, acct(2), &[0], 200, 300).unwrap();
        assert_eq!(out, vec![(token(1), 190)]);
    }

    #[test]
    fn duplicate_indices_in_one_call_fail_atomically() {
        let mut e = EpochRewardEngine::new();
        let epoch = EpochId(0);
        e.ensure_epoch(epoch, 1).unwrap();
        let split = RewardSplit::compute(100, rate(0), 1, 1).unwrap();
        e.record_reward(epoch, token(1), split, 128).unwrap();

        assert!(matches!(
            e.redeem_snapshot(epoch, acct(1), &[0, 0], 1, 1),
            Err(VaultError::AlreadyRedeemed { .. })
        ));
        // The failed call committed nothing.
        assert!(e.redeem_snapshot(epoch, acct(1), &[0], 1, 1).is_ok());
    }

    #[test]
    fn futures_redemption_draws_down_the_pool() {
        let mut e = EpochRewardEngine::new();
        let epoch = EpochId(0);
        e.ensure_epoch(epoch, 1).unwrap();
        let split = RewardSplit::compute(1000, rate(0), 0, 10).unwrap();
        e.record_reward(epoch, token(1), split, 128).unwrap();

        // First holder: 4 of 10 futures, gets floor(1000 * 4 / 10) = 400.
        let out = e.redeem_futures(epoch, 4, 10).unwrap();
        assert_eq!(out, vec![(token(1), 400)]);
        // Second holder redeems against the reduced pool and supply.
        let out = e.redeem_futures(epoch, 6, 6).unwrap();
        assert_eq!(out, vec![(token(1), 600)]);
        assert_eq!(e.record_of(epoch).unwrap().futures_rewards(), &[0]);
    }

    #[test]
    fn per_epoch_reward_count_is_bounded() {
        let mut e = EpochRewardEngine::new();
        let epoch = EpochId(0);
        e.ensure_epoch(epoch, 1).unwrap();
        let split = RewardSplit::compute(1, rate(0), 1, 0).unwrap();
        e.record_reward(epoch, token(1), split, 1).unwrap();
        assert!(matches!(
            e.record_reward(epoch, token(2), split, 1),
            Err(VaultError::BoundedValueExceeded(_))
        ));
    }

    proptest! {
        #[test]
        fn split_conserves_for_all_inputs(
            received in 0u64..u64::MAX / 2,
            fee in 0u32..=crate::math::FEE_DENOMINATOR as u32,
            s in 0u64..1_000_000_000,
            f in 0u64..1_000_000_000,
        ) {
            prop_assume!(s + f > 0);
            let split = RewardSplit::compute(received, rate(fee), s, f).unwrap();
            prop_assert_eq!(
                split.fee + split.snapshot_share + split.futures_share,
                received
            );
            prop_assert!(split.fee <= received);
        }
    }

    #[test]
    fn missing_epoch_yields_no_rewards() {
        let mut e = EpochRewardEngine::new();
        assert!(matches!(
            e.redeem_snapshot(EpochId(7), acct(1), &[0], 1, 1),
            Err(VaultError::NoRewards { epoch: EpochId(7) })
        ));
        assert!(matches!(
            e.redeem_futures(EpochId(7), 1, 1),
            Err(VaultError::NoRewards { .. })
        ));
    }
}
