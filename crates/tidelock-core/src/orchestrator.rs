//! Top-level protocol state machine.
//!
//! `Protocol` owns every ledger and wires them to the external collaborators
//! (Locker, FeeDistributor, RewardStash) passed into each operation. Every
//! operation follows the same shape: guard entry, validate everything,
//! perform collaborator calls, then commit internal state with writes that
//! cannot fail given the validation. A failure at any point before the
//! commit phase leaves internal state untouched.
//!
//! Holdings accounting: the backing of the receipt supply is
//! `locker.total_custody() + free_underlying - queue.outstanding()`. Capital
//! promised to redeemers is carved out of holdings the moment their shares
//! are burned, so initiating or completing a redemption never moves the
//! exchange rate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bounds::RuntimeBounds;
use crate::events::Event;
use crate::fees::{FeeKind, FeeScheduler};
use crate::math::{
    add_u64, epoch_of, floor_fee, futures_rounds, redemption_fee_rate, sub_u64, FeeRate,
};
use crate::params::ProtocolParams;
use crate::position::PositionLedger;
use crate::queue::RedemptionQueue;
use crate::rewards::{EpochRewardEngine, RewardSplit};
use crate::vault::ReceiptVault;
use crate::{
    AccountId, EpochId, FeeDistributor, FuturesKind, Hash32, Locker, Result, RewardStash, TokenId,
    VaultError,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Protocol {
    params: ProtocolParams,
    bounds: RuntimeBounds,
    owner: AccountId,
    /// Receives share-denominated redemption fees.
    fee_collector: AccountId,
    /// Identity the protocol presents to collaborators when paying fees out
    /// of its own reward custody.
    self_account: AccountId,
    /// Token id of the receipt share, used when reporting share fees.
    receipt_token: TokenId,
    /// Token id of the underlying; misc rewards in it compound the rate.
    underlying_token: TokenId,
    paused: bool,
    entered: bool,
    vault: ReceiptVault,
    vote_futures: PositionLedger,
    reward_futures: PositionLedger,
    staked: PositionLedger,
    /// Pending redemptions, keyed by unlock timestamp, denominated in
    /// underlying promised at initiation.
    pending_redemptions: PositionLedger,
    queue: RedemptionQueue,
    rewards: EpochRewardEngine,
    fees: FeeScheduler,
    /// Undistributed reward custody per token.
    reward_pools: BTreeMap<TokenId, u64>,
    /// Unlocked underlying held liquid for matured redemptions.
    free_underlying: u64,
    /// Snapshot id bound to each epoch that has one.
    epoch_snapshots: BTreeMap<EpochId, u64>,
    events: Vec<Event>,
}

impl Protocol {
    pub fn new(
        params: ProtocolParams,
        bounds: RuntimeBounds,
        owner: AccountId,
        fee_collector: AccountId,
        self_account: AccountId,
        receipt_token: TokenId,
        underlying_token: TokenId,
    ) -> Result<Self> {
        bounds.validate()?;
        for account in [owner, fee_collector, self_account] {
            if account == AccountId::ZERO {
                return Err(VaultError::ZeroAddress);
            }
        }
        let fees = FeeScheduler::new(
            params.reward_fee(),
            params.redemption_fee_max(),
            params.redemption_fee_min(),
            params.max_fee(),
        )?;
        Ok(Self {
            vault: ReceiptVault::new(params.base_unit())?,
            params,
            bounds,
            owner,
            fee_collector,
            self_account,
            receipt_token,
            underlying_token,
            paused: false,
            entered: false,
            vote_futures: PositionLedger::new(),
            reward_futures: PositionLedger::new(),
            staked: PositionLedger::new(),
            pending_redemptions: PositionLedger::new(),
            queue: RedemptionQueue::new(),
            rewards: EpochRewardEngine::new(),
            fees,
            reward_pools: BTreeMap::new(),
            free_underlying: 0,
            epoch_snapshots: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    // ---- read side ----

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn vault(&self) -> &ReceiptVault {
        &self.vault
    }

    pub fn futures(&self, kind: FuturesKind) -> &PositionLedger {
        match kind {
            FuturesKind::Vote => &self.vote_futures,
            FuturesKind::Reward => &self.reward_futures,
        }
    }

    pub fn staked(&self) -> &PositionLedger {
        &self.staked
    }

    pub fn pending_redemptions(&self) -> &PositionLedger {
        &self.pending_redemptions
    }

    pub fn queue(&self) -> &RedemptionQueue {
        &self.queue
    }

    pub fn reward_engine(&self) -> &EpochRewardEngine {
        &self.rewards
    }

    pub fn fee_schedule(&self) -> &FeeScheduler {
        &self.fees
    }

    pub fn reward_pool(&self, token: TokenId) -> u64 {
        self.reward_pools.get(&token).copied().unwrap_or(0)
    }

    pub fn free_underlying(&self) -> u64 {
        self.free_underlying
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_epoch(&self, now: u64) -> Result<EpochId> {
        epoch_of(now, self.params.epoch_duration())
    }

    pub fn snapshot_id_of(&self, epoch: EpochId) -> Option<u64> {
        self.epoch_snapshots.get(&epoch).copied()
    }

    /// Underlying backing the live receipt supply (promised redemptions are
    /// carved out).
    pub fn holdings(&self, locker: &dyn Locker) -> Result<u64> {
        let custody = add_u64(locker.total_custody(), self.free_underlying)?;
        sub_u64(custody, self.queue.outstanding())
    }

    pub fn exchange_rate(&self, locker: &dyn Locker) -> Result<u64> {
        self.vault.exchange_rate(self.holdings(locker)?)
    }

    /// Removes and returns all events emitted so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ---- deposits ----

    /// Deposits `assets` of underlying: locks them and mints shares at the
    /// current exchange rate.
    pub fn deposit(
        &mut self,
        locker: &mut dyn Locker,
        caller: AccountId,
        assets: u64,
        now: u64,
    ) -> Result<u64> {
        self.guarded(|p| {
            p.ensure_active()?;
            if assets == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if caller == AccountId::ZERO {
                return Err(VaultError::ZeroAddress);
            }
            p.snapshot_inner(now)?;
            let holdings = p.holdings(locker)?;
            let shares = p.vault.preview_deposit(assets, holdings)?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            add_u64(p.vault.ledger().total_supply(), shares)?;

            locker.lock(assets)?;

            p.vault.ledger_mut().mint(caller, shares)?;
            p.events.push(Event::Deposited {
                account: caller,
                assets,
                shares,
            });
            tracing::debug!(%caller, assets, shares, "deposit");
            Ok(shares)
        })
    }

    // ---- redemptions ----

    /// Initiates a redemption against the lock entry at `lock_index`.
    ///
    /// Burns the post-fee shares, moves the fee shares to the collector,
    /// books a pending redemption for the underlying they were worth, and
    /// mints one futures token per epoch of waiting on the pre-fee amount.
    /// Returns (unlock time, underlying promised).
    pub fn initiate_redemption(
        &mut self,
        locker: &mut dyn Locker,
        distributor: &mut dyn FeeDistributor,
        caller: AccountId,
        lock_index: usize,
        shares: u64,
        kind: FuturesKind,
        now: u64,
    ) -> Result<(u64, u64)> {
        self.guarded(|p| {
            p.ensure_active()?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            p.snapshot_inner(now)?;

            let entries = locker.locked_entries();
            p.bounds.check_unlock_entries(entries.len())?;
            let entry = *entries
                .get(lock_index)
                .ok_or_else(|| VaultError::InvalidInput("unknown lock entry".into()))?;
            let balance = p.vault.ledger().balance_of(caller);
            if shares > balance {
                return Err(VaultError::InsufficientBalance {
                    requested: shares,
                    available: balance,
                });
            }

            let wait = entry.unlock_time.saturating_sub(now);
            let fee_rate = redemption_fee_rate(
                p.fees.rate(FeeKind::RedemptionMin),
                p.fees.rate(FeeKind::RedemptionMax),
                wait,
                p.params.max_redemption_time(),
            )?;
            let fee_shares = floor_fee(shares, fee_rate)?;
            let post_fee_shares = shares - fee_shares;
            if post_fee_shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let holdings = p.holdings(locker)?;
            let promised = p.vault.preview_redeem(post_fee_shares, holdings)?;
            if promised == 0 {
                return Err(VaultError::ZeroAmount);
            }

            let duration = p.params.epoch_duration();
            let rounds = futures_rounds(wait, entry.unlock_time, duration)?;
            p.bounds.check_batch_len(rounds as usize)?;
            let current = epoch_of(now, duration)?;
            let mut futures_ids = Vec::with_capacity(rounds as usize);
            for i in 1..=rounds {
                let id = add_u64(current.0, i.checked_mul(duration).ok_or(VaultError::Overflow("futures epoch"))?)?;
                check_mint(p.futures(kind), caller, id, shares)?;
                futures_ids.push(id);
            }
            check_mint(&p.pending_redemptions, caller, entry.unlock_time, promised)?;
            // Read-only allowance check; the queue re-validates at commit.
            let queued = add_u64(p.queue.promised_at(entry.unlock_time), promised)?;
            if queued > entry.amount {
                return Err(VaultError::InsufficientRedemptionAllowance {
                    unlock_time: entry.unlock_time,
                    promised: queued,
                    unlockable: entry.amount,
                });
            }

            if fee_shares > 0 {
                distributor.distribute_fees(p.fee_collector, p.receipt_token, fee_shares)?;
            }

            p.queue.initiate(entry.unlock_time, promised, entry.amount)?;
            p.vault.ledger_mut().burn(caller, post_fee_shares)?;
            if fee_shares > 0 {
                p.vault
                    .ledger_mut()
                    .transfer(caller, p.fee_collector, fee_shares)?;
            }
            p.pending_redemptions
                .mint(caller, entry.unlock_time, promised)?;
            let futures = p.futures_mut(kind);
            for &id in &futures_ids {
                futures.mint(caller, id, shares)?;
            }

            p.events.push(Event::RedemptionInitiated {
                account: caller,
                unlock_time: entry.unlock_time,
                shares,
                fee_shares,
                post_fee_shares,
            });
            tracing::debug!(
                %caller,
                unlock_time = entry.unlock_time,
                shares,
                promised,
                rounds,
                "redemption initiated"
            );
            Ok((entry.unlock_time, promised))
        })
    }

    /// Completes one matured redemption. See [`Protocol::redeem_batch`].
    pub fn redeem(
        &mut self,
        locker: &mut dyn Locker,
        caller: AccountId,
        unlock_time: u64,
        amount: u64,
        now: u64,
    ) -> Result<()> {
        self.redeem_batch(locker, caller, &[unlock_time], &[amount], now)
    }

    /// Completes matured redemptions: harvests unlocked capital from the
    /// Locker, pays the promised underlying, and re-locks any surplus not
    /// reserved for other outstanding promises.
    pub fn redeem_batch(
        &mut self,
        locker: &mut dyn Locker,
        caller: AccountId,
        unlock_times: &[u64],
        amounts: &[u64],
        now: u64,
    ) -> Result<()> {
        self.guarded(|p| {
            p.ensure_active()?;
            if unlock_times.is_empty() {
                return Err(VaultError::EmptyArray);
            }
            if unlock_times.len() != amounts.len() {
                return Err(VaultError::MismatchedArrayLengths {
                    left: unlock_times.len(),
                    right: amounts.len(),
                });
            }
            p.bounds.check_batch_len(unlock_times.len())?;

            // Duplicate unlock times accumulate, so stage cumulative checks.
            let mut staged: BTreeMap<u64, u64> = BTreeMap::new();
            let mut total = 0u64;
            for (&unlock_time, &amount) in unlock_times.iter().zip(amounts) {
                if amount == 0 {
                    return Err(VaultError::ZeroAmount);
                }
                if unlock_time > now {
                    return Err(VaultError::BeforeUnlock { unlock_time, now });
                }
                let claimed = add_u64(staged.get(&unlock_time).copied().unwrap_or(0), amount)?;
                let held = p.pending_redemptions.balance_of(caller, unlock_time);
                if claimed > held {
                    return Err(VaultError::InsufficientBalance {
                        requested: claimed,
                        available: held,
                    });
                }
                let promised = p.queue.promised_at(unlock_time);
                if claimed > promised {
                    return Err(VaultError::InsufficientBalance {
                        requested: claimed,
                        available: promised,
                    });
                }
                staged.insert(unlock_time, claimed);
                total = add_u64(total, amount)?;
            }

            let unlocked = locker.unlock()?;
            let free = add_u64(p.free_underlying, unlocked)?;
            if total > free {
                return Err(VaultError::InsufficientBalance {
                    requested: total,
                    available: free,
                });
            }
            // Keep enough liquid for the promises that remain after this
            // payout; everything else goes back to work.
            let remaining_outstanding = sub_u64(p.queue.outstanding(), total)?;
            let surplus = (free - total).saturating_sub(remaining_outstanding);
            if surplus > 0 {
                locker.relock(surplus)?;
            }

            for (&unlock_time, &claimed) in &staged {
                p.queue.complete(now, unlock_time, claimed)?;
                p.pending_redemptions.burn(caller, unlock_time, claimed)?;
                p.events.push(Event::Redeemed {
                    account: caller,
                    unlock_time,
                    assets: claimed,
                });
            }
            p.free_underlying = free - total - surplus;
            tracing::debug!(%caller, total, surplus, "redemption completed");
            Ok(())
        })
    }

    // ---- staking ----

    /// Burns shares for `rounds` epochs: a staked position maturing after
    /// the last round, plus one futures token per round.
    pub fn stake(
        &mut self,
        caller: AccountId,
        kind: FuturesKind,
        rounds: u64,
        shares: u64,
        now: u64,
    ) -> Result<EpochId> {
        self.guarded(|p| {
            p.ensure_active()?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if rounds == 0 {
                return Err(VaultError::InvalidInput("zero staking rounds".into()));
            }
            p.bounds.check_batch_len(rounds as usize)?;
            p.snapshot_inner(now)?;

            let duration = p.params.epoch_duration();
            let current = epoch_of(now, duration)?;
            let expiry = EpochId(add_u64(
                current.0,
                rounds
                    .checked_mul(duration)
                    .ok_or(VaultError::Overflow("staking expiry"))?,
            )?);
            let balance = p.vault.ledger().balance_of(caller);
            if shares > balance {
                return Err(VaultError::InsufficientBalance {
                    requested: shares,
                    available: balance,
                });
            }
            check_mint(&p.staked, caller, expiry.0, shares)?;
            for i in 1..=rounds {
                let id = add_u64(current.0, i * duration)?;
                check_mint(p.futures(kind), caller, id, shares)?;
            }

            p.vault.ledger_mut().burn(caller, shares)?;
            p.staked.mint(caller, expiry.0, shares)?;
            for i in 1..=rounds {
                let id = current.0 + i * duration;
                p.futures_mut(kind).mint(caller, id, shares)?;
            }
            p.events.push(Event::Staked {
                account: caller,
                kind,
                expiry,
                shares,
                rounds,
            });
            Ok(expiry)
        })
    }

    /// Returns a matured staked position to live shares.
    pub fn unstake(
        &mut self,
        caller: AccountId,
        expiry: EpochId,
        shares: u64,
        now: u64,
    ) -> Result<()> {
        self.guarded(|p| {
            p.ensure_active()?;
            if shares == 0 {
                return Err(VaultError::ZeroAmount);
            }
            if now < expiry.0 {
                return Err(VaultError::BeforeStakingExpiry { expiry, now });
            }
            p.snapshot_inner(now)?;
            add_u64(p.vault.ledger().total_supply(), shares)?;
            p.staked.burn(caller, expiry.0, shares)?;
            p.vault.ledger_mut().mint(caller, shares)?;
            p.events.push(Event::Unstaked {
                account: caller,
                expiry,
                shares,
            });
            Ok(())
        })
    }

    /// Swaps futures of one kind for the other, for a not-yet-started epoch.
    pub fn exchange_futures(
        &mut self,
        caller: AccountId,
        epoch: EpochId,
        amount: u64,
        from: FuturesKind,
        now: u64,
    ) -> Result<()> {
        self.guarded(|p| {
            p.ensure_active()?;
            if amount == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let current = epoch_of(now, p.params.epoch_duration())?;
            if epoch.0 <= current.0 {
                return Err(VaultError::PastExchangePeriod { epoch });
            }
            check_mint(p.futures(from.other()), caller, epoch.0, amount)?;
            p.futures_mut(from).burn(caller, epoch.0, amount)?;
            p.futures_mut(from.other()).mint(caller, epoch.0, amount)?;
            p.events.push(Event::FuturesExchanged {
                account: caller,
                epoch,
                from,
                amount,
            });
            Ok(())
        })
    }

    // ---- epochs and rewards ----

    /// Takes the current epoch's snapshot if it does not exist yet.
    /// Idempotent within an epoch; returns the snapshot id either way.
    pub fn take_epoch_snapshot(&mut self, now: u64) -> Result<u64> {
        self.guarded(|p| {
            p.ensure_active()?;
            p.snapshot_inner(now)
        })
    }

    /// Claims all rewards the Locker owes and records them in the current
    /// epoch, fee first, then split between snapshot and futures holders.
    /// Misc rewards paid in the underlying compound the exchange rate
    /// instead of entering the epoch record.
    pub fn claim_rewards(
        &mut self,
        locker: &mut dyn Locker,
        distributor: &mut dyn FeeDistributor,
        now: u64,
    ) -> Result<()> {
        self.guarded(|p| {
            p.ensure_active()?;
            let snapshot_id = p.snapshot_inner(now)?;
            let epoch = epoch_of(now, p.params.epoch_duration())?;
            let fee_rate = p.fees.rate(FeeKind::Reward);
            let snapshot_supply = p.vault.ledger().total_supply_at(snapshot_id)?;
            let futures_supply = p.reward_futures.supply_of(epoch.0);

            let claimable = locker.claimable_rewards();
            let mut splits = Vec::with_capacity(claimable.len());
            let mut recorded = p
                .rewards
                .record_of(epoch)
                .map_or(0, |r| r.tokens().len());
            let mut compounded = 0u64;
            for reward in &claimable {
                if reward.amount == 0 {
                    continue;
                }
                if reward.token == p.underlying_token {
                    compounded = add_u64(compounded, reward.amount)?;
                    continue;
                }
                if recorded >= p.bounds.max_rewards_per_epoch {
                    return Err(VaultError::BoundedValueExceeded(format!(
                        "rewards per epoch: {recorded} >= {}",
                        p.bounds.max_rewards_per_epoch
                    )));
                }
                let split =
                    RewardSplit::compute(reward.amount, fee_rate, snapshot_supply, futures_supply)?;
                splits.push((reward.token, reward.amount, split));
                recorded += 1;
            }
            // Cumulative pool overflow checks (tokens may repeat).
            let mut staged_pools: BTreeMap<TokenId, u64> = BTreeMap::new();
            for &(token, _, split) in &splits {
                let pool = staged_pools
                    .get(&token)
                    .copied()
                    .unwrap_or_else(|| p.reward_pool(token));
                let pool = add_u64(pool, add_u64(split.snapshot_share, split.futures_share)?)?;
                staged_pools.insert(token, pool);
            }
            add_u64(p.free_underlying, compounded)?;

            let claimed = locker.claim_rewards()?;
            if claimed != claimable {
                return Err(VaultError::Collaborator(
                    "claimed rewards diverge from claimable".into(),
                ));
            }
            for &(token, _, split) in &splits {
                if split.fee > 0 {
                    distributor.distribute_fees(p.self_account, token, split.fee)?;
                }
            }

            for (token, received, split) in splits {
                p.rewards
                    .record_reward(epoch, token, split, p.bounds.max_rewards_per_epoch)?;
                let pool = p.reward_pools.entry(token).or_insert(0);
                *pool += split.snapshot_share + split.futures_share;
                p.events.push(Event::RewardRecorded {
                    epoch,
                    token,
                    received,
                    fee: split.fee,
                    snapshot_share: split.snapshot_share,
                    futures_share: split.futures_share,
                });
            }
            p.free_underlying += compounded;
            tracing::debug!(epoch = epoch.0, "rewards claimed");
            Ok(())
        })
    }

    /// Claims a Merkle-proof-gated reward from the stash and records it in
    /// the current epoch like any other reward arrival.
    #[allow(clippy::too_many_arguments)]
    pub fn claim_stash_reward(
        &mut self,
        stash: &mut dyn RewardStash,
        distributor: &mut dyn FeeDistributor,
        caller: AccountId,
        token: TokenId,
        index: u64,
        amount: u64,
        proof: &[Hash32],
        now: u64,
    ) -> Result<()> {
        self.guarded(|p| {
            p.ensure_active()?;
            if amount == 0 {
                return Err(VaultError::ZeroAmount);
            }
            let snapshot_id = p.snapshot_inner(now)?;
            let epoch = epoch_of(now, p.params.epoch_duration())?;
            let snapshot_supply = p.vault.ledger().total_supply_at(snapshot_id)?;
            let futures_supply = p.reward_futures.supply_of(epoch.0);
            let split = RewardSplit::compute(
                amount,
                p.fees.rate(FeeKind::Reward),
                snapshot_supply,
                futures_supply,
            )?;
            let pool = p.reward_pool(token);
            add_u64(pool, add_u64(split.snapshot_share, split.futures_share)?)?;
            if p.rewards.record_of(epoch).map_or(0, |r| r.tokens().len())
                >= p.bounds.max_rewards_per_epoch
            {
                return Err(VaultError::BoundedValueExceeded(
                    "rewards per epoch".into(),
                ));
            }

            stash.claim(token, index, p.self_account, amount, proof)?;
            if split.fee > 0 {
                distributor.distribute_fees(p.self_account, token, split.fee)?;
            }

            p.rewards
                .record_reward(epoch, token, split, p.bounds.max_rewards_per_epoch)?;
            *p.reward_pools.entry(token).or_insert(0) += split.snapshot_share + split.futures_share;
            p.events.push(Event::StashRewardClaimed {
                account: caller,
                token,
                amount,
                fee: split.fee,
            });
            p.events.push(Event::RewardRecorded {
                epoch,
                token,
                received: amount,
                fee: split.fee,
                snapshot_share: split.snapshot_share,
                futures_share: split.futures_share,
            });
            Ok(())
        })
    }

    /// Redeems the caller's snapshot share of the given reward indices,
    /// pro-rata by their receipt balance at the epoch's snapshot.
    pub fn redeem_snapshot_rewards(
        &mut self,
        caller: AccountId,
        epoch: EpochId,
        indices: &[usize],
    ) -> Result<Vec<(TokenId, u64)>> {
        self.guarded(|p| {
            p.ensure_active()?;
            p.bounds.check_batch_len(indices.len())?;
            let record = p
                .rewards
                .record_of(epoch)
                .ok_or(VaultError::NoRewards { epoch })?;
            let snapshot_id = record.snapshot_id();
            let balance = p.vault.ledger().balance_at(caller, snapshot_id)?;
            let supply = p.vault.ledger().total_supply_at(snapshot_id)?;
            let payouts = p
                .rewards
                .redeem_snapshot(epoch, caller, indices, balance, supply)?;
            for &(token, amount) in &payouts {
                let pool = p.reward_pools.entry(token).or_insert(0);
                *pool = sub_u64(*pool, amount)?;
            }
            p.events.push(Event::SnapshotRewardsRedeemed {
                account: caller,
                epoch,
                payouts: payouts.clone(),
            });
            Ok(payouts)
        })
    }

    /// Burns the caller's reward futures for `epoch` and pays their pro-rata
    /// share of every remaining futures pool.
    pub fn redeem_futures_rewards(
        &mut self,
        caller: AccountId,
        epoch: EpochId,
    ) -> Result<Vec<(TokenId, u64)>> {
        self.guarded(|p| {
            p.ensure_active()?;
            let balance = p.reward_futures.balance_of(caller, epoch.0);
            let supply = p.reward_futures.supply_of(epoch.0);
            let payouts = p.rewards.redeem_futures(epoch, balance, supply)?;
            p.reward_futures.burn(caller, epoch.0, balance)?;
            for &(token, amount) in &payouts {
                if amount == 0 {
                    continue;
                }
                let pool = p.reward_pools.entry(token).or_insert(0);
                *pool = sub_u64(*pool, amount)?;
            }
            p.events.push(Event::FuturesRewardsRedeemed {
                account: caller,
                epoch,
                payouts: payouts.clone(),
            });
            Ok(payouts)
        })
    }

    // ---- administration ----

    pub fn set_paused(&mut self, caller: AccountId, paused: bool) -> Result<()> {
        self.ensure_owner(caller)?;
        self.paused = paused;
        self.events.push(Event::PauseSet { paused });
        tracing::info!(paused, "pause state changed");
        Ok(())
    }

    pub fn set_owner(&mut self, caller: AccountId, owner: AccountId) -> Result<()> {
        self.ensure_owner(caller)?;
        if owner == AccountId::ZERO {
            return Err(VaultError::ZeroAddress);
        }
        self.owner = owner;
        self.events.push(Event::OwnerChanged { owner });
        tracing::info!(%owner, "owner changed");
        Ok(())
    }

    /// Queues a fee change, effective one epoch from `now`.
    pub fn queue_fee_change(
        &mut self,
        caller: AccountId,
        kind: FeeKind,
        rate: FeeRate,
        now: u64,
    ) -> Result<u64> {
        self.ensure_owner(caller)?;
        let effective = self
            .fees
            .queue_change(kind, rate, now, self.params.epoch_duration())?;
        self.events.push(Event::FeeQueued {
            kind,
            rate,
            effective,
        });
        Ok(effective)
    }

    /// Commits a matured fee change. Callable by anyone.
    pub fn apply_fee_change(&mut self, kind: FeeKind, now: u64) -> Result<FeeRate> {
        let rate = self.fees.apply(kind, now)?;
        self.events.push(Event::FeeSet { kind, rate });
        Ok(rate)
    }

    // ---- internals ----

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.entered {
            return Err(VaultError::Reentrant);
        }
        self.entered = true;
        let out = f(self);
        self.entered = false;
        out
    }

    fn ensure_active(&self) -> Result<()> {
        if self.paused {
            return Err(VaultError::Paused);
        }
        Ok(())
    }

    fn ensure_owner(&self, caller: AccountId) -> Result<()> {
        if caller != self.owner {
            return Err(VaultError::Unauthorized);
        }
        Ok(())
    }

    fn futures_mut(&mut self, kind: FuturesKind) -> &mut PositionLedger {
        match kind {
            FuturesKind::Vote => &mut self.vote_futures,
            FuturesKind::Reward => &mut self.reward_futures,
        }
    }

    /// Binds the current epoch to a fresh snapshot on first use.
    fn snapshot_inner(&mut self, now: u64) -> Result<u64> {
        let epoch = epoch_of(now, self.params.epoch_duration())?;
        if let Some(id) = self.epoch_snapshots.get(&epoch) {
            return Ok(*id);
        }
        let id = self.vault.ledger_mut().snapshot()?;
        self.rewards.ensure_epoch(epoch, id)?;
        self.epoch_snapshots.insert(epoch, id);
        self.events.push(Event::SnapshotTaken {
            epoch,
            snapshot_id: id,
        });
        Ok(id)
    }
}

/// Overflow pre-check for a future mint, so commit phases cannot fail.
fn check_mint(ledger: &PositionLedger, to: AccountId, id: u64, amount: u64) -> Result<()> {
    add_u64(ledger.balance_of(to, id), amount)?;
    add_u64(ledger.supply_of(id), amount)?;
    Ok(())
}
