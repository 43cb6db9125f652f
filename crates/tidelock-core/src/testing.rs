//! In-memory collaborator implementations.
//!
//! Deterministic stand-ins for the external systems: a lock schedule with a
//! manual clock, a fee sink that records every call, and a Merkle-gated
//! reward stash. Used by the test suites and usable as scaffolding for
//! simulations.

use std::collections::BTreeSet;

use crate::hash::{merkle_node, sha256_domain, STASH_LEAF_DOMAIN_V1};
use crate::{
    AccountId, ClaimableReward, FeeDistributor, Hash32, LockedEntry, Locker, Result, RewardStash,
    TokenId, VaultError,
};

/// Locker with a manual clock and a fixed lock duration.
#[derive(Clone, Debug)]
pub struct InMemoryLocker {
    underlying: TokenId,
    now: u64,
    lock_duration: u64,
    entries: Vec<LockedEntry>,
    pending_rewards: Vec<ClaimableReward>,
}

impl InMemoryLocker {
    pub fn new(underlying: TokenId) -> Self {
        Self::with_lock_duration(underlying, 1_209_600 * 4)
    }

    pub fn with_lock_duration(underlying: TokenId, lock_duration: u64) -> Self {
        Self {
            underlying,
            now: 0,
            lock_duration,
            entries: Vec::new(),
            pending_rewards: Vec::new(),
        }
    }

    pub fn underlying(&self) -> TokenId {
        self.underlying
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Moves the clock forward. Time never goes backwards.
    pub fn advance_to(&mut self, now: u64) {
        assert!(now >= self.now, "clock moved backwards");
        self.now = now;
    }

    /// Makes a reward claimable on the next harvest.
    pub fn push_reward(&mut self, token: TokenId, amount: u64) {
        self.pending_rewards.push(ClaimableReward {
            token,
            amount,
            prior_balance: 0,
        });
    }

    fn push_entry(&mut self, amount: u64, unlock_time: u64) {
        // Merge with an existing entry at the same unlock time.
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.unlock_time == unlock_time)
        {
            entry.amount += amount;
        } else {
            self.entries.push(LockedEntry {
                amount,
                unlock_time,
            });
            self.entries.sort_by_key(|e| e.unlock_time);
        }
    }
}

impl Locker for InMemoryLocker {
    fn lock(&mut self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.push_entry(amount, self.now + self.lock_duration);
        Ok(())
    }

    fn unlock(&mut self) -> Result<u64> {
        let now = self.now;
        let released: u64 = self
            .entries
            .iter()
            .filter(|e| e.unlock_time <= now)
            .map(|e| e.amount)
            .sum();
        self.entries.retain(|e| e.unlock_time > now);
        Ok(released)
    }

    fn relock(&mut self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.push_entry(amount, self.now + self.lock_duration);
        Ok(())
    }

    fn locked_entries(&self) -> Vec<LockedEntry> {
        self.entries.clone()
    }

    fn total_custody(&self) -> u64 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    fn claimable_rewards(&self) -> Vec<ClaimableReward> {
        self.pending_rewards.clone()
    }

    fn claim_rewards(&mut self) -> Result<Vec<ClaimableReward>> {
        Ok(std::mem::take(&mut self.pending_rewards))
    }
}

/// Fee sink that records every distribution.
#[derive(Clone, Debug, Default)]
pub struct RecordingFeeDistributor {
    calls: Vec<(AccountId, TokenId, u64)>,
}

impl RecordingFeeDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[(AccountId, TokenId, u64)] {
        &self.calls
    }

    pub fn total_for(&self, token: TokenId) -> u64 {
        self.calls
            .iter()
            .filter(|(_, t, _)| *t == token)
            .map(|(_, _, a)| a)
            .sum()
    }
}

impl FeeDistributor for RecordingFeeDistributor {
    fn distribute_fees(&mut self, from: AccountId, token: TokenId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.calls.push((from, token, amount));
        Ok(())
    }
}

/// Fee sink that always fails, for abort-path tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingFeeDistributor;

impl FeeDistributor for FailingFeeDistributor {
    fn distribute_fees(&mut self, _from: AccountId, _token: TokenId, _amount: u64) -> Result<()> {
        Err(VaultError::Collaborator("fee sink unavailable".into()))
    }
}

/// Leaf hash for a stash claim: binds token, claim index, and amount.
pub fn stash_leaf(token: TokenId, index: u64, amount: u64) -> Hash32 {
    let mut bytes = Vec::with_capacity(48);
    bytes.extend_from_slice(&token.0 .0);
    bytes.extend_from_slice(&index.to_be_bytes());
    bytes.extend_from_slice(&amount.to_be_bytes());
    sha256_domain(STASH_LEAF_DOMAIN_V1, &bytes)
}

/// Root of a sorted-pair Merkle tree; odd nodes are promoted unhashed.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    assert!(!leaves.is_empty(), "empty tree");
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    merkle_node(pair[0], pair[1])
                } else {
                    pair[0]
                }
            })
            .collect();
    }
    level[0]
}

/// Sibling path for `index`, matching [`merkle_root`].
pub fn merkle_proof(leaves: &[Hash32], index: usize) -> Vec<Hash32> {
    assert!(index < leaves.len());
    let mut proof = Vec::new();
    let mut level = leaves.to_vec();
    let mut idx = index;
    while level.len() > 1 {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            proof.push(level[sibling]);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 2 {
                    merkle_node(pair[0], pair[1])
                } else {
                    pair[0]
                }
            })
            .collect();
        idx /= 2;
    }
    proof
}

/// Merkle-proof-gated reward source. Each (token, index) pair pays once.
#[derive(Clone, Debug)]
pub struct MerkleRewardStash {
    root: Hash32,
    consumed: BTreeSet<(TokenId, u64)>,
    payouts: Vec<(AccountId, TokenId, u64)>,
}

impl MerkleRewardStash {
    pub fn new(root: Hash32) -> Self {
        Self {
            root,
            consumed: BTreeSet::new(),
            payouts: Vec::new(),
        }
    }

    pub fn payouts(&self) -> &[(AccountId, TokenId, u64)] {
        &self.payouts
    }
}

impl RewardStash for MerkleRewardStash {
    fn claim(
        &mut self,
        token: TokenId,
        index: u64,
        recipient: AccountId,
        amount: u64,
        proof: &[Hash32],
    ) -> Result<()> {
        if self.consumed.contains(&(token, index)) {
            return Err(VaultError::InvalidInput(
                "stash claim already consumed".into(),
            ));
        }
        let mut node = stash_leaf(token, index, amount);
        for &sibling in proof {
            node = merkle_node(node, sibling);
        }
        if node != self.root {
            return Err(VaultError::InvalidInput("invalid stash proof".into()));
        }
        self.consumed.insert((token, index));
        self.payouts.push((recipient, token, amount));
        Ok(())
    }
}
