//! Structured event log.
//!
//! Every committed mutation appends exactly one event. Events are emitted
//! after state changes succeed, so a drained log is a faithful history of
//! committed operations only.

use serde::{Deserialize, Serialize};

use crate::math::FeeRate;
use crate::{AccountId, EpochId, FeeKind, FuturesKind, TokenId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Deposited {
        account: AccountId,
        assets: u64,
        shares: u64,
    },
    RedemptionInitiated {
        account: AccountId,
        unlock_time: u64,
        shares: u64,
        fee_shares: u64,
        post_fee_shares: u64,
    },
    Redeemed {
        account: AccountId,
        unlock_time: u64,
        assets: u64,
    },
    Staked {
        account: AccountId,
        kind: FuturesKind,
        expiry: EpochId,
        shares: u64,
        rounds: u64,
    },
    Unstaked {
        account: AccountId,
        expiry: EpochId,
        shares: u64,
    },
    FuturesExchanged {
        account: AccountId,
        epoch: EpochId,
        from: FuturesKind,
        amount: u64,
    },
    SnapshotTaken {
        epoch: EpochId,
        snapshot_id: u64,
    },
    RewardRecorded {
        epoch: EpochId,
        token: TokenId,
        received: u64,
        fee: u64,
        snapshot_share: u64,
        futures_share: u64,
    },
    SnapshotRewardsRedeemed {
        account: AccountId,
        epoch: EpochId,
        payouts: Vec<(TokenId, u64)>,
    },
    FuturesRewardsRedeemed {
        account: AccountId,
        epoch: EpochId,
        payouts: Vec<(TokenId, u64)>,
    },
    StashRewardClaimed {
        account: AccountId,
        token: TokenId,
        amount: u64,
        fee: u64,
    },
    FeeQueued {
        kind: FeeKind,
        rate: FeeRate,
        effective: u64,
    },
    FeeSet {
        kind: FeeKind,
        rate: FeeRate,
    },
    PauseSet {
        paused: bool,
    },
    OwnerChanged {
        owner: AccountId,
    },
}
