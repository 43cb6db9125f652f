//! Tidelock core: tokenized-vault accounting with epoch reward distribution
//! and time-locked redemptions.
//!
//! Design goals:
//! - Deterministic and bounded arithmetic (u128 intermediates, floor division)
//! - Fail-closed on malformed inputs (callers validate at boundaries)
//! - IO-free core (pure state machine); collaborators provide custody/disbursement
//! - Validate-then-commit inside every mutating operation (no partial state)

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bounds;
pub mod events;
pub mod fees;
pub mod hash;
pub mod math;
pub mod orchestrator;
pub mod params;
pub mod position;
pub mod queue;
pub mod rewards;
pub mod snapshot;
pub mod testing;
pub mod vault;

pub use bounds::RuntimeBounds;
pub use events::Event;
pub use fees::{FeeKind, FeeScheduler};
pub use math::{FeeRate, FEE_DENOMINATOR};
pub use orchestrator::Protocol;
pub use params::ProtocolParams;
pub use position::PositionLedger;
pub use queue::RedemptionQueue;
pub use rewards::{EpochRewardEngine, RewardSplit};
pub use snapshot::SnapshotLedger;
pub use vault::ReceiptVault;

/// 32-byte hash newtype used for identities (accounts, tokens, proofs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Holder identity on the ledgers.
///
/// `AccountId::ZERO` is the reserved null identity; minting to it is rejected
/// fail-closed (it is the sink address burns are conceptually sent to).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct AccountId(pub Hash32);

impl AccountId {
    pub const ZERO: AccountId = AccountId(Hash32([0u8; 32]));
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an external reward/fee token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct TokenId(pub Hash32);

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Epoch identifier: a timestamp rounded down to a multiple of the epoch
/// duration (see [`math::epoch_of`]).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct EpochId(pub u64);

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two futures flavors. Both share the epoch-id keyspace but live on
/// separate balance tables; only reward futures participate in the
/// reward-split denominator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuturesKind {
    Vote,
    Reward,
}

impl FuturesKind {
    pub fn other(self) -> FuturesKind {
        match self {
            FuturesKind::Vote => FuturesKind::Reward,
            FuturesKind::Reward => FuturesKind::Vote,
        }
    }
}

/// Unified error type for all core operations.
///
/// Every failure is an atomic abort: no partial state is ever committed, and
/// none of these are retried internally.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("zero amount")]
    ZeroAmount,

    #[error("zero address")]
    ZeroAddress,

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("already redeemed: epoch {epoch}, reward index {index}")]
    AlreadyRedeemed { epoch: EpochId, index: usize },

    #[error(
        "insufficient redemption allowance at unlock {unlock_time}: \
         promised {promised}, unlockable {unlockable}"
    )]
    InsufficientRedemptionAllowance {
        unlock_time: u64,
        promised: u64,
        unlockable: u64,
    },

    #[error("before unlock: unlock time {unlock_time} > now {now}")]
    BeforeUnlock { unlock_time: u64, now: u64 },

    #[error("before staking expiry: expiry {expiry} > now {now}")]
    BeforeStakingExpiry { expiry: EpochId, now: u64 },

    #[error("before effective timestamp: effective {effective} > now {now}")]
    BeforeEffectiveTimestamp { effective: u64, now: u64 },

    #[error("past exchange period: epoch {epoch}")]
    PastExchangePeriod { epoch: EpochId },

    #[error("snapshot required for epoch {epoch}")]
    SnapshotRequired { epoch: EpochId },

    #[error("no rewards recorded for epoch {epoch}")]
    NoRewards { epoch: EpochId },

    #[error("invalid fee rate: {rate} > {max}")]
    InvalidFeeRate { rate: u64, max: u64 },

    #[error("mismatched array lengths: {left} != {right}")]
    MismatchedArrayLengths { left: usize, right: usize },

    #[error("empty array")]
    EmptyArray,

    #[error("paused")]
    Paused,

    #[error("reentrant call")]
    Reentrant,

    #[error("unauthorized caller")]
    Unauthorized,

    #[error("unknown snapshot id {0}")]
    UnknownSnapshotId(u64),

    #[error("bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("u64 overflow in {0}")]
    Overflow(&'static str),

    #[error("u64 underflow in {0}")]
    Underflow(&'static str),

    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// One entry of the Locker's lock table: `amount` of underlying becomes
/// withdrawable at `unlock_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedEntry {
    pub amount: u64,
    pub unlock_time: u64,
}

/// One claimable misc reward as reported by the Locker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableReward {
    pub token: TokenId,
    pub amount: u64,
    pub prior_balance: u64,
}

/// External locking/voting system that custodies the base asset.
///
/// Contract: all calls are synchronous and may fail; the orchestrator performs
/// them before committing internal state so a failure unwinds the whole
/// operation.
pub trait Locker {
    /// Locks `amount` of underlying pulled from the caller's custody.
    fn lock(&mut self, amount: u64) -> Result<()>;

    /// Releases every matured lock entry; returns the amount made liquid.
    fn unlock(&mut self) -> Result<u64>;

    /// Re-locks `amount` of liquid underlying so unredeemed capital keeps
    /// earning yield.
    fn relock(&mut self, amount: u64) -> Result<()>;

    /// Ordered list of lock entries (amount, unlock time).
    fn locked_entries(&self) -> Vec<LockedEntry>;

    /// Total underlying currently custodied for the protocol (locked plus
    /// matured-but-not-yet-unlocked).
    fn total_custody(&self) -> u64;

    /// Misc rewards claimable right now, without claiming them.
    fn claimable_rewards(&self) -> Vec<ClaimableReward>;

    /// Claims all misc rewards; returns what was paid out.
    fn claim_rewards(&mut self) -> Result<Vec<ClaimableReward>>;
}

/// Fee-splitting disbursement sink: pulls `amount` of `token` from `from` and
/// forwards it to fixed stakeholder shares.
pub trait FeeDistributor {
    fn distribute_fees(&mut self, from: AccountId, token: TokenId, amount: u64) -> Result<()>;
}

/// Merkle-proof-gated reward claim source.
///
/// `claim` verifies a membership proof and pays `amount` of `token` to
/// `recipient`; it fails if the proof is invalid or already consumed.
pub trait RewardStash {
    fn claim(
        &mut self,
        token: TokenId,
        index: u64,
        recipient: AccountId,
        amount: u64,
        proof: &[Hash32],
    ) -> Result<()>;
}
