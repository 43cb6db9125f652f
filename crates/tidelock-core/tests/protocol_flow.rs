//! End-to-end protocol flows against in-memory collaborators.

use tidelock_core::testing::{
    merkle_proof, merkle_root, stash_leaf, FailingFeeDistributor, InMemoryLocker,
    MerkleRewardStash, RecordingFeeDistributor,
};
use tidelock_core::{
    AccountId, EpochId, FeeKind, FuturesKind, Hash32, Locker, Protocol, ProtocolParams,
    RuntimeBounds, TokenId, VaultError,
};

const EPOCH: u64 = 1_209_600;
const LOCK: u64 = EPOCH * 4;

fn acct(n: u8) -> AccountId {
    AccountId(Hash32([n; 32]))
}

fn token(n: u8) -> TokenId {
    TokenId(Hash32([n; 32]))
}

const OWNER: u8 = 0xAA;
const UNDERLYING: u8 = 0x02;
const REWARD: u8 = 0x10;

fn setup() -> (Protocol, InMemoryLocker, RecordingFeeDistributor) {
    let protocol = Protocol::new(
        ProtocolParams::standard(),
        RuntimeBounds::default(),
        acct(OWNER),
        acct(0xFE),
        acct(0x5E),
        token(0x01),
        token(UNDERLYING),
    )
    .unwrap();
    let locker = InMemoryLocker::with_lock_duration(token(UNDERLYING), LOCK);
    (protocol, locker, RecordingFeeDistributor::new())
}

#[test]
fn deposit_reward_snapshot_redeem_conserves_every_unit() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 300, 0).unwrap();
    p.deposit(&mut locker, acct(2), 700, 0).unwrap();

    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();

    let epoch = EpochId(EPOCH);
    // 4% reward fee, no reward futures: the rest is all snapshot share.
    assert_eq!(fees.total_for(token(REWARD)), 40);
    assert_eq!(p.reward_pool(token(REWARD)), 960);

    let out1 = p.redeem_snapshot_rewards(acct(1), epoch, &[0]).unwrap();
    let out2 = p.redeem_snapshot_rewards(acct(2), epoch, &[0]).unwrap();
    assert_eq!(out1, vec![(token(REWARD), 288)]);
    assert_eq!(out2, vec![(token(REWARD), 672)]);
    assert_eq!(p.reward_pool(token(REWARD)), 0);
    // fee + payouts == amount received
    assert_eq!(40 + 288 + 672, 1_000);

    // Same index cannot be redeemed twice.
    assert!(matches!(
        p.redeem_snapshot_rewards(acct(1), epoch, &[0]),
        Err(VaultError::AlreadyRedeemed { index: 0, .. })
    ));
}

#[test]
fn snapshot_balances_survive_later_staking() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();

    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 500);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();

    // Staking everything after the snapshot must not affect the snapshot
    // share already earned for this epoch.
    p.stake(acct(1), FuturesKind::Vote, 1, 1_000, EPOCH).unwrap();
    assert_eq!(p.vault().ledger().balance_of(acct(1)), 0);

    let out = p
        .redeem_snapshot_rewards(acct(1), EpochId(EPOCH), &[0])
        .unwrap();
    assert_eq!(out, vec![(token(REWARD), 480)]);
}

#[test]
fn reward_split_between_snapshot_and_futures_is_exact() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    // 600 shares staked for one round: reward futures live in epoch 1.
    p.stake(acct(1), FuturesKind::Reward, 1, 600, 0).unwrap();

    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();

    let epoch = EpochId(EPOCH);
    let record = p.reward_engine().record_of(epoch).unwrap();
    // fee 40, distributable 960; S=400 live shares, F=600 futures:
    // snapshot floor(960*400/1000)=384, futures 960-384=576.
    assert_eq!(record.snapshot_rewards(), &[384]);
    assert_eq!(record.futures_rewards(), &[576]);

    let snap = p.redeem_snapshot_rewards(acct(1), epoch, &[0]).unwrap();
    assert_eq!(snap, vec![(token(REWARD), 384)]);
    let fut = p.redeem_futures_rewards(acct(1), epoch).unwrap();
    assert_eq!(fut, vec![(token(REWARD), 576)]);
    // Futures are burned by redemption.
    assert_eq!(p.futures(FuturesKind::Reward).balance_of(acct(1), EPOCH), 0);
    assert_eq!(p.reward_pool(token(REWARD)), 0);
    assert_eq!(fees.total_for(token(REWARD)) + 384 + 576, 1_000);
}

#[test]
fn futures_pool_drains_across_multiple_redeemers() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 400, 0).unwrap();
    p.deposit(&mut locker, acct(2), 600, 0).unwrap();
    p.stake(acct(1), FuturesKind::Reward, 1, 400, 0).unwrap();
    p.stake(acct(2), FuturesKind::Reward, 1, 600, 0).unwrap();

    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();
    // All shares staked: S=0, F=1000, futures pool gets all 960.
    let epoch = EpochId(EPOCH);
    assert_eq!(
        p.reward_engine().record_of(epoch).unwrap().futures_rewards(),
        &[960]
    );

    let out1 = p.redeem_futures_rewards(acct(1), epoch).unwrap();
    assert_eq!(out1, vec![(token(REWARD), 384)]);
    // Second redeemer takes the whole remaining pool against the reduced
    // supply, with no dust stranded.
    let out2 = p.redeem_futures_rewards(acct(2), epoch).unwrap();
    assert_eq!(out2, vec![(token(REWARD), 576)]);
    assert_eq!(p.reward_pool(token(REWARD)), 0);
    assert!(matches!(
        p.redeem_futures_rewards(acct(1), epoch),
        Err(VaultError::InsufficientBalance { .. })
    ));
}

#[test]
fn redemption_lifecycle_with_linear_fee() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 10_000, 0).unwrap();

    let (unlock_time, promised) = p
        .initiate_redemption(&mut locker, &mut fees, acct(1), 0, 10_000, FuturesKind::Vote, 0)
        .unwrap();
    assert_eq!(unlock_time, LOCK);
    // wait = 4 epochs: rate = 50000 - floor(49000 * 4838400 / 10281600)
    //      = 26942, fee = floor(10000 * 26942 / 1e6) = 269.
    assert_eq!(promised, 9_731);
    assert_eq!(p.vault().ledger().balance_of(acct(1)), 0);
    assert_eq!(p.vault().ledger().balance_of(acct(0xFE)), 269);
    assert_eq!(p.pending_redemptions().balance_of(acct(1), LOCK), 9_731);
    // Vote futures minted on the pre-fee amount, one per waited epoch.
    for i in 1..=4u64 {
        assert_eq!(
            p.futures(FuturesKind::Vote).balance_of(acct(1), i * EPOCH),
            10_000
        );
    }
    // Fee shares reported to the distributor under the receipt token id.
    assert_eq!(fees.total_for(token(0x01)), 269);
    // Promised capital is carved out: rate unchanged by the initiation.
    assert_eq!(
        p.exchange_rate(&locker).unwrap(),
        p.params().base_unit()
    );

    // Too early.
    assert!(matches!(
        p.redeem(&mut locker, acct(1), LOCK, 9_731, LOCK - 1),
        Err(VaultError::BeforeUnlock { .. })
    ));

    locker.advance_to(LOCK);
    p.redeem(&mut locker, acct(1), LOCK, 9_731, LOCK).unwrap();
    assert_eq!(p.pending_redemptions().balance_of(acct(1), LOCK), 0);
    assert_eq!(p.queue().outstanding(), 0);
    // The fee's worth of underlying was re-locked and still backs the fee
    // collector's shares at an unchanged rate.
    assert_eq!(locker.total_custody(), 269);
    assert_eq!(p.free_underlying(), 0);
    assert_eq!(
        p.exchange_rate(&locker).unwrap(),
        p.params().base_unit()
    );
}

#[test]
fn redemption_allowance_is_bounded_by_the_lock_entry() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    // Second deposit later in the epoch creates a second lock entry.
    locker.advance_to(EPOCH);
    p.deposit(&mut locker, acct(2), 500, EPOCH).unwrap();

    // acct(2) tries to redeem 500 shares against entry 0 (amount 1000):
    // fine. acct(1) then cannot promise more than the remainder.
    p.initiate_redemption(&mut locker, &mut fees, acct(2), 0, 500, FuturesKind::Vote, EPOCH)
        .unwrap();
    let err = p
        .initiate_redemption(&mut locker, &mut fees, acct(1), 0, 600, FuturesKind::Vote, EPOCH)
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::InsufficientRedemptionAllowance { .. }
    ));
    // A smaller amount still fits.
    p.initiate_redemption(&mut locker, &mut fees, acct(1), 0, 400, FuturesKind::Vote, EPOCH)
        .unwrap();
}

#[test]
fn pending_redemption_cannot_be_double_spent() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    let (unlock_time, promised) = p
        .initiate_redemption(&mut locker, &mut fees, acct(1), 0, 1_000, FuturesKind::Vote, 0)
        .unwrap();
    locker.advance_to(unlock_time);
    p.redeem(&mut locker, acct(1), unlock_time, promised, unlock_time)
        .unwrap();
    assert!(matches!(
        p.redeem(&mut locker, acct(1), unlock_time, promised, unlock_time),
        Err(VaultError::InsufficientBalance { .. })
    ));
    // Nor can the batch path claim the same promise twice in one call.
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    let (unlock_time, promised) = p
        .initiate_redemption(&mut locker, &mut fees, acct(1), 0, 1_000, FuturesKind::Vote, 0)
        .unwrap();
    locker.advance_to(unlock_time);
    assert!(p
        .redeem_batch(
            &mut locker,
            acct(1),
            &[unlock_time, unlock_time],
            &[promised, promised],
            unlock_time,
        )
        .is_err());
    assert_eq!(p.pending_redemptions().balance_of(acct(1), unlock_time), promised);
}

#[test]
fn underlying_rewards_compound_the_exchange_rate() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    locker.advance_to(EPOCH);
    locker.push_reward(token(UNDERLYING), 500);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();

    // Not recorded as an epoch reward; backing grew 1000 -> 1500.
    assert!(p
        .reward_engine()
        .record_of(EpochId(EPOCH))
        .unwrap()
        .tokens()
        .is_empty());
    assert_eq!(p.free_underlying(), 500);
    assert_eq!(
        p.exchange_rate(&locker).unwrap(),
        p.params().base_unit() * 3 / 2
    );
}

#[test]
fn stash_claims_enter_the_epoch_record() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();

    let leaves: Vec<Hash32> = (0..4u64)
        .map(|i| stash_leaf(token(REWARD), i, 2_000))
        .collect();
    let mut stash = MerkleRewardStash::new(merkle_root(&leaves));
    let proof = merkle_proof(&leaves, 1);

    p.claim_stash_reward(
        &mut stash,
        &mut fees,
        acct(1),
        token(REWARD),
        1,
        2_000,
        &proof,
        EPOCH,
    )
    .unwrap();
    // fee 80 (4%), remainder all snapshot (no futures).
    assert_eq!(fees.total_for(token(REWARD)), 80);
    assert_eq!(p.reward_pool(token(REWARD)), 1_920);
    let out = p
        .redeem_snapshot_rewards(acct(1), EpochId(EPOCH), &[0])
        .unwrap();
    assert_eq!(out, vec![(token(REWARD), 1_920)]);

    // Replay of the same stash index fails before anything is recorded.
    let before = p.reward_engine().record_of(EpochId(EPOCH)).unwrap().tokens().len();
    assert!(p
        .claim_stash_reward(
            &mut stash,
            &mut fees,
            acct(1),
            token(REWARD),
            1,
            2_000,
            &proof,
            EPOCH,
        )
        .is_err());
    assert_eq!(
        p.reward_engine().record_of(EpochId(EPOCH)).unwrap().tokens().len(),
        before
    );
}

#[test]
fn fee_changes_are_delayed_one_epoch() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();

    let rate = tidelock_core::FeeRate::new(100_000).unwrap();
    let effective = p
        .queue_fee_change(acct(OWNER), FeeKind::Reward, rate, 10)
        .unwrap();
    assert_eq!(effective, 10 + EPOCH);

    // The old 4% rate applies until the change is committed.
    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();
    assert_eq!(fees.total_for(token(REWARD)), 40);

    p.apply_fee_change(FeeKind::Reward, effective).unwrap();
    locker.advance_to(2 * EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    p.claim_rewards(&mut locker, &mut fees, 2 * EPOCH).unwrap();
    assert_eq!(fees.total_for(token(REWARD)), 40 + 100);
}

#[test]
fn failed_fee_distribution_aborts_initiation_cleanly() {
    let (mut p, mut locker, _) = setup();
    p.deposit(&mut locker, acct(1), 10_000, 0).unwrap();
    let rate_before = p.exchange_rate(&locker).unwrap();

    let mut failing = FailingFeeDistributor;
    let err = p
        .initiate_redemption(&mut locker, &mut failing, acct(1), 0, 10_000, FuturesKind::Vote, 0)
        .unwrap_err();
    assert!(matches!(err, VaultError::Collaborator(_)));

    // Nothing committed: no promise, no burn, no pending position, no
    // futures, and the exchange rate is untouched.
    assert_eq!(p.queue().outstanding(), 0);
    assert_eq!(p.queue().promised_at(LOCK), 0);
    assert_eq!(p.vault().ledger().balance_of(acct(1)), 10_000);
    assert_eq!(p.vault().ledger().balance_of(acct(0xFE)), 0);
    assert_eq!(p.pending_redemptions().balance_of(acct(1), LOCK), 0);
    for i in 1..=4u64 {
        assert_eq!(p.futures(FuturesKind::Vote).balance_of(acct(1), i * EPOCH), 0);
    }
    assert_eq!(p.exchange_rate(&locker).unwrap(), rate_before);

    // A retry with a working distributor uses the full allowance.
    let mut fees = RecordingFeeDistributor::new();
    p.initiate_redemption(&mut locker, &mut fees, acct(1), 0, 10_000, FuturesKind::Vote, 0)
        .unwrap();
    assert_eq!(p.queue().promised_at(LOCK), 9_731);
}

#[test]
fn multi_index_redemption_emits_one_aggregate_event() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    locker.advance_to(EPOCH);
    locker.push_reward(token(REWARD), 1_000);
    locker.push_reward(token(REWARD + 1), 500);
    p.claim_rewards(&mut locker, &mut fees, EPOCH).unwrap();
    p.drain_events();

    let epoch = EpochId(EPOCH);
    let payouts = p.redeem_snapshot_rewards(acct(1), epoch, &[0, 1]).unwrap();
    assert_eq!(payouts.len(), 2);

    use tidelock_core::Event;
    let events = p.drain_events();
    let redeemed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::SnapshotRewardsRedeemed { .. }))
        .collect();
    assert_eq!(redeemed.len(), 1);
    assert!(matches!(
        *redeemed[0],
        Event::SnapshotRewardsRedeemed { account, ref payouts, .. }
            if account == acct(1) && payouts.len() == 2
    ));
}

#[test]
fn events_record_committed_operations_only() {
    let (mut p, mut locker, mut fees) = setup();
    p.deposit(&mut locker, acct(1), 1_000, 0).unwrap();
    let _ = p.initiate_redemption(&mut locker, &mut fees, acct(1), 0, 2_000, FuturesKind::Vote, 0);

    let events = p.drain_events();
    use tidelock_core::Event;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SnapshotTaken { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Deposited {
            assets: 1_000,
            shares: 1_000,
            ..
        }
    )));
    // The failed over-balance initiation left no event behind.
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::RedemptionInitiated { .. })));
    assert!(p.drain_events().is_empty());
}
