//! End-to-end scenarios through the protocol façade.
//!
//! Each test walks real locks, votes, epoch lifecycle, and claims, checking
//! the externally visible numbers (voting power, payouts, custody balances)
//! rather than internal state.

use ebb_core::constants::{EPOCH_LENGTH, MAX_LOCK_DURATION};
use ebb_core::error::{EbbError, EpochError};
use ebb_core::traits::VotingPower;
use ebb_core::types::{AssetKind, PoolId, Track};
use ebb_tests::helpers::*;

const E: u64 = EPOCH_LENGTH;

// --- decay scenarios ---

#[test]
fn min_and_max_duration_locks_scale_linearly() {
    let (mut p, _access) = protocol(0);
    // Principal equal to the max duration gives slope exactly 1.
    let principal = MAX_LOCK_DURATION;
    p.create_lock(0, acct(1), 104 * E, principal, 0, None).unwrap();
    p.create_lock(0, acct(2), 2 * E, principal, 0, None).unwrap();

    let ledger = p.ledger();
    // A max-duration lock starts at full principal weight.
    assert_eq!(ledger.personal_power(&acct(1), 0), principal as u128);
    // A 2-epoch lock starts at 2/104 of it.
    assert_eq!(ledger.personal_power(&acct(2), 0), (2 * E) as u128);
    // Both decay to exactly zero at their expiries.
    assert_eq!(ledger.personal_power(&acct(2), 2 * E), 0);
    assert_eq!(ledger.personal_power(&acct(1), 104 * E), 0);
    // Midway through, the max lock is at half weight.
    assert_eq!(ledger.personal_power(&acct(1), 52 * E), (52 * E) as u128);
}

// --- vote casting and migration ---

#[test]
fn cast_thirty_migrate_ten() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1), PoolId(2)]).unwrap();
    p.create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, None).unwrap();

    p.cast_vote(10, acct(1), PoolId(1), 30, false).unwrap();
    p.migrate_votes(20, acct(1), PoolId(1), PoolId(2), 10, false).unwrap();

    let book = p.engine().book(0).unwrap();
    assert_eq!(book.personal_votes(&acct(1), PoolId(1)), 20);
    assert_eq!(book.personal_votes(&acct(1), PoolId(2)), 10);
    // The account's spent total is unchanged by the migration.
    assert_eq!(book.spent(&acct(1)).personal, 30);
    assert_eq!(book.total_votes(), 30);

    finalize_current(&mut p, E, &[(PoolId(1), 200, 0), (PoolId(2), 100, 0)]);
    // Sole voter on both pools: claims pay the full allocations.
    let results = p.claim_reward(acct(1), 0, &[PoolId(1), PoolId(2)]).unwrap();
    assert_eq!(results[0].1.as_ref().unwrap(), &200);
    assert_eq!(results[1].1.as_ref().unwrap(), &100);
    assert_eq!(p.custody_balance(AssetKind::Reward), 0);
}

// --- claim splits ---

#[test]
fn quarter_split_pays_exactly() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, None).unwrap();
    p.create_lock(0, acct(2), 104 * E, MAX_LOCK_DURATION, 0, None).unwrap();

    p.cast_vote(10, acct(1), PoolId(1), 25, false).unwrap();
    p.cast_vote(10, acct(2), PoolId(1), 75, false).unwrap();
    finalize_current(&mut p, E, &[(PoolId(1), 1_000, 0)]);

    let r1 = p.claim_reward(acct(1), 0, &[PoolId(1)]).unwrap();
    let r2 = p.claim_reward(acct(2), 0, &[PoolId(1)]).unwrap();
    assert_eq!(r1[0].1.as_ref().unwrap(), &250);
    assert_eq!(r2[0].1.as_ref().unwrap(), &750);
    // Nothing stranded: the split was exact.
    assert_eq!(p.custody_balance(AssetKind::Reward), 0);
}

#[test]
fn third_split_remainder_is_swept_not_lost() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    for seed in 1..=3 {
        p.create_lock(0, acct(seed), 104 * E, MAX_LOCK_DURATION, 0, None).unwrap();
        p.cast_vote(10, acct(seed), PoolId(1), 1, false).unwrap();
    }
    finalize_current(&mut p, E, &[(PoolId(1), 100, 0)]);

    for seed in 1..=3 {
        let r = p.claim_reward(acct(seed), 0, &[PoolId(1)]).unwrap();
        assert_eq!(r[0].1.as_ref().unwrap(), &33);
    }
    // One unit of truncation dust remains in custody.
    assert_eq!(p.custody_balance(AssetKind::Reward), 1);

    // Cooldown holds, then the collector takes exactly the dust.
    let finalized_at = E;
    let ready = finalized_at + 4 * E;
    assert!(matches!(
        p.sweep_epoch(ready - 1, admin(), 0, Track::Reward).unwrap_err(),
        EbbError::Epoch(EpochError::SweepCooldown { .. })
    ));
    let swept = p.sweep_epoch(ready, admin(), 0, Track::Reward).unwrap();
    assert_eq!(swept, 1);
    assert_eq!(p.custody_balance(AssetKind::Reward), 0);
}

// --- delegation across epochs ---

#[test]
fn delegate_fee_increase_waits_two_epochs() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.register_delegate(acct(9), 1_000).unwrap();
    p.create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, Some(acct(9))).unwrap();

    // Epoch 0: vote, then request an increase (activates at epoch 2).
    p.cast_vote(10, acct(9), PoolId(1), 100, true).unwrap();
    p.update_delegate_fee(acct(9), 3_000).unwrap();
    finalize_current(&mut p, E, &[(PoolId(1), 0, 0)]);

    // Epoch 1: snapshot still carries the old fee.
    p.cast_vote(E + 10, acct(9), PoolId(1), 100, true).unwrap();
    assert_eq!(
        p.engine().book(1).unwrap().delegate_snapshot(&acct(9)).unwrap().fee_bps,
        1_000
    );
    finalize_current(&mut p, 2 * E, &[(PoolId(1), 0, 0)]);

    // Epoch 2: the increase is in force.
    p.cast_vote(2 * E + 10, acct(9), PoolId(1), 100, true).unwrap();
    assert_eq!(
        p.engine().book(2).unwrap().delegate_snapshot(&acct(9)).unwrap().fee_bps,
        3_000
    );
}

#[test]
fn delegated_rewards_split_between_owner_and_delegate() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.register_delegate(acct(9), 2_500).unwrap();
    p.create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, Some(acct(9))).unwrap();

    let dpower = p.ledger().delegated_power(&acct(9), E);
    p.cast_vote(10, acct(9), PoolId(1), dpower, true).unwrap();
    finalize_current(&mut p, E, &[(PoolId(1), 1_000, 0)]);

    // Fee 25% of the pool's delegated gross; the sole owner takes the rest.
    let fee = p.claim_delegate_fee(acct(9), 0, &[PoolId(1)]).unwrap();
    assert_eq!(fee[0].1.as_ref().unwrap(), &250);
    let share = p.claim_delegated_reward(acct(1), acct(9), 0, &[PoolId(1)]).unwrap();
    assert_eq!(share[0].1.as_ref().unwrap(), &750);
    assert_eq!(p.custody_balance(AssetKind::Reward), 0);
}

#[test]
fn owner_share_survives_later_redelegation() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.register_delegate(acct(9), 0).unwrap();
    p.register_delegate(acct(8), 0).unwrap();
    let lock = p
        .create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, Some(acct(9)))
        .unwrap();

    let dpower = p.ledger().delegated_power(&acct(9), E);
    p.cast_vote(10, acct(9), PoolId(1), dpower, true).unwrap();
    finalize_current(&mut p, E, &[(PoolId(1), 600, 0)]);

    // Epoch 1: owner switches delegates. The epoch-0 claim still values the
    // lock against acct(9) as of epoch 0's end.
    p.set_delegate(E + 5, acct(1), lock, Some(acct(8))).unwrap();
    let share = p.claim_delegated_reward(acct(1), acct(9), 0, &[PoolId(1)]).unwrap();
    assert_eq!(share[0].1.as_ref().unwrap(), &600);
    // And there is nothing to claim against the new delegate for epoch 0.
    let none = p.claim_delegated_reward(acct(1), acct(8), 0, &[PoolId(1)]).unwrap();
    assert_eq!(none[0].1.as_ref().unwrap_err(), &EpochError::NothingToClaim);
}

// --- cross-epoch solvency ---

#[test]
fn finalize_requires_cumulative_funding() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.create_lock(0, acct(1), 104 * E, MAX_LOCK_DURATION, 0, None).unwrap();

    // Epoch 0: allocate 100, fund, finalize, but leave it unclaimed.
    p.cast_vote(10, acct(1), PoolId(1), 10, false).unwrap();
    finalize_current(&mut p, E, &[(PoolId(1), 100, 0)]);

    // Epoch 1: allocate 50 more. Custody still holds epoch 0's 100, but
    // finalize must count both epochs' outstanding claims.
    p.cast_vote(E + 10, acct(1), PoolId(1), 10, false).unwrap();
    p.end_epoch(2 * E, admin()).unwrap();
    p.process_verifier_checks(admin(), 1, true, vec![]).unwrap();
    p.process_rewards_and_subsidies(admin(), 1, &[(PoolId(1), 50, 0)]).unwrap();
    assert_eq!(
        p.finalize_epoch(2 * E, admin(), 1).unwrap_err(),
        EbbError::Epoch(EpochError::Insolvent { have: 100, need: 150 }),
    );
    p.fund_track(admin(), Track::Reward, 50).unwrap();
    p.finalize_epoch(2 * E, admin(), 1).unwrap();

    // Both epochs pay out in full.
    let r0 = p.claim_reward(acct(1), 0, &[PoolId(1)]).unwrap();
    let r1 = p.claim_reward(acct(1), 1, &[PoolId(1)]).unwrap();
    assert_eq!(r0[0].1.as_ref().unwrap(), &100);
    assert_eq!(r1[0].1.as_ref().unwrap(), &50);
    assert_eq!(p.custody_balance(AssetKind::Reward), 0);
}

// --- pool lifecycle gating ---

#[test]
fn pool_changes_wait_for_previous_finalization() {
    let (mut p, _access) = protocol(0);
    p.create_pools(admin(), &[PoolId(1)]).unwrap();
    p.end_epoch(E, admin()).unwrap();

    assert_eq!(
        p.create_pools(admin(), &[PoolId(2)]).unwrap_err(),
        EbbError::Epoch(EpochError::PreviousEpochNotFinalized(0)),
    );
    p.force_finalize_epoch(E, admin(), 0).unwrap();
    let results = p.create_pools(admin(), &[PoolId(2)]).unwrap();
    assert_eq!(results[0], (PoolId(2), Ok(())));
}
