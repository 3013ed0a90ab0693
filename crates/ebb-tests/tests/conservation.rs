//! Randomized conservation properties across the escrow and epoch crates.

use proptest::prelude::*;

use ebb_core::constants::{EPOCH_LENGTH, MAX_LOCK_DURATION};
use ebb_core::custody::MemoryCustody;
use ebb_core::traits::{DelegateDirectory, VotingPower};
use ebb_core::types::{AccountId, AssetKind, PoolId, Timestamp, Track};
use ebb_epoch::EpochEngine;
use ebb_escrow::EscrowLedger;

const E: u64 = EPOCH_LENGTH;

fn acct(seed: u8) -> AccountId {
    AccountId([seed; 32])
}

/// Unbounded personal power so random vote amounts never hit the cap.
struct AmplePower;

impl VotingPower for AmplePower {
    fn personal_power(&self, _account: &AccountId, _at: Timestamp) -> u128 {
        u128::MAX / 4
    }
    fn delegated_power(&self, _account: &AccountId, _at: Timestamp) -> u128 {
        0
    }
    fn total_power(&self, _at: Timestamp) -> u128 {
        u128::MAX / 4
    }
}

struct NoDelegates;

impl DelegateDirectory for NoDelegates {
    fn is_registered(&self, _account: &AccountId) -> bool {
        false
    }
}

/// A random voting session: (account seed, pool index, amount).
fn votes_strategy() -> impl Strategy<Value = Vec<(u8, u64, u128)>> {
    prop::collection::vec((1u8..=12, 1u64..=4, 1u128..=10_000), 1..60)
}

proptest! {
    // Vote conservation: every pool's total equals the sum of its entries,
    // and every account's spent total equals the sum of its per-pool votes.
    #[test]
    fn vote_totals_are_conserved(votes in votes_strategy()) {
        let mut engine = EpochEngine::new(0);
        engine.create_pools(&[PoolId(1), PoolId(2), PoolId(3), PoolId(4)]).unwrap();
        for &(seed, pool, amount) in &votes {
            engine.cast_vote(&AmplePower, 10, &acct(seed), PoolId(pool), amount, false).unwrap();
        }

        let book = engine.book(0).unwrap();
        let mut by_account_total = 0u128;
        for pool in 1..=4u64 {
            if let Some(tally) = book.tally(PoolId(pool)) {
                let entries: u128 = tally.by_account.values().sum::<u128>()
                    + tally.by_delegate.values().sum::<u128>();
                prop_assert_eq!(tally.total, entries);
                by_account_total += tally.total;
            }
        }
        let spent_total: u128 = (1..=12u8).map(|s| book.spent(&acct(s)).personal).sum();
        prop_assert_eq!(by_account_total, spent_total);
        prop_assert_eq!(book.total_votes(), spent_total);
    }

    // No over-claim: whatever the vote distribution, the sum of all claims
    // never exceeds the allocation, and sweep closes the books exactly.
    #[test]
    fn claims_never_exceed_allocation(
        votes in votes_strategy(),
        allocation in 1u64..1_000_000,
    ) {
        let mut engine = EpochEngine::new(0);
        engine.create_pools(&[PoolId(1), PoolId(2), PoolId(3), PoolId(4)]).unwrap();
        for &(seed, pool, amount) in &votes {
            engine.cast_vote(&AmplePower, 10, &acct(seed), PoolId(pool), amount, false).unwrap();
        }
        engine.end_epoch(E).unwrap();
        engine.process_verifier_checks(0, true, vec![]).unwrap();

        // Allocate only to pools that got votes; the rest close at zero.
        let book = engine.book(0).unwrap();
        let items: Vec<(PoolId, u64, u64)> = (1..=4u64)
            .map(|p| {
                let pool = PoolId(p);
                if book.pool_votes(pool) > 0 { (pool, allocation, 0) } else { (pool, 0, 0) }
            })
            .collect();
        engine.process_rewards_and_subsidies(0, &items).unwrap();
        let allocated: u64 = items.iter().map(|i| i.1).sum();
        let mut custody = MemoryCustody::new();
        custody.fund(AssetKind::Reward, allocated);
        engine.finalize_epoch(0, E, &custody).unwrap();

        let pools = [PoolId(1), PoolId(2), PoolId(3), PoolId(4)];
        let mut claimed_total = 0u64;
        for seed in 1..=12u8 {
            let results = engine.claim_reward(&acct(seed), 0, &pools).unwrap();
            claimed_total += results
                .iter()
                .filter_map(|(_, r)| r.as_ref().ok().copied())
                .sum::<u64>();
        }
        prop_assert!(claimed_total <= allocated);

        let epoch = engine.epoch(0).unwrap();
        prop_assert_eq!(epoch.reward.claimed, claimed_total);
        prop_assert!(epoch.reward.claimed <= epoch.reward.deposited);

        // After the sweep, claimed + withdrawn equals deposited exactly.
        let swept = engine.sweep_epoch(0, Track::Reward, E + 4 * E).unwrap();
        let epoch = engine.epoch(0).unwrap();
        prop_assert_eq!(epoch.reward.claimed + epoch.reward.withdrawn, epoch.reward.deposited);
        prop_assert_eq!(swept, allocated - claimed_total);
    }

    // Decay correctness: with principal a multiple of the max duration the
    // slope is exact, so the stepwise power values are exact too.
    #[test]
    fn decay_is_exact_for_aligned_principal(
        multiplier in 1u64..100,
        k in 0u64..=104,
    ) {
        let principal = multiplier * MAX_LOCK_DURATION;
        let mut ledger = EscrowLedger::new();
        ledger
            .create_lock(0, acct(1), 104 * E, principal, 0, None, &NoDelegates)
            .unwrap();

        // At expiry − k·E the remaining power is (P/D)·k·E.
        let at = 104 * E - k * E;
        let expected = (principal as u128 / MAX_LOCK_DURATION as u128) * (k * E) as u128;
        prop_assert_eq!(ledger.personal_power(&acct(1), at), expected);
    }
}
