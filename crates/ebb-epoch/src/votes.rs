//! Per-epoch vote bookkeeping.
//!
//! A [`VoteBook`] records who voted what on which pool during a single
//! epoch, split into personal votes and votes a delegate spent from power
//! delegated to them. It also carries per-delegate snapshots (total
//! delegated power and fee, fixed at the delegate's first vote of the
//! epoch), per-pool allocation outcomes written at processing time, and
//! the claim flags that make every payout once-only.
//!
//! Invariant: for each pool, `tally.total` equals the sum of its
//! `by_account` and `by_delegate` entries, and the sum of all tallies
//! equals the sum of all spent counters.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use ebb_core::error::EpochError;
use ebb_core::types::{AccountId, EpochId, PoolId};

/// Which budget a vote is spent from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteSource {
    Personal,
    Delegated,
}

/// Running tally for one pool in one epoch.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PoolTally {
    pub total: u128,
    pub by_account: HashMap<AccountId, u128>,
    pub by_delegate: HashMap<AccountId, u128>,
}

/// Votes an account has spent this epoch, per budget.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
pub struct SpentVotes {
    pub personal: u128,
    pub delegated: u128,
}

/// Snapshot taken at a delegate's first vote of the epoch. The power and
/// fee in force at that moment govern every owner claim against this
/// delegate for this epoch, regardless of later re-delegations or fee
/// changes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct DelegateSnapshot {
    pub total_power: u128,
    pub fee_bps: u64,
}

/// Allocation outcome for one pool, written when the epoch is processed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default)]
pub struct PoolOutcome {
    pub votes: u128,
    pub reward_allocated: u64,
    pub subsidy_allocated: u64,
    pub reward_claimed: u64,
    pub subsidy_claimed: u64,
}

impl PoolOutcome {
    pub fn reward_remaining(&self) -> u64 {
        self.reward_allocated.saturating_sub(self.reward_claimed)
    }

    pub fn subsidy_remaining(&self) -> u64 {
        self.subsidy_allocated.saturating_sub(self.subsidy_claimed)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VoteBook {
    pub epoch: EpochId,
    tallies: HashMap<PoolId, PoolTally>,
    spent: HashMap<AccountId, SpentVotes>,
    delegates: HashMap<AccountId, DelegateSnapshot>,
    outcomes: HashMap<PoolId, PoolOutcome>,
    reward_claims: HashSet<(AccountId, PoolId)>,
    delegated_claims: HashSet<(AccountId, AccountId, PoolId)>,
    fee_claims: HashSet<(AccountId, PoolId)>,
    subsidy_claims: HashSet<(AccountId, PoolId)>,
}

impl VoteBook {
    pub fn new(epoch: EpochId) -> Self {
        Self {
            epoch,
            tallies: HashMap::new(),
            spent: HashMap::new(),
            delegates: HashMap::new(),
            outcomes: HashMap::new(),
            reward_claims: HashSet::new(),
            delegated_claims: HashSet::new(),
            fee_claims: HashSet::new(),
            subsidy_claims: HashSet::new(),
        }
    }

    // --- recording ---

    pub fn record_vote(
        &mut self,
        account: &AccountId,
        pool: PoolId,
        amount: u128,
        source: VoteSource,
    ) {
        let tally = self.tallies.entry(pool).or_default();
        tally.total += amount;
        let spent = self.spent.entry(*account).or_default();
        match source {
            VoteSource::Personal => {
                *tally.by_account.entry(*account).or_default() += amount;
                spent.personal += amount;
            }
            VoteSource::Delegated => {
                *tally.by_delegate.entry(*account).or_default() += amount;
                spent.delegated += amount;
            }
        }
    }

    /// Record the delegate's power/fee snapshot if this is their first
    /// vote of the epoch. Later votes keep the original snapshot.
    pub fn snapshot_delegate(&mut self, delegate: &AccountId, total_power: u128, fee_bps: u64) {
        self.delegates
            .entry(*delegate)
            .or_insert(DelegateSnapshot { total_power, fee_bps });
    }

    /// Move part of a caller's recorded votes between pools. The caller's
    /// epoch total and the sum of pool totals are unchanged.
    pub fn move_votes(
        &mut self,
        account: &AccountId,
        from: PoolId,
        to: PoolId,
        amount: u128,
        source: VoteSource,
    ) -> Result<(), EpochError> {
        {
            let tally = self.tallies.get_mut(&from).ok_or(EpochError::PoolNotFound(from))?;
            let map = match source {
                VoteSource::Personal => &mut tally.by_account,
                VoteSource::Delegated => &mut tally.by_delegate,
            };
            let recorded = map.get_mut(account).ok_or(EpochError::InsufficientVotes {
                pool: from,
                have: 0,
                need: amount,
            })?;
            if *recorded < amount {
                return Err(EpochError::InsufficientVotes { pool: from, have: *recorded, need: amount });
            }
            *recorded -= amount;
            if *recorded == 0 {
                map.remove(account);
            }
            tally.total -= amount;
        }
        let target = self.tallies.entry(to).or_default();
        target.total += amount;
        match source {
            VoteSource::Personal => *target.by_account.entry(*account).or_default() += amount,
            VoteSource::Delegated => *target.by_delegate.entry(*account).or_default() += amount,
        }
        Ok(())
    }

    // --- reads ---

    pub fn tally(&self, pool: PoolId) -> Option<&PoolTally> {
        self.tallies.get(&pool)
    }

    pub fn pool_votes(&self, pool: PoolId) -> u128 {
        self.tallies.get(&pool).map_or(0, |t| t.total)
    }

    pub fn personal_votes(&self, account: &AccountId, pool: PoolId) -> u128 {
        self.tallies
            .get(&pool)
            .and_then(|t| t.by_account.get(account))
            .copied()
            .unwrap_or(0)
    }

    pub fn delegated_votes(&self, delegate: &AccountId, pool: PoolId) -> u128 {
        self.tallies
            .get(&pool)
            .and_then(|t| t.by_delegate.get(delegate))
            .copied()
            .unwrap_or(0)
    }

    pub fn spent(&self, account: &AccountId) -> SpentVotes {
        self.spent.get(account).copied().unwrap_or_default()
    }

    pub fn delegate_snapshot(&self, delegate: &AccountId) -> Option<DelegateSnapshot> {
        self.delegates.get(delegate).copied()
    }

    pub fn voted_pools(&self) -> impl Iterator<Item = (&PoolId, &PoolTally)> {
        self.tallies.iter()
    }

    pub fn total_votes(&self) -> u128 {
        self.tallies.values().map(|t| t.total).sum()
    }

    // --- outcomes ---

    pub fn record_outcome(&mut self, pool: PoolId, reward: u64, subsidy: u64) {
        let votes = self.pool_votes(pool);
        self.outcomes.insert(
            pool,
            PoolOutcome {
                votes,
                reward_allocated: reward,
                subsidy_allocated: subsidy,
                reward_claimed: 0,
                subsidy_claimed: 0,
            },
        );
    }

    pub fn outcome(&self, pool: PoolId) -> Option<&PoolOutcome> {
        self.outcomes.get(&pool)
    }

    pub fn outcome_mut(&mut self, pool: PoolId) -> Option<&mut PoolOutcome> {
        self.outcomes.get_mut(&pool)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&PoolId, &PoolOutcome)> {
        self.outcomes.iter()
    }

    // --- claim flags ---

    pub fn try_claim_reward(&mut self, account: &AccountId, pool: PoolId) -> bool {
        self.reward_claims.insert((*account, pool))
    }

    pub fn try_claim_delegated(
        &mut self,
        owner: &AccountId,
        delegate: &AccountId,
        pool: PoolId,
    ) -> bool {
        self.delegated_claims.insert((*owner, *delegate, pool))
    }

    pub fn try_claim_fee(&mut self, delegate: &AccountId, pool: PoolId) -> bool {
        self.fee_claims.insert((*delegate, pool))
    }

    pub fn try_claim_subsidy(&mut self, account: &AccountId, pool: PoolId) -> bool {
        self.subsidy_claims.insert((*account, pool))
    }
}
