//! The epoch engine: lifecycle, voting, delegates, and claims.
//!
//! One [`EpochEngine`] owns every epoch record, its vote book, the pool
//! registry, and the delegate registry. Authorization, pause/freeze gating,
//! and custody transfers live in the protocol layer; the engine validates
//! state-machine preconditions and does the accounting.
//!
//! Not thread-safe on its own — wrap in a `Mutex` if shared.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use ebb_core::constants::{epoch_end, epoch_of, DELEGATE_REGISTRATION_FEE};
use ebb_core::error::EpochError;
use ebb_core::traits::{Custody, VotingPower};
use ebb_core::types::{AccountId, EpochId, PoolId, Timestamp, Track};
use ebb_escrow::EscrowLedger;

use crate::delegate::DelegateRegistry;
use crate::epoch::{Epoch, EpochState};
use crate::pool::PoolRegistry;
use crate::rewards::{fee_split, pro_rata};
use crate::votes::{VoteBook, VoteSource};

/// Per-pool claim outcomes: one bad pool in a batch neither aborts the
/// batch nor is silently swallowed.
pub type ClaimResults = Vec<(PoolId, Result<u64, EpochError>)>;

#[derive(Debug)]
pub struct EpochEngine {
    current: EpochId,
    epochs: BTreeMap<EpochId, Epoch>,
    books: HashMap<EpochId, VoteBook>,
    pools: PoolRegistry,
    delegates: DelegateRegistry,
}

impl EpochEngine {
    /// Open the first epoch at the calendar epoch containing `now`.
    pub fn new(now: Timestamp) -> Self {
        let current = epoch_of(now);
        let mut epochs = BTreeMap::new();
        epochs.insert(current, Epoch::new(current));
        let mut books = HashMap::new();
        books.insert(current, VoteBook::new(current));
        Self {
            current,
            epochs,
            books,
            pools: PoolRegistry::new(),
            delegates: DelegateRegistry::new(),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn current_epoch(&self) -> EpochId {
        self.current
    }

    pub fn epoch(&self, id: EpochId) -> Option<&Epoch> {
        self.epochs.get(&id)
    }

    pub fn book(&self, id: EpochId) -> Option<&VoteBook> {
        self.books.get(&id)
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn delegates(&self) -> &DelegateRegistry {
        &self.delegates
    }

    fn epoch_mut(&mut self, id: EpochId) -> Result<&mut Epoch, EpochError> {
        self.epochs.get_mut(&id).ok_or(EpochError::EpochNotFound(id))
    }

    // ------------------------------------------------------------------
    // Epoch lifecycle
    // ------------------------------------------------------------------

    /// Close the current epoch's voting window and open the next epoch.
    pub fn end_epoch(&mut self, now: Timestamp) -> Result<(), EpochError> {
        let active = self.pools.active_count();
        let id = self.current;
        self.epoch_mut(id)?.end(now, active)?;
        self.open_next();
        info!(epoch = id, active_pools = active, "epoch ended");
        Ok(())
    }

    /// Record the verifier's result for an ended epoch. Blocked accounts
    /// are barred from claiming in that epoch. State only advances when
    /// everything cleared; otherwise the verifier retries later.
    pub fn process_verifier_checks(
        &mut self,
        id: EpochId,
        all_cleared: bool,
        blocked: Vec<AccountId>,
    ) -> Result<bool, EpochError> {
        let cleared = self.epoch_mut(id)?.verify(all_cleared, blocked)?;
        info!(epoch = id, cleared, "verifier checks processed");
        Ok(cleared)
    }

    /// Allocate rewards and subsidies to a batch of pools. Incremental
    /// across calls; atomic per call — one invalid item rejects the whole
    /// batch, and a batch may not name the same pool twice. Advances the
    /// epoch to `Processed` once every pool counted at `end_epoch` has been
    /// covered; removed pools may still be allocated but sit outside that
    /// count.
    pub fn process_rewards_and_subsidies(
        &mut self,
        id: EpochId,
        items: &[(PoolId, u64, u64)],
    ) -> Result<(), EpochError> {
        let epoch = self.epochs.get(&id).ok_or(EpochError::EpochNotFound(id))?;
        epoch.expect_state(EpochState::Verified)?;
        let book = self.books.get(&id).ok_or(EpochError::EpochNotFound(id))?;

        let mut seen = HashSet::new();
        let mut total_reward: u64 = 0;
        let mut total_subsidy: u64 = 0;
        let mut counted: u64 = 0;
        for &(pool, reward, subsidy) in items {
            if !self.pools.contains(pool) {
                return Err(EpochError::PoolNotFound(pool));
            }
            if book.outcome(pool).is_some() || !seen.insert(pool) {
                return Err(EpochError::PoolAlreadyProcessed(pool));
            }
            if book.pool_votes(pool) == 0 && (reward > 0 || subsidy > 0) {
                return Err(EpochError::ZeroVotePool(pool));
            }
            if self.pools.is_active(pool) {
                counted += 1;
            }
            total_reward = total_reward
                .checked_add(reward)
                .ok_or(EpochError::ArithmeticOverflow)?;
            total_subsidy = total_subsidy
                .checked_add(subsidy)
                .ok_or(EpochError::ArithmeticOverflow)?;
        }
        epoch
            .track(Track::Reward)
            .allocated
            .checked_add(total_reward)
            .ok_or(EpochError::ArithmeticOverflow)?;
        epoch
            .track(Track::Subsidy)
            .allocated
            .checked_add(total_subsidy)
            .ok_or(EpochError::ArithmeticOverflow)?;

        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        for &(pool, reward, subsidy) in items {
            book.record_outcome(pool, reward, subsidy);
        }
        self.epoch_mut(id)?
            .record_allocation(counted, total_reward, total_subsidy)?;
        info!(epoch = id, pools = items.len(), total_reward, total_subsidy, "allocations recorded");
        Ok(())
    }

    /// Finalize a processed epoch, making its allocations claimable.
    /// Rejected unless custody already holds enough of each track's asset
    /// to cover every finalized epoch's outstanding claims plus this one.
    pub fn finalize_epoch(
        &mut self,
        id: EpochId,
        now: Timestamp,
        custody: &dyn Custody,
    ) -> Result<(), EpochError> {
        let epoch = self.epochs.get(&id).ok_or(EpochError::EpochNotFound(id))?;
        epoch.expect_state(EpochState::Processed)?;
        for track in [Track::Reward, Track::Subsidy] {
            let need = self.outstanding(track) + epoch.track(track).allocated;
            let have = custody.balance(track.asset());
            if have < need {
                return Err(EpochError::Insolvent { have, need });
            }
        }
        self.epoch_mut(id)?.finalize(now)?;
        info!(epoch = id, "epoch finalized");
        Ok(())
    }

    /// Emergency terminal transition. If the epoch was still in `Voting`,
    /// the next epoch is opened so the lifecycle keeps moving.
    pub fn force_finalize_epoch(&mut self, id: EpochId, now: Timestamp) -> Result<(), EpochError> {
        let was_voting = self
            .epochs
            .get(&id)
            .ok_or(EpochError::EpochNotFound(id))?
            .state
            == EpochState::Voting;
        self.epoch_mut(id)?.force_finalize(now)?;
        if was_voting && id == self.current {
            self.open_next();
        }
        info!(epoch = id, "epoch force-finalized");
        Ok(())
    }

    /// Sum of deposited-but-unclaimed funds across terminal epochs.
    pub fn outstanding(&self, track: Track) -> u64 {
        self.epochs
            .values()
            .filter(|e| e.state.is_terminal())
            .map(|e| e.track(track).outstanding())
            .sum()
    }

    fn open_next(&mut self) {
        self.current += 1;
        self.epochs.insert(self.current, Epoch::new(self.current));
        self.books.insert(self.current, VoteBook::new(self.current));
    }

    // ------------------------------------------------------------------
    // Voting
    // ------------------------------------------------------------------

    /// Spend voting power on a pool in the current epoch. Personal and
    /// delegated budgets are bounded separately against power as of the
    /// epoch's end, minus what this epoch already spent.
    pub fn cast_vote(
        &mut self,
        power: &dyn VotingPower,
        now: Timestamp,
        account: &AccountId,
        pool: PoolId,
        amount: u128,
        delegated: bool,
    ) -> Result<(), EpochError> {
        let id = self.current;
        let end = epoch_end(id);
        if now >= end {
            return Err(EpochError::VotingClosed { epoch: id, end, now });
        }
        if amount == 0 {
            return Err(EpochError::ZeroAmount);
        }
        if !self.pools.contains(pool) {
            return Err(EpochError::PoolNotFound(pool));
        }
        if !self.pools.is_active(pool) {
            return Err(EpochError::PoolInactive(pool));
        }

        let source = if delegated { VoteSource::Delegated } else { VoteSource::Personal };
        let budget = if delegated {
            if self.delegates.get(account).is_none() {
                return Err(EpochError::DelegateNotRegistered(*account));
            }
            power.delegated_power(account, end)
        } else {
            power.personal_power(account, end)
        };
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        let spent = match source {
            VoteSource::Personal => book.spent(account).personal,
            VoteSource::Delegated => book.spent(account).delegated,
        };
        let available = budget.saturating_sub(spent);
        if amount > available {
            return Err(EpochError::InsufficientVotingPower { available, requested: amount });
        }

        if delegated {
            let fee = self.delegates.effective_fee(account, id)?;
            book.snapshot_delegate(account, budget, fee);
        }
        book.record_vote(account, pool, amount, source);
        self.pools.add_lifetime_votes(pool, amount);
        debug!(epoch = id, %account, %pool, amount, delegated, "vote cast");
        Ok(())
    }

    /// Move already-cast votes between pools in the current epoch. The
    /// caller's spent total and the sum over pools are unchanged.
    pub fn migrate_votes(
        &mut self,
        now: Timestamp,
        account: &AccountId,
        src: PoolId,
        dst: PoolId,
        amount: u128,
        delegated: bool,
    ) -> Result<(), EpochError> {
        let id = self.current;
        let end = epoch_end(id);
        if now >= end {
            return Err(EpochError::VotingClosed { epoch: id, end, now });
        }
        if amount == 0 {
            return Err(EpochError::ZeroAmount);
        }
        if !self.pools.is_active(dst) {
            return Err(if self.pools.contains(dst) {
                EpochError::PoolInactive(dst)
            } else {
                EpochError::PoolNotFound(dst)
            });
        }
        let source = if delegated { VoteSource::Delegated } else { VoteSource::Personal };
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        book.move_votes(account, src, dst, amount, source)?;
        self.pools.sub_lifetime_votes(src, amount);
        self.pools.add_lifetime_votes(dst, amount);
        debug!(epoch = id, %account, %src, %dst, amount, "votes migrated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pool lifecycle
    // ------------------------------------------------------------------

    /// Pool batches run only while the current epoch is voting and its
    /// predecessor has reached a terminal state.
    fn check_pool_window(&self) -> Result<(), EpochError> {
        let prev = match self.current.checked_sub(1) {
            None => return Ok(()),
            Some(prev) => prev,
        };
        match self.epochs.get(&prev) {
            // Before the engine's first epoch: nothing to wait on.
            None => Ok(()),
            Some(e) if e.state.is_terminal() => Ok(()),
            Some(_) => Err(EpochError::PreviousEpochNotFinalized(prev)),
        }
    }

    /// Create a batch of pools; per-item outcomes.
    pub fn create_pools(
        &mut self,
        batch: &[PoolId],
    ) -> Result<Vec<(PoolId, Result<(), EpochError>)>, EpochError> {
        self.check_pool_window()?;
        let epoch = self.current;
        let results = batch
            .iter()
            .map(|&id| (id, self.pools.create(id, epoch)))
            .collect::<Vec<_>>();
        info!(epoch, created = results.iter().filter(|(_, r)| r.is_ok()).count(), "pool batch created");
        Ok(results)
    }

    /// Deactivate a batch of pools; per-item outcomes. Votes already cast
    /// on a removed pool stay recorded and can be migrated off it.
    pub fn remove_pools(
        &mut self,
        batch: &[PoolId],
    ) -> Result<Vec<(PoolId, Result<(), EpochError>)>, EpochError> {
        self.check_pool_window()?;
        let results = batch
            .iter()
            .map(|&id| (id, self.pools.remove(id)))
            .collect::<Vec<_>>();
        info!(epoch = self.current, removed = results.iter().filter(|(_, r)| r.is_ok()).count(), "pool batch removed");
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Delegates
    // ------------------------------------------------------------------

    /// Register a delegate. Returns the flat registration deposit the
    /// caller must move into custody.
    pub fn register_delegate(&mut self, account: AccountId, fee_bps: u64) -> Result<u64, EpochError> {
        self.delegates
            .register(account, fee_bps, self.current, DELEGATE_REGISTRATION_FEE)?;
        info!(%account, fee_bps, "delegate registered");
        Ok(DELEGATE_REGISTRATION_FEE)
    }

    pub fn update_delegate_fee(&mut self, account: &AccountId, fee_bps: u64) -> Result<(), EpochError> {
        self.delegates.update_fee(account, fee_bps, self.current)
    }

    /// Unregister a delegate with no votes spent this epoch. Returns the
    /// deposit to refund.
    pub fn unregister_delegate(&mut self, account: &AccountId) -> Result<u64, EpochError> {
        let spent = self
            .books
            .get(&self.current)
            .map(|b| b.spent(account).delegated)
            .unwrap_or(0);
        let refund = self.delegates.unregister(account, spent)?;
        info!(%account, "delegate unregistered");
        Ok(refund)
    }

    // ------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------

    /// Shared claim gate: epoch terminal, track not swept, claimant not
    /// blocked. Individual pools then succeed or fail independently.
    fn check_claimable(
        &self,
        id: EpochId,
        track: Track,
        claimant: &AccountId,
    ) -> Result<(), EpochError> {
        let epoch = self.epochs.get(&id).ok_or(EpochError::EpochNotFound(id))?;
        if !epoch.state.is_terminal() {
            return Err(EpochError::WrongState {
                epoch: id,
                expected: "finalized",
                got: epoch.state.name(),
            });
        }
        if epoch.track(track).swept {
            return Err(EpochError::TrackSwept {
                epoch: id,
                track: match track {
                    Track::Reward => "reward",
                    Track::Subsidy => "subsidy",
                },
            });
        }
        if epoch.blocked.contains(claimant) {
            return Err(EpochError::AccountBlocked { account: *claimant, epoch: id });
        }
        Ok(())
    }

    /// Claim an account's personal-vote share of each pool's reward.
    pub fn claim_reward(
        &mut self,
        account: &AccountId,
        id: EpochId,
        pools: &[PoolId],
    ) -> Result<ClaimResults, EpochError> {
        self.check_claimable(id, Track::Reward, account)?;
        let mut results = Vec::with_capacity(pools.len());
        for &pool in pools {
            results.push((pool, self.claim_reward_one(account, id, pool)));
        }
        Ok(results)
    }

    fn claim_reward_one(
        &mut self,
        account: &AccountId,
        id: EpochId,
        pool: PoolId,
    ) -> Result<u64, EpochError> {
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        let basis = book.personal_votes(account, pool);
        if basis == 0 {
            return Err(EpochError::NothingToClaim);
        }
        let outcome = *book.outcome(pool).ok_or(EpochError::NothingToClaim)?;
        let payout = pro_rata(outcome.reward_allocated, basis, outcome.votes)?
            .min(outcome.reward_remaining());
        if !book.try_claim_reward(account, pool) {
            return Err(EpochError::AlreadyClaimed);
        }
        if let Some(o) = book.outcome_mut(pool) {
            o.reward_claimed += payout;
        }
        self.epoch_mut(id)?.reward.claimed += payout;
        debug!(epoch = id, %account, %pool, payout, "reward claimed");
        Ok(payout)
    }

    /// Claim an owner's share of a delegate's per-pool reward, net of the
    /// delegate's fee. Powers are the ones snapshotted for the epoch:
    /// the delegate's total as of its first vote, the owner's delegated
    /// share as of the epoch's end.
    pub fn claim_delegated_reward(
        &mut self,
        ledger: &EscrowLedger,
        owner: &AccountId,
        delegate: &AccountId,
        id: EpochId,
        pools: &[PoolId],
    ) -> Result<ClaimResults, EpochError> {
        self.check_claimable(id, Track::Reward, owner)?;
        let owner_power = ledger.owner_delegated_share(owner, delegate, epoch_end(id));
        let mut results = Vec::with_capacity(pools.len());
        for &pool in pools {
            results.push((pool, self.claim_delegated_one(owner, delegate, owner_power, id, pool)));
        }
        Ok(results)
    }

    fn claim_delegated_one(
        &mut self,
        owner: &AccountId,
        delegate: &AccountId,
        owner_power: u128,
        id: EpochId,
        pool: PoolId,
    ) -> Result<u64, EpochError> {
        if owner_power == 0 {
            return Err(EpochError::NothingToClaim);
        }
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        let snapshot = book.delegate_snapshot(delegate).ok_or(EpochError::NothingToClaim)?;
        let basis = book.delegated_votes(delegate, pool);
        if basis == 0 {
            return Err(EpochError::NothingToClaim);
        }
        let outcome = *book.outcome(pool).ok_or(EpochError::NothingToClaim)?;
        let gross = pro_rata(outcome.reward_allocated, basis, outcome.votes)?;
        let (net, _fee) = fee_split(gross, snapshot.fee_bps);
        let payout = pro_rata(net, owner_power, snapshot.total_power)?
            .min(outcome.reward_remaining());
        if !book.try_claim_delegated(owner, delegate, pool) {
            return Err(EpochError::AlreadyClaimed);
        }
        if let Some(o) = book.outcome_mut(pool) {
            o.reward_claimed += payout;
        }
        self.epoch_mut(id)?.reward.claimed += payout;
        debug!(epoch = id, %owner, %delegate, %pool, payout, "delegated reward claimed");
        Ok(payout)
    }

    /// Claim the fee portion of a delegate's per-pool reward.
    pub fn claim_delegate_fee(
        &mut self,
        delegate: &AccountId,
        id: EpochId,
        pools: &[PoolId],
    ) -> Result<ClaimResults, EpochError> {
        self.check_claimable(id, Track::Reward, delegate)?;
        let mut results = Vec::with_capacity(pools.len());
        for &pool in pools {
            results.push((pool, self.claim_fee_one(delegate, id, pool)));
        }
        Ok(results)
    }

    fn claim_fee_one(
        &mut self,
        delegate: &AccountId,
        id: EpochId,
        pool: PoolId,
    ) -> Result<u64, EpochError> {
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        let snapshot = book.delegate_snapshot(delegate).ok_or(EpochError::NothingToClaim)?;
        let basis = book.delegated_votes(delegate, pool);
        if basis == 0 {
            return Err(EpochError::NothingToClaim);
        }
        let outcome = *book.outcome(pool).ok_or(EpochError::NothingToClaim)?;
        let gross = pro_rata(outcome.reward_allocated, basis, outcome.votes)?;
        let (_net, fee) = fee_split(gross, snapshot.fee_bps);
        let payout = fee.min(outcome.reward_remaining());
        if !book.try_claim_fee(delegate, pool) {
            return Err(EpochError::AlreadyClaimed);
        }
        if let Some(o) = book.outcome_mut(pool) {
            o.reward_claimed += payout;
        }
        self.epoch_mut(id)?.reward.claimed += payout;
        debug!(epoch = id, %delegate, %pool, payout, "delegate fee claimed");
        Ok(payout)
    }

    /// Claim a voter's subsidy share: personal votes plus any votes the
    /// claimant cast as a delegate, no fee split on this track.
    pub fn claim_subsidy(
        &mut self,
        account: &AccountId,
        id: EpochId,
        pools: &[PoolId],
    ) -> Result<ClaimResults, EpochError> {
        self.check_claimable(id, Track::Subsidy, account)?;
        let mut results = Vec::with_capacity(pools.len());
        for &pool in pools {
            results.push((pool, self.claim_subsidy_one(account, id, pool)));
        }
        Ok(results)
    }

    fn claim_subsidy_one(
        &mut self,
        account: &AccountId,
        id: EpochId,
        pool: PoolId,
    ) -> Result<u64, EpochError> {
        let book = self.books.get_mut(&id).ok_or(EpochError::EpochNotFound(id))?;
        let basis = book.personal_votes(account, pool) + book.delegated_votes(account, pool);
        if basis == 0 {
            return Err(EpochError::NothingToClaim);
        }
        let outcome = *book.outcome(pool).ok_or(EpochError::NothingToClaim)?;
        let payout = pro_rata(outcome.subsidy_allocated, basis, outcome.votes)?
            .min(outcome.subsidy_remaining());
        if !book.try_claim_subsidy(account, pool) {
            return Err(EpochError::AlreadyClaimed);
        }
        if let Some(o) = book.outcome_mut(pool) {
            o.subsidy_claimed += payout;
        }
        self.epoch_mut(id)?.subsidy.claimed += payout;
        debug!(epoch = id, %account, %pool, payout, "subsidy claimed");
        Ok(payout)
    }

    /// Withdraw a track's unclaimed remainder after the cooldown. Returns
    /// the amount to pay the collector.
    pub fn sweep_epoch(&mut self, id: EpochId, track: Track, now: Timestamp) -> Result<u64, EpochError> {
        let amount = self.epoch_mut(id)?.sweep(track, now)?;
        info!(epoch = id, %track, amount, "track swept");
        Ok(amount)
    }
}
