//! Per-epoch record and its state machine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use ebb_core::constants::{epoch_end, EPOCH_LENGTH, SWEEP_COOLDOWN_EPOCHS};
use ebb_core::error::EpochError;
use ebb_core::types::{AccountId, EpochId, Timestamp, Track};

/// Lifecycle state of an epoch. Strictly forward-only; `Finalized` and
/// `ForceFinalized` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochState {
    Voting,
    Ended,
    Verified,
    Processed,
    Finalized,
    ForceFinalized,
}

impl EpochState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Voting => "voting",
            Self::Ended => "ended",
            Self::Verified => "verified",
            Self::Processed => "processed",
            Self::Finalized => "finalized",
            Self::ForceFinalized => "force-finalized",
        }
    }

    /// Whether allocations are deposited and claims are open.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::ForceFinalized)
    }
}

/// Allocation/claim totals for one payout track of one epoch.
///
/// Invariants (enforced by the claim paths, checked in tests):
/// `claimed ≤ deposited` and `claimed + withdrawn ≤ deposited ≤ allocated`
/// at all times.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackTotals {
    /// Accumulated during `process_rewards_and_subsidies`.
    pub allocated: u64,
    /// Fixed at finalization; the claimable ceiling.
    pub deposited: u64,
    /// Paid out to claimants so far.
    pub claimed: u64,
    /// Swept to the collector.
    pub withdrawn: u64,
    /// Once set, no further claims on this track.
    pub swept: bool,
}

impl TrackTotals {
    /// Deposited funds not yet claimed or withdrawn.
    pub fn outstanding(&self) -> u64 {
        self.deposited - self.claimed - self.withdrawn
    }
}

/// One epoch's lifecycle record.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Epoch {
    pub number: EpochId,
    pub state: EpochState,
    /// Active pool count snapshotted when the epoch ended.
    pub total_active_pools: u64,
    /// Pools allocated so far; the epoch auto-advances to `Processed`
    /// when this reaches `total_active_pools`.
    pub pools_processed: u64,
    pub reward: TrackTotals,
    pub subsidy: TrackTotals,
    /// Accounts barred from claiming in this epoch by the verifier.
    pub blocked: HashSet<AccountId>,
    pub finalized_at: Option<Timestamp>,
}

impl Epoch {
    pub fn new(number: EpochId) -> Self {
        Self {
            number,
            state: EpochState::Voting,
            total_active_pools: 0,
            pools_processed: 0,
            reward: TrackTotals::default(),
            subsidy: TrackTotals::default(),
            blocked: HashSet::new(),
            finalized_at: None,
        }
    }

    /// First timestamp after the voting window.
    pub fn end_time(&self) -> Timestamp {
        epoch_end(self.number)
    }

    pub fn track(&self, track: Track) -> &TrackTotals {
        match track {
            Track::Reward => &self.reward,
            Track::Subsidy => &self.subsidy,
        }
    }

    pub fn track_mut(&mut self, track: Track) -> &mut TrackTotals {
        match track {
            Track::Reward => &mut self.reward,
            Track::Subsidy => &mut self.subsidy,
        }
    }

    pub(crate) fn expect_state(&self, expected: EpochState) -> Result<(), EpochError> {
        if self.state != expected {
            return Err(EpochError::WrongState {
                epoch: self.number,
                expected: expected.name(),
                got: self.state.name(),
            });
        }
        Ok(())
    }

    /// `Voting → Ended`, allowed only after the voting window.
    pub fn end(&mut self, now: Timestamp, active_pools: u64) -> Result<(), EpochError> {
        self.expect_state(EpochState::Voting)?;
        if now < self.end_time() {
            return Err(EpochError::VotingWindowOpen {
                epoch: self.number,
                end: self.end_time(),
                now,
            });
        }
        self.total_active_pools = active_pools;
        self.state = EpochState::Ended;
        Ok(())
    }

    /// `Ended → Verified` when all checks cleared; otherwise records the
    /// blocked accounts and stays `Ended` (the caller retries after
    /// remediation).
    pub fn verify(
        &mut self,
        all_cleared: bool,
        blocked: impl IntoIterator<Item = AccountId>,
    ) -> Result<bool, EpochError> {
        self.expect_state(EpochState::Ended)?;
        self.blocked.extend(blocked);
        if all_cleared {
            self.state = EpochState::Verified;
        }
        Ok(all_cleared)
    }

    /// Record an allocation batch; auto-advance `Verified → Processed` once
    /// every snapshotted pool is covered. The caller has already validated
    /// the per-pool amounts.
    pub fn record_allocation(
        &mut self,
        pools: u64,
        reward: u64,
        subsidy: u64,
    ) -> Result<(), EpochError> {
        self.expect_state(EpochState::Verified)?;
        let reward_total = self
            .reward
            .allocated
            .checked_add(reward)
            .ok_or(EpochError::ArithmeticOverflow)?;
        let subsidy_total = self
            .subsidy
            .allocated
            .checked_add(subsidy)
            .ok_or(EpochError::ArithmeticOverflow)?;
        let processed = self
            .pools_processed
            .checked_add(pools)
            .ok_or(EpochError::ArithmeticOverflow)?;
        self.reward.allocated = reward_total;
        self.subsidy.allocated = subsidy_total;
        self.pools_processed = processed;
        if self.pools_processed >= self.total_active_pools {
            self.state = EpochState::Processed;
        }
        Ok(())
    }

    /// `Processed → Finalized`: allocated totals become claimable deposits.
    pub fn finalize(&mut self, now: Timestamp) -> Result<(), EpochError> {
        self.expect_state(EpochState::Processed)?;
        self.reward.deposited = self.reward.allocated;
        self.subsidy.deposited = self.subsidy.allocated;
        self.state = EpochState::Finalized;
        self.finalized_at = Some(now);
        Ok(())
    }

    /// Emergency terminal transition from any non-terminal state once the
    /// voting window has elapsed. Deposits whatever was allocated; pools
    /// never processed simply stay at zero allocation.
    pub fn force_finalize(&mut self, now: Timestamp) -> Result<(), EpochError> {
        if self.state.is_terminal() {
            return Err(EpochError::WrongState {
                epoch: self.number,
                expected: "non-terminal",
                got: self.state.name(),
            });
        }
        if now < self.end_time() {
            return Err(EpochError::VotingWindowOpen {
                epoch: self.number,
                end: self.end_time(),
                now,
            });
        }
        self.reward.deposited = self.reward.allocated;
        self.subsidy.deposited = self.subsidy.allocated;
        self.state = EpochState::ForceFinalized;
        self.finalized_at = Some(now);
        Ok(())
    }

    /// Sweep a track's unclaimed remainder after the cooldown. Returns the
    /// amount withdrawn to the collector.
    pub fn sweep(&mut self, track: Track, now: Timestamp) -> Result<u64, EpochError> {
        if !self.state.is_terminal() {
            return Err(EpochError::WrongState {
                epoch: self.number,
                expected: "finalized",
                got: self.state.name(),
            });
        }
        let finalized_at = self.finalized_at.unwrap_or_else(|| self.end_time());
        let until = finalized_at + SWEEP_COOLDOWN_EPOCHS * EPOCH_LENGTH;
        let totals = self.track_mut(track);
        if totals.swept {
            return Err(EpochError::TrackSwept {
                epoch: self.number,
                track: match track {
                    Track::Reward => "reward",
                    Track::Subsidy => "subsidy",
                },
            });
        }
        if now < until {
            return Err(EpochError::SweepCooldown { until, now });
        }
        let amount = totals.outstanding();
        totals.withdrawn += amount;
        totals.swept = true;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(seed: u8) -> AccountId {
        AccountId([seed; 32])
    }

    const E: u64 = EPOCH_LENGTH;

    fn ended_epoch() -> Epoch {
        let mut epoch = Epoch::new(0);
        epoch.end(E, 2).unwrap();
        epoch
    }

    // --- transitions ---

    #[test]
    fn end_requires_window_elapsed() {
        let mut epoch = Epoch::new(0);
        let err = epoch.end(E - 1, 1).unwrap_err();
        assert_eq!(err, EpochError::VotingWindowOpen { epoch: 0, end: E, now: E - 1 });
        epoch.end(E, 3).unwrap();
        assert_eq!(epoch.state, EpochState::Ended);
        assert_eq!(epoch.total_active_pools, 3);
    }

    #[test]
    fn transitions_cannot_be_skipped() {
        let mut epoch = Epoch::new(0);
        assert!(matches!(
            epoch.record_allocation(1, 0, 0),
            Err(EpochError::WrongState { .. })
        ));
        assert!(matches!(epoch.finalize(E), Err(EpochError::WrongState { .. })));
        assert!(matches!(epoch.verify(true, []), Err(EpochError::WrongState { .. })));
    }

    #[test]
    fn verify_blocks_and_retries() {
        let mut epoch = ended_epoch();
        // First pass fails: state stays Ended, blocks recorded.
        assert!(!epoch.verify(false, [acct(7)]).unwrap());
        assert_eq!(epoch.state, EpochState::Ended);
        assert!(epoch.blocked.contains(&acct(7)));
        // Retry after remediation clears.
        assert!(epoch.verify(true, []).unwrap());
        assert_eq!(epoch.state, EpochState::Verified);
    }

    #[test]
    fn allocation_auto_advances_when_all_pools_covered() {
        let mut epoch = ended_epoch();
        epoch.verify(true, []).unwrap();
        epoch.record_allocation(1, 100, 10).unwrap();
        assert_eq!(epoch.state, EpochState::Verified);
        epoch.record_allocation(1, 50, 0).unwrap();
        assert_eq!(epoch.state, EpochState::Processed);
        assert_eq!(epoch.reward.allocated, 150);
        assert_eq!(epoch.subsidy.allocated, 10);
        // Nothing claimable before finalization.
        assert_eq!(epoch.reward.deposited, 0);
    }

    #[test]
    fn finalize_deposits_allocations() {
        let mut epoch = ended_epoch();
        epoch.verify(true, []).unwrap();
        epoch.record_allocation(2, 150, 10).unwrap();
        epoch.finalize(2 * E).unwrap();
        assert_eq!(epoch.state, EpochState::Finalized);
        assert_eq!(epoch.reward.deposited, 150);
        assert_eq!(epoch.subsidy.deposited, 10);
        assert_eq!(epoch.finalized_at, Some(2 * E));
        // Terminal: no second finalize.
        assert!(matches!(epoch.finalize(2 * E), Err(EpochError::WrongState { .. })));
    }

    #[test]
    fn force_finalize_from_any_non_terminal() {
        for prep in 0..4 {
            let mut epoch = Epoch::new(0);
            if prep >= 1 {
                epoch.end(E, 2).unwrap();
            }
            if prep >= 2 {
                epoch.verify(true, []).unwrap();
            }
            if prep >= 3 {
                epoch.record_allocation(2, 100, 0).unwrap();
            }
            epoch.force_finalize(E).unwrap();
            assert_eq!(epoch.state, EpochState::ForceFinalized);
        }
    }

    #[test]
    fn force_finalize_requires_window_elapsed_and_not_terminal() {
        let mut epoch = Epoch::new(0);
        assert!(matches!(
            epoch.force_finalize(E - 1),
            Err(EpochError::VotingWindowOpen { .. })
        ));
        epoch.force_finalize(E).unwrap();
        assert!(matches!(
            epoch.force_finalize(2 * E),
            Err(EpochError::WrongState { .. })
        ));
    }

    // --- sweep ---

    #[test]
    fn sweep_after_cooldown_takes_outstanding() {
        let mut epoch = ended_epoch();
        epoch.verify(true, []).unwrap();
        epoch.record_allocation(2, 100, 0).unwrap();
        epoch.finalize(2 * E).unwrap();
        epoch.reward.claimed = 60;

        let until = 2 * E + SWEEP_COOLDOWN_EPOCHS * E;
        assert_eq!(
            epoch.sweep(Track::Reward, until - 1).unwrap_err(),
            EpochError::SweepCooldown { until, now: until - 1 },
        );
        assert_eq!(epoch.sweep(Track::Reward, until).unwrap(), 40);
        assert!(epoch.reward.swept);
        assert_eq!(epoch.reward.outstanding(), 0);
        // Second sweep rejected.
        assert!(matches!(
            epoch.sweep(Track::Reward, until),
            Err(EpochError::TrackSwept { .. })
        ));
        // Subsidy track independent.
        assert_eq!(epoch.sweep(Track::Subsidy, until).unwrap(), 0);
    }
}
