//! The escrow ledger: lock records and aggregate voting-power bookkeeping.
//!
//! Every mutation validates all preconditions first, then rolls the affected
//! aggregates forward to the mutation time, then applies the change — so a
//! failed operation leaves state unchanged and no two call sites can diverge
//! in whether they rolled forward.
//!
//! Custody transfers (principal in/out) are the caller's responsibility; the
//! ledger reports the amounts to move and never touches balances itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ebb_core::constants::{
    epoch_of, epoch_start, is_epoch_aligned, EPOCH_LENGTH, MAX_LOCK_DURATION, MIN_LOCK_EPOCHS,
};
use ebb_core::error::EscrowError;
use ebb_core::traits::{DelegateDirectory, VotingPower};
use ebb_core::types::{AccountId, LockId, Timestamp};

use crate::ve::{Aggregate, VeBalance};

/// A lock record. Immutable after unlock.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Lock {
    pub id: LockId,
    pub owner: AccountId,
    /// Receiver of this lock's voting power, if delegated.
    pub delegate: Option<AccountId>,
    /// Principal in the native asset.
    pub native: u64,
    /// Principal in the paired asset.
    pub paired: u64,
    /// Epoch-aligned expiry timestamp.
    pub expiry: Timestamp,
    /// Set once the principal has been returned; the lock then contributes
    /// zero voting power forever.
    pub unlocked: bool,
}

impl Lock {
    /// Combined principal across both asset kinds.
    pub fn total_principal(&self) -> u128 {
        self.native as u128 + self.paired as u128
    }

    /// Decay slope: `total principal / MAX_LOCK_DURATION`, truncating.
    /// Small locks may carry zero slope (zero voting power) by design.
    pub fn slope(&self) -> u128 {
        self.total_principal() / MAX_LOCK_DURATION as u128
    }

    /// The lock's current `(bias, slope)` contribution.
    pub fn pair(&self) -> VeBalance {
        if self.unlocked {
            VeBalance::ZERO
        } else {
            VeBalance::from_lock(self.slope(), self.expiry)
        }
    }
}

/// Per-lock checkpoint: balance, delegation target, and when it was taken.
///
/// The full history is retained so claim-time queries can value a lock as of
/// a past epoch end even after later increases or delegation switches.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockCheckpoint {
    pub balance: VeBalance,
    pub delegate: Option<AccountId>,
    pub updated_at: Timestamp,
}

/// The decaying voting-power ledger.
///
/// Not thread-safe — the host executes operations one at a time; wrap in a
/// lock if concurrent access is ever needed.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct EscrowLedger {
    locks: HashMap<LockId, Lock>,
    history: HashMap<LockId, Vec<LockCheckpoint>>,
    owner_locks: HashMap<AccountId, Vec<LockId>>,
    global: Aggregate,
    personal: HashMap<AccountId, Aggregate>,
    delegated: HashMap<AccountId, Aggregate>,
    next_lock_id: u64,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest allowed expiry for a lock created at `now`: two epoch
    /// boundaries past the start of the current epoch.
    pub fn min_expiry(now: Timestamp) -> Timestamp {
        epoch_start(epoch_of(now)) + MIN_LOCK_EPOCHS * EPOCH_LENGTH
    }

    /// Latest allowed expiry for a lock created at `now`.
    pub fn max_expiry(now: Timestamp) -> Timestamp {
        epoch_start(epoch_of(now)) + MAX_LOCK_DURATION
    }

    /// Create a lock. Returns the new id and the principal amounts the
    /// caller must move into custody.
    ///
    /// # Errors
    ///
    /// Rejects a zero owner, an unaligned or out-of-range expiry, zero total
    /// principal, and a delegate that is unregistered or equal to the owner.
    pub fn create_lock(
        &mut self,
        now: Timestamp,
        owner: AccountId,
        expiry: Timestamp,
        native: u64,
        paired: u64,
        delegate: Option<AccountId>,
        directory: &dyn DelegateDirectory,
    ) -> Result<LockId, EscrowError> {
        if owner.is_zero() {
            return Err(EscrowError::ZeroAccount);
        }
        if !is_epoch_aligned(expiry) {
            return Err(EscrowError::UnalignedExpiry(expiry));
        }
        let min = Self::min_expiry(now);
        if expiry < min {
            return Err(EscrowError::ExpiryTooSoon { min, got: expiry });
        }
        let max = Self::max_expiry(now);
        if expiry > max {
            return Err(EscrowError::ExpiryTooFar { max, got: expiry });
        }
        if native == 0 && paired == 0 {
            return Err(EscrowError::ZeroPrincipal);
        }
        if let Some(d) = delegate {
            self.check_delegate_target(&owner, &d, directory)?;
        }

        let id = LockId(self.next_lock_id);
        self.next_lock_id += 1;
        let lock = Lock {
            id,
            owner,
            delegate,
            native,
            paired,
            expiry,
            unlocked: false,
        };
        let pair = lock.pair();

        self.global.roll_forward(now);
        self.global.add(&pair, expiry)?;
        let target = self.aggregate_for_mut(&owner, delegate.as_ref());
        target.roll_forward(now);
        target.add(&pair, expiry)?;

        self.history.insert(
            id,
            vec![LockCheckpoint {
                balance: pair,
                delegate,
                updated_at: now,
            }],
        );
        self.owner_locks.entry(owner).or_default().push(id);
        self.locks.insert(id, lock);
        debug!(%id, %owner, expiry, native, paired, "lock created");
        Ok(id)
    }

    /// Add principal to an existing lock. The incremental slope is the
    /// difference of truncated slopes, so the lock's pair always equals
    /// `from_lock(total/D, expiry)` exactly.
    pub fn increase_amount(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        id: LockId,
        add_native: u64,
        add_paired: u64,
    ) -> Result<(), EscrowError> {
        if add_native == 0 && add_paired == 0 {
            return Err(EscrowError::ZeroPrincipal);
        }
        let lock = self.locks.get(&id).ok_or(EscrowError::LockNotFound(id))?;
        if lock.owner != *caller {
            return Err(EscrowError::NotLockOwner { caller: *caller, lock: id });
        }
        if lock.unlocked {
            return Err(EscrowError::AlreadyUnlocked(id));
        }
        if now >= lock.expiry {
            return Err(EscrowError::Expired { lock: id, expiry: lock.expiry });
        }

        let mut updated = lock.clone();
        updated.native = updated
            .native
            .checked_add(add_native)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        updated.paired = updated
            .paired
            .checked_add(add_paired)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        let delta_slope = updated.slope() - lock.slope();
        let delta = VeBalance::from_lock(delta_slope, updated.expiry);
        let expiry = updated.expiry;
        let owner = updated.owner;
        let delegate = updated.delegate;
        let new_pair = updated.pair();

        self.global.roll_forward(now);
        self.global.add(&delta, expiry)?;
        let target = self.aggregate_for_mut(&owner, delegate.as_ref());
        target.roll_forward(now);
        target.add(&delta, expiry)?;

        self.push_checkpoint(id, new_pair, delegate, now);
        self.locks.insert(id, updated);
        debug!(%id, add_native, add_paired, "lock principal increased");
        Ok(())
    }

    /// Delegate, undelegate, or switch a lock's voting power in one step.
    ///
    /// `target = None` moves the power back to the owner's personal
    /// aggregate. Fails if the lock is already in the requested state, the
    /// target is unregistered, or the target is the owner.
    pub fn set_delegate(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        id: LockId,
        target: Option<AccountId>,
        directory: &dyn DelegateDirectory,
    ) -> Result<(), EscrowError> {
        let lock = self.locks.get(&id).ok_or(EscrowError::LockNotFound(id))?;
        if lock.owner != *caller {
            return Err(EscrowError::NotLockOwner { caller: *caller, lock: id });
        }
        if lock.unlocked {
            return Err(EscrowError::AlreadyUnlocked(id));
        }
        if now >= lock.expiry {
            return Err(EscrowError::Expired { lock: id, expiry: lock.expiry });
        }
        if lock.delegate == target {
            return Err(EscrowError::DelegationUnchanged);
        }
        if let Some(d) = target {
            self.check_delegate_target(&lock.owner, &d, directory)?;
        }

        let owner = lock.owner;
        let source = lock.delegate;
        let expiry = lock.expiry;
        let pair = lock.pair();

        let src = self.aggregate_for_mut(&owner, source.as_ref());
        src.roll_forward(now);
        src.remove(&pair, expiry)?;
        let dst = self.aggregate_for_mut(&owner, target.as_ref());
        dst.roll_forward(now);
        dst.add(&pair, expiry)?;

        self.push_checkpoint(id, pair, target, now);
        if let Some(lock) = self.locks.get_mut(&id) {
            lock.delegate = target;
        }
        debug!(%id, ?target, "lock delegation changed");
        Ok(())
    }

    /// Release an expired lock's principal. Decay already drove its voting
    /// power to zero at expiry, so this only flips the unlock flag; the
    /// caller moves `(native, paired)` out of custody.
    pub fn unlock(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        id: LockId,
    ) -> Result<(u64, u64), EscrowError> {
        let lock = self.locks.get(&id).ok_or(EscrowError::LockNotFound(id))?;
        if lock.owner != *caller {
            return Err(EscrowError::NotLockOwner { caller: *caller, lock: id });
        }
        if lock.unlocked {
            return Err(EscrowError::AlreadyUnlocked(id));
        }
        if now < lock.expiry {
            return Err(EscrowError::NotExpired { lock: id, expiry: lock.expiry, now });
        }
        let (native, paired, delegate) = (lock.native, lock.paired, lock.delegate);
        self.push_checkpoint(id, VeBalance::ZERO, delegate, now);
        if let Some(lock) = self.locks.get_mut(&id) {
            lock.unlocked = true;
        }
        debug!(%id, native, paired, "lock unlocked");
        Ok((native, paired))
    }

    /// Emergency exit: release a lock before expiry, removing its live
    /// contribution from the aggregates. Only reachable through the
    /// protocol façade while the system is frozen.
    pub fn emergency_unlock(
        &mut self,
        now: Timestamp,
        caller: &AccountId,
        id: LockId,
    ) -> Result<(u64, u64), EscrowError> {
        let lock = self.locks.get(&id).ok_or(EscrowError::LockNotFound(id))?;
        if lock.owner != *caller {
            return Err(EscrowError::NotLockOwner { caller: *caller, lock: id });
        }
        if lock.unlocked {
            return Err(EscrowError::AlreadyUnlocked(id));
        }
        let owner = lock.owner;
        let delegate = lock.delegate;
        let expiry = lock.expiry;
        let pair = lock.pair();
        let (native, paired) = (lock.native, lock.paired);

        if now < expiry {
            self.global.roll_forward(now);
            self.global.remove(&pair, expiry)?;
            let agg = self.aggregate_for_mut(&owner, delegate.as_ref());
            agg.roll_forward(now);
            agg.remove(&pair, expiry)?;
        }
        self.push_checkpoint(id, VeBalance::ZERO, delegate, now);
        if let Some(lock) = self.locks.get_mut(&id) {
            lock.unlocked = true;
        }
        debug!(%id, "emergency unlock");
        Ok((native, paired))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn lock(&self, id: LockId) -> Option<&Lock> {
        self.locks.get(&id)
    }

    pub fn lock_history(&self, id: LockId) -> &[LockCheckpoint] {
        self.history.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn locks_of(&self, owner: &AccountId) -> &[LockId] {
        self.owner_locks.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A lock's voting power as of `at`, valued from the last checkpoint
    /// taken at or before `at` — exact under later increases, delegation
    /// switches, and unlocks. Returns the delegation target in force then.
    pub fn lock_value_as_of(&self, id: LockId, at: Timestamp) -> (Option<AccountId>, u128) {
        let Some(history) = self.history.get(&id) else {
            return (None, 0);
        };
        let Some(entry) = history.iter().rev().find(|c| c.updated_at <= at) else {
            return (None, 0);
        };
        (entry.delegate, entry.balance.value_at(at))
    }

    /// Sum of an owner's lock values as of `at`, restricted to locks that
    /// were delegated to `delegate` at that time. The basis for a voter's
    /// share of delegated rewards.
    pub fn owner_delegated_share(
        &self,
        owner: &AccountId,
        delegate: &AccountId,
        at: Timestamp,
    ) -> u128 {
        self.locks_of(owner)
            .iter()
            .map(|&id| match self.lock_value_as_of(id, at) {
                (Some(d), value) if d == *delegate => value,
                _ => 0,
            })
            .sum()
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn check_delegate_target(
        &self,
        owner: &AccountId,
        target: &AccountId,
        directory: &dyn DelegateDirectory,
    ) -> Result<(), EscrowError> {
        if target.is_zero() {
            return Err(EscrowError::ZeroAccount);
        }
        if target == owner {
            return Err(EscrowError::SelfDelegation);
        }
        if !directory.is_registered(target) {
            return Err(EscrowError::DelegateNotRegistered(*target));
        }
        Ok(())
    }

    fn aggregate_for_mut(
        &mut self,
        owner: &AccountId,
        delegate: Option<&AccountId>,
    ) -> &mut Aggregate {
        match delegate {
            Some(d) => self.delegated.entry(*d).or_default(),
            None => self.personal.entry(*owner).or_default(),
        }
    }

    fn push_checkpoint(
        &mut self,
        id: LockId,
        balance: VeBalance,
        delegate: Option<AccountId>,
        now: Timestamp,
    ) {
        self.history.entry(id).or_default().push(LockCheckpoint {
            balance,
            delegate,
            updated_at: now,
        });
    }
}

impl VotingPower for EscrowLedger {
    fn personal_power(&self, account: &AccountId, at: Timestamp) -> u128 {
        self.personal.get(account).map(|a| a.value_at(at)).unwrap_or(0)
    }

    fn delegated_power(&self, account: &AccountId, at: Timestamp) -> u128 {
        self.delegated.get(account).map(|a| a.value_at(at)).unwrap_or(0)
    }

    fn total_power(&self, at: Timestamp) -> u128 {
        self.global.value_at(at)
    }
}
