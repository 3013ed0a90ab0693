//! Error types for the Ebb protocol.
//!
//! Every failed operation leaves state unchanged: implementations validate
//! all preconditions before the first mutation. Conservation violations
//! (claimed > allocated, negative vote totals) are structurally unreachable
//! and have no error variants.
use thiserror::Error;

use crate::types::{AccountId, EpochId, LockId, PoolId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("zero account is not a valid owner or delegate")] ZeroAccount,
    #[error("expiry {0} is not epoch-aligned")] UnalignedExpiry(u64),
    #[error("expiry too soon: minimum {min}, got {got}")] ExpiryTooSoon { min: u64, got: u64 },
    #[error("expiry too far: maximum {max}, got {got}")] ExpiryTooFar { max: u64, got: u64 },
    #[error("total principal is zero")] ZeroPrincipal,
    #[error("lock not found: {0}")] LockNotFound(LockId),
    #[error("caller {caller} is not the owner of {lock}")] NotLockOwner { caller: AccountId, lock: LockId },
    #[error("lock already unlocked: {0}")] AlreadyUnlocked(LockId),
    #[error("lock {lock} not expired: expiry {expiry}, now {now}")] NotExpired { lock: LockId, expiry: u64, now: u64 },
    #[error("lock {lock} already expired at {expiry}")] Expired { lock: LockId, expiry: u64 },
    #[error("delegate not registered: {0}")] DelegateNotRegistered(AccountId),
    #[error("cannot delegate a lock to its own owner")] SelfDelegation,
    #[error("lock already in the requested delegation state")] DelegationUnchanged,
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    #[error("epoch {epoch} in state {got}, expected {expected}")] WrongState { epoch: EpochId, expected: &'static str, got: &'static str },
    #[error("epoch {epoch} voting window open until {end}, now {now}")] VotingWindowOpen { epoch: EpochId, end: u64, now: u64 },
    #[error("epoch {epoch} voting window closed at {end}, now {now}")] VotingClosed { epoch: EpochId, end: u64, now: u64 },
    #[error("epoch not found: {0}")] EpochNotFound(EpochId),
    #[error("pool not found: {0}")] PoolNotFound(PoolId),
    #[error("pool inactive: {0}")] PoolInactive(PoolId),
    #[error("pool already exists: {0}")] PoolAlreadyExists(PoolId),
    #[error("pool already removed: {0}")] PoolAlreadyRemoved(PoolId),
    #[error("previous epoch {0} is not finalized")] PreviousEpochNotFinalized(EpochId),
    #[error("amount is zero")] ZeroAmount,
    #[error("insufficient voting power: available {available}, requested {requested}")] InsufficientVotingPower { available: u128, requested: u128 },
    #[error("insufficient votes in {pool}: have {have}, need {need}")] InsufficientVotes { pool: PoolId, have: u128, need: u128 },
    #[error("allocation to zero-vote pool {0} would be unclaimable")] ZeroVotePool(PoolId),
    #[error("pool {0} already allocated this epoch")] PoolAlreadyProcessed(PoolId),
    #[error("delegate already registered: {0}")] DelegateAlreadyRegistered(AccountId),
    #[error("delegate not registered: {0}")] DelegateNotRegistered(AccountId),
    #[error("fee {fee} exceeds maximum {max} bps")] FeeTooHigh { fee: u64, max: u64 },
    #[error("fee unchanged")] FeeUnchanged,
    #[error("identical fee increase to {0} bps already pending")] DuplicatePendingFee(u64),
    #[error("delegate has {votes} votes spent in the current epoch")] DelegateHasVotes { votes: u128 },
    #[error("account {account} blocked by verifier for epoch {epoch}")] AccountBlocked { account: AccountId, epoch: EpochId },
    #[error("nothing to claim")] NothingToClaim,
    #[error("already claimed for this epoch/pool")] AlreadyClaimed,
    #[error("{track} track already swept for epoch {epoch}")] TrackSwept { epoch: EpochId, track: &'static str },
    #[error("sweep cooldown active until {until}, now {now}")] SweepCooldown { until: u64, now: u64 },
    #[error("insolvent: custody holds {have}, outstanding claims {need}")] Insolvent { have: u64, need: u64 },
    #[error("arithmetic overflow")] ArithmeticOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("caller {caller} lacks role {role}")] Unauthorized { caller: AccountId, role: &'static str },
    #[error("protocol is paused")] Paused,
    #[error("protocol is frozen")] Frozen,
    #[error("operation requires the protocol to be frozen")] NotFrozen,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("insufficient custody funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("native transfer to {0} failed")] TransferFailed(AccountId),
    #[error("custody balance overflow")] BalanceOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EbbError {
    #[error(transparent)] Escrow(#[from] EscrowError),
    #[error(transparent)] Epoch(#[from] EpochError),
    #[error(transparent)] Auth(#[from] AuthError),
    #[error(transparent)] Custody(#[from] CustodyError),
}
