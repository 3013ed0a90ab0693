//! Trait interfaces between crates and toward external collaborators.
//!
//! - [`AccessControl`] — role/pause/freeze authority (external collaborator)
//! - [`Custody`] — asset balance transfers (external collaborator)
//! - [`DelegateDirectory`] — delegate registration lookups (ebb-epoch
//!   implements; ebb-escrow consumes so it never depends on the epoch crate)
//! - [`VotingPower`] — read-only voting-power queries (ebb-escrow implements)

use serde::{Deserialize, Serialize};

use crate::error::CustodyError;
use crate::types::{AccountId, AssetKind, Timestamp};

/// Roles recognized by the access-control collaborator.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Pool/epoch administration: lifecycle transitions, pool batches,
    /// reward allocation, finalization.
    Admin,
    /// May force-finalize a stalled epoch.
    EmergencyOperator,
    /// Runs the post-epoch compliance checks.
    Verifier,
    /// Receives swept remainders.
    Collector,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::EmergencyOperator => "emergency-operator",
            Self::Verifier => "verifier",
            Self::Collector => "collector",
        }
    }
}

/// Caller authorization and the global pause/freeze flags.
///
/// Every mutating operation fails closed when paused. When frozen, only the
/// emergency-exit path (`emergency_unlock`) is usable.
pub trait AccessControl: Send + Sync {
    /// Whether the caller holds the given role.
    fn has_role(&self, caller: &AccountId, role: Role) -> bool;

    /// Global pause flag: all mutations rejected while set.
    fn is_paused(&self) -> bool;

    /// Global freeze flag: only the emergency-exit path usable while set.
    fn is_frozen(&self) -> bool;
}

/// Asset custody: principal in, payouts out.
///
/// The ledger never assumes `transfer_out` cannot fail — a failed native
/// transfer must be recovered by crediting a wrapped claimable balance,
/// not by failing the whole operation.
pub trait Custody: Send + Sync {
    /// Pull `amount` of `asset` from `from` into protocol custody.
    fn deposit(&mut self, from: &AccountId, asset: AssetKind, amount: u64)
        -> Result<(), CustodyError>;

    /// Push `amount` of `asset` from custody to `to`. May fail with
    /// [`CustodyError::TransferFailed`] if the recipient cannot receive.
    fn transfer_out(&mut self, to: &AccountId, asset: AssetKind, amount: u64)
        -> Result<(), CustodyError>;

    /// Current custody balance of `asset`.
    fn balance(&self, asset: AssetKind) -> u64;
}

/// Lookup of registered delegates.
///
/// The escrow checks delegation targets through this seam so the delegate
/// registry can live in the epoch crate without a dependency cycle.
pub trait DelegateDirectory {
    /// Whether `account` is currently a registered delegate.
    fn is_registered(&self, account: &AccountId) -> bool;
}

/// Read-only voting-power queries, evaluated lazily over the slope-change
/// schedule so they never require mutation.
pub trait VotingPower {
    /// Personal (non-delegated) voting power of `account` at `at`.
    fn personal_power(&self, account: &AccountId, at: Timestamp) -> u128;

    /// Voting power delegated *to* `account` at `at`.
    fn delegated_power(&self, account: &AccountId, at: Timestamp) -> u128;

    /// Total voting power across all locks at `at`.
    fn total_power(&self, at: Timestamp) -> u128;
}
