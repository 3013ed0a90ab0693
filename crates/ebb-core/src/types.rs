//! Core protocol types: accounts, locks, pools, assets.
//!
//! Asset amounts are `u64` in base units (1 token = 10^8 units). Voting
//! power and vote tallies are `u128` because aggregates sum over many locks
//! and can exceed `u64`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte account identifier.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// The zero account. Never a valid lock owner or delegate.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create an AccountId from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero account.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell accounts apart in logs.
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for AccountId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identifier of a lock in the escrow ledger.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// Identifier of a votable pool.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Sequential epoch number.
pub type EpochId = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Fungible asset kinds handled by custody.
///
/// `Native` and `Paired` are the two lockable principal kinds; `Reward` and
/// `Subsidy` are the payout tracks distributed per epoch.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Native,
    Paired,
    Reward,
    Subsidy,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Native => "native",
            Self::Paired => "paired",
            Self::Reward => "reward",
            Self::Subsidy => "subsidy",
        };
        write!(f, "{name}")
    }
}

/// The two payout tracks an epoch distributes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Track {
    Reward,
    Subsidy,
}

impl Track {
    /// The custody asset this track pays out in.
    pub fn asset(&self) -> AssetKind {
        match self {
            Self::Reward => AssetKind::Reward,
            Self::Subsidy => AssetKind::Subsidy,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reward => write!(f, "reward"),
            Self::Subsidy => write!(f, "subsidy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_account_is_zero() {
        assert!(AccountId::ZERO.is_zero());
        assert!(!AccountId([1; 32]).is_zero());
    }

    #[test]
    fn account_display_is_short_hex() {
        let a = AccountId([0xAB; 32]);
        assert_eq!(format!("{a}"), "abababababababab");
    }

    #[test]
    fn lock_and_pool_display() {
        assert_eq!(format!("{}", LockId(7)), "lock#7");
        assert_eq!(format!("{}", PoolId(3)), "pool#3");
    }

    #[test]
    fn track_maps_to_asset() {
        assert_eq!(Track::Reward.asset(), AssetKind::Reward);
        assert_eq!(Track::Subsidy.asset(), AssetKind::Subsidy);
    }
}
