//! Linear-decay voting-power representation.
//!
//! A [`VeBalance`] is a `(bias, slope)` pair in absolute form: the value at
//! time `t` is `bias − slope·t`, clamped at zero. A lock of principal `P`
//! expiring at `E` contributes `slope = P / MAX_LOCK_DURATION` and
//! `bias = slope·E`, so its value is `slope·(E − t)` — exactly zero at
//! expiry. Pairs add component-wise, which is what makes incremental
//! aggregate maintenance correct.
//!
//! An [`Aggregate`] couples the latest [`Checkpoint`] with the slope-change
//! schedule: a map from expiry boundary to the total slope expiring there.
//! [`Aggregate::roll_forward`] consumes each boundary in
//! `(updated_at, to]` exactly once, subtracting `(Δ·B, Δ)` at boundary `B`,
//! so advancing is O(boundaries crossed) and idempotent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ebb_core::error::EscrowError;
use ebb_core::types::Timestamp;

/// A decaying balance: value at time `t` is `bias − slope·t`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct VeBalance {
    pub bias: u128,
    pub slope: u128,
}

impl VeBalance {
    /// The zero balance.
    pub const ZERO: Self = Self { bias: 0, slope: 0 };

    /// Balance of a single lock: `slope` with expiry `expiry`.
    /// `bias = slope·expiry` so the value reaches zero exactly at expiry.
    pub fn from_lock(slope: u128, expiry: Timestamp) -> Self {
        Self {
            bias: slope * expiry as u128,
            slope,
        }
    }

    /// Value at time `t`, clamped at zero.
    pub fn value_at(&self, t: Timestamp) -> u128 {
        self.bias.saturating_sub(self.slope * t as u128)
    }

    /// Whether the balance has fully decayed at time `t`.
    pub fn is_expired_at(&self, t: Timestamp) -> bool {
        self.value_at(t) == 0
    }

    /// Component-wise sum.
    pub fn add(&self, other: &Self) -> Result<Self, EscrowError> {
        Ok(Self {
            bias: self
                .bias
                .checked_add(other.bias)
                .ok_or(EscrowError::ArithmeticOverflow)?,
            slope: self
                .slope
                .checked_add(other.slope)
                .ok_or(EscrowError::ArithmeticOverflow)?,
        })
    }

    /// Component-wise difference. Errs if `other` was never included.
    pub fn sub(&self, other: &Self) -> Result<Self, EscrowError> {
        Ok(Self {
            bias: self
                .bias
                .checked_sub(other.bias)
                .ok_or(EscrowError::ArithmeticOverflow)?,
            slope: self
                .slope
                .checked_sub(other.slope)
                .ok_or(EscrowError::ArithmeticOverflow)?,
        })
    }
}

/// A `(balance, last-updated)` snapshot.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Checkpoint {
    pub balance: VeBalance,
    pub updated_at: Timestamp,
}

/// A rolling aggregate balance with its slope-change schedule.
///
/// One exists globally, one per account for personal power, and one per
/// delegate for power delegated to it. The checkpoint is latest-only; the
/// schedule keeps every registered expiry so value queries at or after
/// `updated_at` stay exact without mutation.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Aggregate {
    pub checkpoint: Checkpoint,
    slope_changes: BTreeMap<Timestamp, u128>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduled slope reduction at `expiry`, if any.
    pub fn slope_change_at(&self, expiry: Timestamp) -> u128 {
        self.slope_changes.get(&expiry).copied().unwrap_or(0)
    }

    /// Register an additional `slope` expiring at `expiry`.
    ///
    /// Callers must have rolled the aggregate forward past no later than
    /// `expiry`; the ledger guarantees this because expiries are always in
    /// the future at registration time.
    pub fn schedule_slope_change(&mut self, expiry: Timestamp, slope: u128) {
        if slope == 0 {
            return;
        }
        *self.slope_changes.entry(expiry).or_insert(0) += slope;
    }

    /// Remove `slope` from the reduction scheduled at `expiry` (a lock moved
    /// to another aggregate before expiring).
    pub fn unschedule_slope_change(
        &mut self,
        expiry: Timestamp,
        slope: u128,
    ) -> Result<(), EscrowError> {
        if slope == 0 {
            return Ok(());
        }
        let entry = self
            .slope_changes
            .get_mut(&expiry)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        *entry = entry.checked_sub(slope).ok_or(EscrowError::ArithmeticOverflow)?;
        if *entry == 0 {
            self.slope_changes.remove(&expiry);
        }
        Ok(())
    }

    /// Advance the checkpoint to `to`, consuming every expiry boundary in
    /// `(updated_at, to]` exactly once.
    ///
    /// Idempotent: a second call with the same `to` crosses no boundaries.
    /// Must run before any mutation of the aggregate, or expired slopes
    /// would be double-counted when later added to or removed from the pair.
    pub fn roll_forward(&mut self, to: Timestamp) {
        if to <= self.checkpoint.updated_at {
            return;
        }
        let from = self.checkpoint.updated_at;
        let mut balance = self.checkpoint.balance;
        let mut crossed = 0usize;
        for (&boundary, &delta) in self.slope_changes.range(from + 1..=to) {
            balance.bias = balance.bias.saturating_sub(delta * boundary as u128);
            balance.slope = balance.slope.saturating_sub(delta);
            crossed += 1;
        }
        if crossed > 0 {
            debug!(from, to, crossed, "rolled aggregate checkpoint forward");
        }
        self.checkpoint = Checkpoint {
            balance,
            updated_at: to,
        };
    }

    /// Value at `at` without mutating the checkpoint.
    ///
    /// For `at ≥ updated_at` this folds the schedule over
    /// `(updated_at, at]` and is exact. Queries strictly before
    /// `updated_at` are not supported and return the clamped evaluation of
    /// the current pair.
    pub fn value_at(&self, at: Timestamp) -> u128 {
        let mut balance = self.checkpoint.balance;
        if at > self.checkpoint.updated_at {
            for (&boundary, &delta) in self.slope_changes.range(self.checkpoint.updated_at + 1..=at)
            {
                balance.bias = balance.bias.saturating_sub(delta * boundary as u128);
                balance.slope = balance.slope.saturating_sub(delta);
            }
        }
        balance.value_at(at)
    }

    /// Add a lock's pair into the aggregate. The aggregate must already be
    /// rolled forward to the mutation time.
    pub fn add(&mut self, pair: &VeBalance, expiry: Timestamp) -> Result<(), EscrowError> {
        self.checkpoint.balance = self.checkpoint.balance.add(pair)?;
        self.schedule_slope_change(expiry, pair.slope);
        Ok(())
    }

    /// Remove an unexpired lock's pair from the aggregate. The aggregate
    /// must already be rolled forward to the mutation time, which must be
    /// strictly before `expiry`.
    pub fn remove(&mut self, pair: &VeBalance, expiry: Timestamp) -> Result<(), EscrowError> {
        self.checkpoint.balance = self.checkpoint.balance.sub(pair)?;
        self.unschedule_slope_change(expiry, pair.slope)
    }
}
