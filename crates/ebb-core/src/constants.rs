//! Protocol constants. All asset amounts in base units (1 token = 10^8 units).

/// Smallest-denomination scale for asset amounts.
pub const UNIT: u64 = 100_000_000;

/// Length of one epoch in seconds (one week).
///
/// The epoch is the unit of voting, allocation, and claiming. Lock expiries
/// must land exactly on a multiple of this value.
pub const EPOCH_LENGTH: u64 = 604_800;

/// Minimum lock duration, in epochs, measured from the current epoch start.
pub const MIN_LOCK_EPOCHS: u64 = 2;

/// Maximum lock duration in epochs (two years of weekly epochs).
pub const MAX_LOCK_EPOCHS: u64 = 104;

/// Maximum lock duration in seconds. The slope of a lock is
/// `principal / MAX_LOCK_DURATION`, so a max-duration lock starts at full
/// principal weight and shorter locks start proportionally lower.
pub const MAX_LOCK_DURATION: u64 = MAX_LOCK_EPOCHS * EPOCH_LENGTH;

/// Basis-point precision for fee percentages (10_000 = 100%).
pub const BPS_PRECISION: u64 = 10_000;

/// Upper bound on a delegate's fee (half of delegated rewards).
pub const MAX_DELEGATE_FEE_BPS: u64 = 5_000;

/// Epochs between a requested fee increase and its activation.
/// Decreases apply immediately; only increases are delayed.
pub const FEE_INCREASE_DELAY_EPOCHS: u64 = 2;

/// Flat deposit paid into custody when registering as a delegate.
pub const DELEGATE_REGISTRATION_FEE: u64 = 100 * UNIT;

/// Epochs after finalization before the collector may sweep a track's
/// unclaimed remainder.
pub const SWEEP_COOLDOWN_EPOCHS: u64 = 4;

/// Epoch number containing the given timestamp.
pub fn epoch_of(ts: u64) -> u64 {
    ts / EPOCH_LENGTH
}

/// First timestamp of the given epoch.
pub fn epoch_start(epoch: u64) -> u64 {
    epoch.saturating_mul(EPOCH_LENGTH)
}

/// First timestamp *after* the given epoch (exclusive end).
pub fn epoch_end(epoch: u64) -> u64 {
    epoch_start(epoch).saturating_add(EPOCH_LENGTH)
}

/// Whether a timestamp lands exactly on an epoch boundary.
pub fn is_epoch_aligned(ts: u64) -> bool {
    ts % EPOCH_LENGTH == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_length_is_one_week() {
        assert_eq!(EPOCH_LENGTH, 7 * 24 * 60 * 60);
    }

    #[test]
    fn max_lock_is_two_years_of_epochs() {
        assert_eq!(MAX_LOCK_DURATION, 104 * EPOCH_LENGTH);
    }

    #[test]
    fn epoch_of_boundary_belongs_to_new_epoch() {
        assert_eq!(epoch_of(0), 0);
        assert_eq!(epoch_of(EPOCH_LENGTH - 1), 0);
        assert_eq!(epoch_of(EPOCH_LENGTH), 1);
    }

    #[test]
    fn epoch_start_end_roundtrip() {
        for e in [0u64, 1, 5, 104, 10_000] {
            assert_eq!(epoch_of(epoch_start(e)), e);
            assert_eq!(epoch_end(e), epoch_start(e + 1));
        }
    }

    #[test]
    fn alignment_check() {
        assert!(is_epoch_aligned(0));
        assert!(is_epoch_aligned(3 * EPOCH_LENGTH));
        assert!(!is_epoch_aligned(3 * EPOCH_LENGTH + 1));
    }

    #[test]
    fn fee_cap_below_precision() {
        assert!(MAX_DELEGATE_FEE_BPS < BPS_PRECISION);
    }
}
