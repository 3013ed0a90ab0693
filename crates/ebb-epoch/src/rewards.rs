//! Payout arithmetic.
//!
//! All splits truncate toward zero in u128 intermediates, so the sum of
//! the parts never exceeds the whole. Dust stranded by truncation stays
//! in custody until the post-finalization sweep collects it.

use ebb_core::constants::BPS_PRECISION;
use ebb_core::error::EpochError;

/// `amount * share / total`, truncating. Zero when `total` is zero.
pub fn pro_rata(amount: u64, share: u128, total: u128) -> Result<u64, EpochError> {
    if total == 0 || share == 0 {
        return Ok(0);
    }
    let scaled = (amount as u128)
        .checked_mul(share)
        .ok_or(EpochError::ArithmeticOverflow)?;
    let out = scaled / total;
    u64::try_from(out).map_err(|_| EpochError::ArithmeticOverflow)
}

/// Split a gross payout into (owner, delegate fee) parts. The fee is
/// truncated, so the owner keeps the rounding dust of their own payout.
pub fn fee_split(gross: u64, fee_bps: u64) -> (u64, u64) {
    let fee = ((gross as u128) * (fee_bps as u128) / (BPS_PRECISION as u128)) as u64;
    (gross - fee, fee)
}
