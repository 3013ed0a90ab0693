//! # ebb-escrow — Decaying voting-power ledger.
//!
//! All arithmetic is integer-only for determinism.
//!
//! Users lock principal in two asset kinds for an epoch-aligned duration and
//! receive voting power that decays linearly to exactly zero at expiry:
//! - **Bias/slope representation**: a lock of total principal `P` expiring at
//!   `E` contributes `slope = P / MAX_LOCK_DURATION`, `bias = slope · E`;
//!   voting power at time `t` is `bias − slope·t`, zero at `t = E` by
//!   construction.
//! - **Additive aggregates**: bias and slope sum linearly across locks, so
//!   global and per-account balances are maintained incrementally without
//!   ever iterating locks.
//! - **Slope-change schedule**: each expiry boundary carries the aggregate
//!   slope reduction due then; rolling a checkpoint forward applies each
//!   boundary's reduction exactly once, keeping roll-forward O(epochs
//!   elapsed), not O(locks).

pub mod ledger;
pub mod ve;

pub use ledger::{EscrowLedger, Lock};
pub use ve::{Aggregate, Checkpoint, VeBalance};
