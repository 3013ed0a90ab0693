//! # ebb-epoch — Epoch lifecycle, vote accounting, and distribution.
//!
//! Each epoch walks a strictly forward state machine
//! (`Voting → Ended → Verified → Processed → Finalized`, with an emergency
//! `ForceFinalized` shortcut once the voting window has elapsed). Votes are
//! bounded by voting power as of the epoch's end, conserved across pools,
//! and settle into immutable per-epoch allocations that rewards, subsidies,
//! and delegate fees are claimed against with truncating pro-rata division.
//! Truncation remainders are swept by a collector after a cooldown — never
//! silently lost, never over-distributed.
//!
//! The [`Protocol`] façade wires the engine to the escrow ledger and the
//! external custody/access-control collaborators.

pub mod delegate;
pub mod engine;
pub mod epoch;
pub mod pool;
pub mod protocol;
pub mod rewards;
pub mod votes;

pub use engine::EpochEngine;
pub use epoch::{Epoch, EpochState, TrackTotals};
pub use pool::{Pool, PoolRegistry};
pub use protocol::Protocol;
