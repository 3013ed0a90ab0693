//! Integration test suite for the Ebb protocol.
//!
//! The tests drive the full stack through the protocol façade: escrow locks
//! feed voting power into epoch votes, epochs finalize into claimable
//! allocations, and every conservation invariant (vote totals, solvency,
//! no-over-claim, exact decay) is checked end to end.

pub mod helpers;
