//! Pool registry: votable targets and their lifetime vote totals.
//!
//! Pools are never deleted — removal only deactivates, so per-epoch vote
//! history for a removed pool stays addressable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use ebb_core::error::EpochError;
use ebb_core::types::{EpochId, PoolId};

/// A votable pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub id: PoolId,
    pub active: bool,
    pub created_at_epoch: EpochId,
    /// Cumulative votes cast across all epochs.
    pub lifetime_votes: u128,
}

/// Registry of all pools, active and removed.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PoolRegistry {
    pools: HashMap<PoolId, Pool>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PoolId) -> Option<&Pool> {
        self.pools.get(&id)
    }

    pub fn is_active(&self, id: PoolId) -> bool {
        self.pools.get(&id).map(|p| p.active).unwrap_or(false)
    }

    pub fn active_count(&self) -> u64 {
        self.pools.values().filter(|p| p.active).count() as u64
    }

    pub fn contains(&self, id: PoolId) -> bool {
        self.pools.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PoolId, &Pool)> {
        self.pools.iter().map(|(&id, pool)| (id, pool))
    }

    /// Register a new pool. Rejects duplicates, including removed pools
    /// (their history must stay addressable under the old id).
    pub fn create(&mut self, id: PoolId, epoch: EpochId) -> Result<(), EpochError> {
        if self.pools.contains_key(&id) {
            return Err(EpochError::PoolAlreadyExists(id));
        }
        self.pools.insert(
            id,
            Pool {
                id,
                active: true,
                created_at_epoch: epoch,
                lifetime_votes: 0,
            },
        );
        Ok(())
    }

    /// Deactivate a pool. Its record and vote history remain.
    pub fn remove(&mut self, id: PoolId) -> Result<(), EpochError> {
        let pool = self.pools.get_mut(&id).ok_or(EpochError::PoolNotFound(id))?;
        if !pool.active {
            return Err(EpochError::PoolAlreadyRemoved(id));
        }
        pool.active = false;
        Ok(())
    }

    /// Accumulate lifetime votes for a pool the engine has already checked.
    pub fn add_lifetime_votes(&mut self, id: PoolId, amount: u128) {
        if let Some(pool) = self.pools.get_mut(&id) {
            pool.lifetime_votes += amount;
        }
    }

    /// Undo lifetime votes when a migration moves them to another pool.
    pub fn sub_lifetime_votes(&mut self, id: PoolId, amount: u128) {
        if let Some(pool) = self.pools.get_mut(&id) {
            pool.lifetime_votes = pool.lifetime_votes.saturating_sub(amount);
        }
    }
}
