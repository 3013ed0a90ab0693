//! In-memory access control for tests and the simulator.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::{AccessControl, Role};
use crate::types::AccountId;

/// Role table with settable pause/freeze flags.
///
/// Cloning shares the underlying state, so a caller can keep a handle and
/// flip the flags after handing a clone to the protocol.
#[derive(Debug, Default, Clone)]
pub struct StaticAccess {
    grants: Arc<Mutex<HashSet<(AccountId, Role)>>>,
    paused: Arc<AtomicBool>,
    frozen: Arc<AtomicBool>,
}

impl StaticAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every role to `account`. Convenient for single-admin tests.
    pub fn superuser(account: AccountId) -> Self {
        let access = Self::new();
        for role in [Role::Admin, Role::EmergencyOperator, Role::Verifier, Role::Collector] {
            access.grant(account, role);
        }
        access
    }

    fn grants(&self) -> std::sync::MutexGuard<'_, HashSet<(AccountId, Role)>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn grant(&self, account: AccountId, role: Role) {
        self.grants().insert((account, role));
    }

    pub fn revoke(&self, account: AccountId, role: Role) {
        self.grants().remove(&(account, role));
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::Relaxed);
    }
}

impl AccessControl for StaticAccess {
    fn has_role(&self, caller: &AccountId, role: Role) -> bool {
        self.grants().contains(&(*caller, role))
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Relaxed)
    }
}
