//! Shared helpers for the integration tests.

use ebb_core::access::StaticAccess;
use ebb_core::custody::MemoryCustody;
use ebb_core::types::{AccountId, PoolId, Timestamp, Track};
use ebb_epoch::Protocol;

/// Account from a seed byte.
pub fn acct(seed: u8) -> AccountId {
    AccountId([seed; 32])
}

/// The all-roles operator every test uses for lifecycle calls.
pub fn admin() -> AccountId {
    acct(200)
}

/// Protocol over in-memory custody with `admin()` holding every role.
/// The returned access handle shares state with the protocol's copy, so
/// tests can pause/freeze after construction.
pub fn protocol(now: Timestamp) -> (Protocol, StaticAccess) {
    let access = StaticAccess::superuser(admin());
    let p = Protocol::new(now, Box::new(MemoryCustody::new()), Box::new(access.clone()));
    (p, access)
}

/// Drive the current epoch to `Finalized` at `now`: end, verify, allocate
/// `items`, fund both tracks exactly, finalize. Panics on any failure, so
/// tests read as straight-line scenarios.
pub fn finalize_current(p: &mut Protocol, now: Timestamp, items: &[(PoolId, u64, u64)]) {
    let epoch = p.engine().current_epoch();
    p.end_epoch(now, admin()).unwrap();
    p.process_verifier_checks(admin(), epoch, true, vec![]).unwrap();
    p.process_rewards_and_subsidies(admin(), epoch, items).unwrap();
    let reward: u64 = items.iter().map(|i| i.1).sum();
    let subsidy: u64 = items.iter().map(|i| i.2).sum();
    if reward > 0 {
        p.fund_track(admin(), Track::Reward, reward).unwrap();
    }
    if subsidy > 0 {
        p.fund_track(admin(), Track::Subsidy, subsidy).unwrap();
    }
    p.finalize_epoch(now, admin(), epoch).unwrap();
}
