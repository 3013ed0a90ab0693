//! In-memory custody implementations.
//!
//! [`MemoryCustody`] is suitable for tests and the simulator; production
//! deployments bind [`Custody`](crate::traits::Custody) to the host ledger's
//! transfer primitives. [`FlakyCustody`] wraps another custody and fails
//! outbound transfers to a configured set of recipients, for exercising the
//! wrapped-balance fallback.

use std::collections::HashMap;

use crate::error::CustodyError;
use crate::traits::Custody;
use crate::types::{AccountId, AssetKind};

/// In-memory custody with unlimited external accounts.
///
/// Deposits always succeed (external balances are not modeled); the custody
/// pot per asset is tracked exactly so solvency checks are meaningful.
#[derive(Debug, Default)]
pub struct MemoryCustody {
    pot: HashMap<AssetKind, u64>,
    /// Amounts paid out, per recipient and asset. Tests read these.
    paid: HashMap<(AccountId, AssetKind), u64>,
}

impl MemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the custody pot directly (e.g. reward funding before finalize).
    pub fn fund(&mut self, asset: AssetKind, amount: u64) {
        *self.pot.entry(asset).or_insert(0) += amount;
    }

    /// Total paid out to `to` in `asset` so far.
    pub fn paid_to(&self, to: &AccountId, asset: AssetKind) -> u64 {
        self.paid.get(&(*to, asset)).copied().unwrap_or(0)
    }
}

impl Custody for MemoryCustody {
    fn deposit(
        &mut self,
        _from: &AccountId,
        asset: AssetKind,
        amount: u64,
    ) -> Result<(), CustodyError> {
        let pot = self.pot.entry(asset).or_insert(0);
        *pot = pot.checked_add(amount).ok_or(CustodyError::BalanceOverflow)?;
        Ok(())
    }

    fn transfer_out(
        &mut self,
        to: &AccountId,
        asset: AssetKind,
        amount: u64,
    ) -> Result<(), CustodyError> {
        let have = self.balance(asset);
        if have < amount {
            return Err(CustodyError::InsufficientFunds { have, need: amount });
        }
        *self.pot.entry(asset).or_insert(0) -= amount;
        *self.paid.entry((*to, asset)).or_insert(0) += amount;
        Ok(())
    }

    fn balance(&self, asset: AssetKind) -> u64 {
        self.pot.get(&asset).copied().unwrap_or(0)
    }
}

/// Custody wrapper that rejects outbound transfers to listed recipients,
/// permanently or for a bounded number of attempts.
///
/// Deposits and balance queries pass through unchanged.
#[derive(Debug, Default)]
pub struct FlakyCustody {
    inner: MemoryCustody,
    /// `None` rejects forever; `Some(n)` rejects the next `n` transfers.
    rejects: HashMap<AccountId, Option<u32>>,
}

impl FlakyCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all future `transfer_out` calls to `account` fail.
    pub fn reject(&mut self, account: AccountId) {
        self.rejects.insert(account, None);
    }

    /// Fail the next `n` `transfer_out` calls to `account`, then recover.
    pub fn reject_next(&mut self, account: AccountId, n: u32) {
        self.rejects.insert(account, Some(n));
    }

    pub fn inner(&self) -> &MemoryCustody {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut MemoryCustody {
        &mut self.inner
    }
}

impl Custody for FlakyCustody {
    fn deposit(
        &mut self,
        from: &AccountId,
        asset: AssetKind,
        amount: u64,
    ) -> Result<(), CustodyError> {
        self.inner.deposit(from, asset, amount)
    }

    fn transfer_out(
        &mut self,
        to: &AccountId,
        asset: AssetKind,
        amount: u64,
    ) -> Result<(), CustodyError> {
        if let Some(remaining) = self.rejects.get_mut(to) {
            match remaining {
                None => return Err(CustodyError::TransferFailed(*to)),
                Some(n) => {
                    *n -= 1;
                    if *n == 0 {
                        self.rejects.remove(to);
                    }
                    return Err(CustodyError::TransferFailed(*to));
                }
            }
        }
        self.inner.transfer_out(to, asset, amount)
    }

    fn balance(&self, asset: AssetKind) -> u64 {
        self.inner.balance(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(seed: u8) -> AccountId {
        AccountId([seed; 32])
    }

    #[test]
    fn deposit_grows_pot() {
        let mut c = MemoryCustody::new();
        c.deposit(&acct(1), AssetKind::Native, 500).unwrap();
        c.deposit(&acct(2), AssetKind::Native, 300).unwrap();
        assert_eq!(c.balance(AssetKind::Native), 800);
        assert_eq!(c.balance(AssetKind::Paired), 0);
    }

    #[test]
    fn transfer_out_requires_funds() {
        let mut c = MemoryCustody::new();
        c.fund(AssetKind::Reward, 100);
        let err = c.transfer_out(&acct(1), AssetKind::Reward, 101).unwrap_err();
        assert_eq!(err, CustodyError::InsufficientFunds { have: 100, need: 101 });
        c.transfer_out(&acct(1), AssetKind::Reward, 100).unwrap();
        assert_eq!(c.balance(AssetKind::Reward), 0);
        assert_eq!(c.paid_to(&acct(1), AssetKind::Reward), 100);
    }

    #[test]
    fn assets_are_independent() {
        let mut c = MemoryCustody::new();
        c.fund(AssetKind::Reward, 50);
        c.fund(AssetKind::Subsidy, 70);
        c.transfer_out(&acct(3), AssetKind::Subsidy, 70).unwrap();
        assert_eq!(c.balance(AssetKind::Reward), 50);
        assert_eq!(c.balance(AssetKind::Subsidy), 0);
    }

    #[test]
    fn flaky_rejects_listed_recipient_only() {
        let mut c = FlakyCustody::new();
        c.inner_mut().fund(AssetKind::Reward, 100);
        c.reject(acct(9));
        let err = c.transfer_out(&acct(9), AssetKind::Reward, 10).unwrap_err();
        assert_eq!(err, CustodyError::TransferFailed(acct(9)));
        // Pot untouched by the failed transfer.
        assert_eq!(c.balance(AssetKind::Reward), 100);
        c.transfer_out(&acct(8), AssetKind::Reward, 10).unwrap();
        assert_eq!(c.balance(AssetKind::Reward), 90);
    }

    #[test]
    fn bounded_rejection_recovers() {
        let mut c = FlakyCustody::new();
        c.inner_mut().fund(AssetKind::Reward, 100);
        c.reject_next(acct(9), 2);
        assert!(c.transfer_out(&acct(9), AssetKind::Reward, 10).is_err());
        assert!(c.transfer_out(&acct(9), AssetKind::Reward, 10).is_err());
        c.transfer_out(&acct(9), AssetKind::Reward, 10).unwrap();
        assert_eq!(c.inner().paid_to(&acct(9), AssetKind::Reward), 10);
    }
}
