//! Delegate registry: registration, fee state, and the delayed-increase rule.
//!
//! A fee decrease applies immediately and clears any pending increase. An
//! increase is deferred by [`FEE_INCREASE_DELAY_EPOCHS`] so lock owners get
//! time to re-delegate before paying more. A pending fee is therefore always
//! strictly greater than the current fee and carries a nonzero activation
//! epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use ebb_core::constants::{FEE_INCREASE_DELAY_EPOCHS, MAX_DELEGATE_FEE_BPS};
use ebb_core::error::EpochError;
use ebb_core::traits::DelegateDirectory;
use ebb_core::types::{AccountId, EpochId};

/// A pending (deferred) fee increase.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingFee {
    pub fee_bps: u64,
    pub activation_epoch: EpochId,
}

/// One registered delegate's fee state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Delegate {
    pub fee_bps: u64,
    pub pending: Option<PendingFee>,
    pub registered_at_epoch: EpochId,
    /// Registration deposit held in custody, refunded on unregistration.
    pub registration_fee_paid: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DelegateRegistry {
    delegates: HashMap<AccountId, Delegate>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &AccountId) -> Option<&Delegate> {
        self.delegates.get(account)
    }

    pub fn register(
        &mut self,
        account: AccountId,
        fee_bps: u64,
        epoch: EpochId,
        registration_fee: u64,
    ) -> Result<(), EpochError> {
        if self.delegates.contains_key(&account) {
            return Err(EpochError::DelegateAlreadyRegistered(account));
        }
        if fee_bps > MAX_DELEGATE_FEE_BPS {
            return Err(EpochError::FeeTooHigh { fee: fee_bps, max: MAX_DELEGATE_FEE_BPS });
        }
        self.delegates.insert(
            account,
            Delegate {
                fee_bps,
                pending: None,
                registered_at_epoch: epoch,
                registration_fee_paid: registration_fee,
            },
        );
        Ok(())
    }

    /// Fold an activated pending increase into the current fee. Run before
    /// reading or comparing fees for `epoch`.
    fn materialize(delegate: &mut Delegate, epoch: EpochId) {
        if let Some(pending) = delegate.pending {
            if epoch >= pending.activation_epoch {
                delegate.fee_bps = pending.fee_bps;
                delegate.pending = None;
            }
        }
    }

    /// The fee a delegate charges for `epoch`.
    pub fn effective_fee(&self, account: &AccountId, epoch: EpochId) -> Result<u64, EpochError> {
        let delegate = self
            .delegates
            .get(account)
            .ok_or(EpochError::DelegateNotRegistered(*account))?;
        match delegate.pending {
            Some(pending) if epoch >= pending.activation_epoch => Ok(pending.fee_bps),
            _ => Ok(delegate.fee_bps),
        }
    }

    /// Change a delegate's fee as of `current_epoch`.
    ///
    /// Decreases apply immediately and clear any pending increase;
    /// increases are deferred. Re-requesting an identical unresolved
    /// pending increase is rejected so callers notice the no-op.
    pub fn update_fee(
        &mut self,
        account: &AccountId,
        new_fee_bps: u64,
        current_epoch: EpochId,
    ) -> Result<(), EpochError> {
        if new_fee_bps > MAX_DELEGATE_FEE_BPS {
            return Err(EpochError::FeeTooHigh { fee: new_fee_bps, max: MAX_DELEGATE_FEE_BPS });
        }
        let delegate = self
            .delegates
            .get_mut(account)
            .ok_or(EpochError::DelegateNotRegistered(*account))?;
        Self::materialize(delegate, current_epoch);
        if new_fee_bps == delegate.fee_bps && delegate.pending.is_none() {
            return Err(EpochError::FeeUnchanged);
        }
        if new_fee_bps <= delegate.fee_bps {
            delegate.fee_bps = new_fee_bps;
            delegate.pending = None;
            return Ok(());
        }
        if let Some(pending) = delegate.pending {
            if pending.fee_bps == new_fee_bps {
                return Err(EpochError::DuplicatePendingFee(new_fee_bps));
            }
        }
        delegate.pending = Some(PendingFee {
            fee_bps: new_fee_bps,
            activation_epoch: current_epoch + FEE_INCREASE_DELAY_EPOCHS,
        });
        Ok(())
    }

    /// Remove a delegate. The caller has already verified the delegate has
    /// no votes spent in the current epoch. Returns the registration fee
    /// to refund.
    pub fn unregister(
        &mut self,
        account: &AccountId,
        current_epoch_votes: u128,
    ) -> Result<u64, EpochError> {
        if !self.delegates.contains_key(account) {
            return Err(EpochError::DelegateNotRegistered(*account));
        }
        if current_epoch_votes > 0 {
            return Err(EpochError::DelegateHasVotes { votes: current_epoch_votes });
        }
        let delegate = self.delegates.remove(account).expect("checked above");
        Ok(delegate.registration_fee_paid)
    }
}

impl DelegateDirectory for DelegateRegistry {
    fn is_registered(&self, account: &AccountId) -> bool {
        self.delegates.contains_key(account)
    }
}
