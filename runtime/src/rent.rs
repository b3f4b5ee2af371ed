//! Calculate and collect rent from accounts at epoch boundaries.

use sealane_sdk::account::Account;
use sealane_sdk::clock::{Epoch, Lamports};
use serde_derive::{Deserialize, Serialize};

/// Rent numerics are configuration, not protocol constants.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentConfig {
    /// charged per epoch to accounts below the exemption threshold
    pub lamports_per_epoch: Lamports,
    /// balances at or above this are rent-exempt
    pub exempt_threshold: Lamports,
}

impl Default for RentConfig {
    fn default() -> Self {
        Self {
            lamports_per_epoch: 100,
            exempt_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RentCollector {
    pub epoch: Epoch,
    pub config: RentConfig,
}

impl RentCollector {
    pub fn new(epoch: Epoch, config: RentConfig) -> Self {
        Self { epoch, config }
    }

    pub fn clone_with_epoch(&self, epoch: Epoch) -> Self {
        Self { epoch, ..*self }
    }

    /// Charge the account's rent for every epoch elapsed since it last
    /// paid, and return the amount collected. An account that cannot pay
    /// is drained to zero; the store removes it afterwards.
    #[must_use = "add to the store's collected-rent total"]
    pub fn collect_from_account(&self, account: &mut Account) -> Lamports {
        if account.executable
            || account.rent_epoch > self.epoch
            || account.lamports >= self.config.exempt_threshold
        {
            return 0;
        }
        let epochs_elapsed = self.epoch.saturating_sub(account.rent_epoch) + 1;
        let due = self.config.lamports_per_epoch.saturating_mul(epochs_elapsed);
        let collected = due.min(account.lamports);
        account.lamports -= collected;
        account.rent_epoch = self.epoch + 1;
        collected
    }
}
