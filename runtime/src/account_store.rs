//! The canonical account mapping: a committed layer served lock-free for
//! point reads, plus a pending layer that stages transactional updates
//! until `commit` folds them in or `rollback` discards them.

use crate::rent::{RentCollector, RentConfig};
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use sealane_sdk::account::Account;
use sealane_sdk::clock::{Epoch, Lamports};
use sealane_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountsError {
    #[error("account {0} already exists")]
    AccountAlreadyExists(Pubkey),
}

/// Fired after every successful commit with the accounts that changed.
pub type SnapshotHook = Box<dyn Fn(&[Account]) + Send + Sync>;

pub struct AccountStore {
    committed: DashMap<Pubkey, Account>,
    pending: Mutex<HashMap<Pubkey, Account>>,
    /// serializes whole stage-and-commit windows across executor lanes
    transaction_lock: Mutex<()>,
    snapshot_hook: RwLock<Option<SnapshotHook>>,
    rent_config: RentConfig,
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new(RentConfig::default())
    }
}

impl AccountStore {
    pub fn new(rent_config: RentConfig) -> Self {
        Self {
            committed: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            transaction_lock: Mutex::new(()),
            snapshot_hook: RwLock::new(None),
            rent_config,
        }
    }

    /// Point lookup; the pending layer shadows the committed one.
    pub fn get(&self, key: &Pubkey) -> Option<Account> {
        if let Some(account) = self.pending.lock().get(key) {
            return Some(account.clone());
        }
        self.committed.get(key).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, key: &Pubkey) -> bool {
        self.pending.lock().contains_key(key) || self.committed.contains_key(key)
    }

    pub fn balance(&self, key: &Pubkey) -> Lamports {
        self.get(key).map(|account| account.lamports).unwrap_or(0)
    }

    /// All accounts owned by `owner`, pending layer winning per key.
    pub fn accounts_owned_by(&self, owner: &Pubkey) -> Vec<Account> {
        self.scan(|account| account.owner == *owner)
    }

    pub fn all_accounts(&self) -> Vec<Account> {
        self.scan(|_| true)
    }

    fn scan(&self, keep: impl Fn(&Account) -> bool) -> Vec<Account> {
        let pending = self.pending.lock();
        let mut out: Vec<Account> = Vec::new();
        for entry in self.committed.iter() {
            if !pending.contains_key(entry.key()) && keep(entry.value()) {
                out.push(entry.value().clone());
            }
        }
        out.extend(pending.values().filter(|account| keep(account)).cloned());
        out
    }

    /// Stage a brand-new account; fails if the key exists in either layer.
    pub fn create(&self, account: Account) -> Result<(), AccountsError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&account.key) || self.committed.contains_key(&account.key) {
            return Err(AccountsError::AccountAlreadyExists(account.key));
        }
        pending.insert(account.key, account);
        Ok(())
    }

    /// Upsert into the pending layer.
    pub fn update(&self, account: Account) {
        self.pending.lock().insert(account.key, account);
    }

    /// Atomically fold the pending layer into committed state and fire the
    /// snapshot hook with the delta. Commits are serialized by the pending
    /// lock itself.
    pub fn commit(&self) {
        let staged: Vec<Account> = {
            let mut pending = self.pending.lock();
            let staged = pending.drain().map(|(_, account)| account).collect();
            staged
        };
        if staged.is_empty() {
            return;
        }
        for account in &staged {
            self.committed.insert(account.key, account.clone());
        }
        debug!("committed {} accounts", staged.len());
        if let Some(hook) = self.snapshot_hook.read().as_ref() {
            hook(&staged);
        }
    }

    /// Discard staged changes.
    pub fn rollback(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!("rolled back {} staged accounts", pending.len());
            pending.clear();
        }
    }

    /// Serialize a stage-and-commit window; executor lanes hold this while
    /// they push a transaction's writes and commit them.
    pub fn lock_for_transaction(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.transaction_lock.lock()
    }

    /// Deduct rent from every non-exempt committed account and drop the
    /// ones that ran dry. Returns the total collected.
    pub fn collect_rent(&self, epoch: Epoch) -> Lamports {
        let collector = RentCollector::new(epoch, self.rent_config);
        let mut collected = 0;
        let mut drained: Vec<Pubkey> = Vec::new();
        for mut entry in self.committed.iter_mut() {
            collected += collector.collect_from_account(entry.value_mut());
            if entry.value().lamports == 0 {
                drained.push(*entry.key());
            }
        }
        for key in &drained {
            self.committed.remove(key);
        }
        info!(
            "rent sweep for epoch {epoch}: collected {collected} lamports, removed {} accounts",
            drained.len()
        );
        collected
    }

    /// Install the post-commit snapshot hook; replaces any previous hook.
    pub fn set_snapshot_hook(&self, hook: SnapshotHook) {
        *self.snapshot_hook.write() = Some(hook);
    }

    /// Bulk-load committed state, e.g. from a storage collaborator before
    /// transactions begin.
    pub fn restore(&self, accounts: Vec<Account>) {
        for account in accounts {
            self.committed.insert(account.key, account);
        }
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
