use crate::account::Account;
use crate::instruction::Instruction;
use crate::pubkey::Pubkey;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// The atomic commit unit: an ordered instruction list plus the account
/// working set the instructions run against.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Transaction {
    pub instructions: Vec<Instruction>,
    pub accounts: HashMap<Pubkey, Account>,
}

impl Transaction {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            accounts: HashMap::new(),
        }
    }

    pub fn with_account(mut self, account: Account) -> Self {
        self.accounts.insert(account.key, account);
        self
    }

    /// A stable fingerprint of the transaction, suitable for mixing into
    /// the PoH stream.
    pub fn fingerprint(&self) -> crate::hash::Hash {
        let mut hasher = crate::hash::Hasher::default();
        for ix in &self.instructions {
            hasher.hash(&ix.serialize());
        }
        hasher.result()
    }
}
