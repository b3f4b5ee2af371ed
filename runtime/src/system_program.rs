//! The system program: account creation, lamport transfers, and owner
//! assignment. Payloads are bincode-encoded `SystemInstruction` values.

use crate::engine::{BuiltinProgram, ExecutionContext};
use sealane_sdk::account::Account;
use sealane_sdk::clock::Lamports;
use sealane_sdk::instruction::Instruction;
use sealane_sdk::outcome::{ExecutionOutcome, ExecutionResult};
use sealane_sdk::pubkey::Pubkey;
use serde_derive::{Deserialize, Serialize};

pub fn id() -> Pubkey {
    Pubkey::new_from_array([0u8; 32])
}

pub fn check_id(program_id: &Pubkey) -> bool {
    *program_id == id()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum SystemInstruction {
    /// Create a new account funded by accounts[0] at accounts[1].
    CreateAccount {
        lamports: Lamports,
        space: u64,
        owner: Pubkey,
    },
    /// Move lamports from accounts[0] to accounts[1].
    Transfer { lamports: Lamports },
    /// Assign accounts[0] to a new owner.
    Assign { owner: Pubkey },
}

const TRANSFER_COMPUTE_COST: u64 = 150;
const CREATE_ACCOUNT_COMPUTE_COST: u64 = 500;
const ASSIGN_COMPUTE_COST: u64 = 100;

/// Convenience constructors mirroring the payload variants.
pub fn transfer(from: Pubkey, to: Pubkey, lamports: Lamports) -> Instruction {
    Instruction::new_with_bincode(
        id(),
        &SystemInstruction::Transfer { lamports },
        vec![from, to],
    )
}

pub fn create_account(
    funder: Pubkey,
    new_account: Pubkey,
    lamports: Lamports,
    space: u64,
    owner: Pubkey,
) -> Instruction {
    Instruction::new_with_bincode(
        id(),
        &SystemInstruction::CreateAccount {
            lamports,
            space,
            owner,
        },
        vec![funder, new_account],
    )
}

pub fn assign(account: Pubkey, owner: Pubkey) -> Instruction {
    Instruction::new_with_bincode(id(), &SystemInstruction::Assign { owner }, vec![account])
}

pub struct SystemProgram;

impl SystemProgram {
    fn process(
        payload: SystemInstruction,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> Result<(), ExecutionOutcome> {
        match payload {
            SystemInstruction::Transfer { lamports } => {
                Self::charge(context, TRANSFER_COMPUTE_COST)?;
                Self::process_transfer(instruction, context, lamports)
            }
            SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            } => {
                Self::charge(context, CREATE_ACCOUNT_COMPUTE_COST)?;
                Self::process_create_account(instruction, context, lamports, space, owner)
            }
            SystemInstruction::Assign { owner } => {
                Self::charge(context, ASSIGN_COMPUTE_COST)?;
                Self::process_assign(instruction, context, owner)
            }
        }
    }

    fn charge(
        context: &mut ExecutionContext<'_>,
        units: u64,
    ) -> Result<(), ExecutionOutcome> {
        if context.consume_compute(units) {
            Ok(())
        } else {
            Err(ExecutionOutcome::failure(
                ExecutionResult::ComputeBudgetExceeded,
                "system instruction exceeded the compute budget",
            ))
        }
    }

    fn process_transfer(
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
        lamports: Lamports,
    ) -> Result<(), ExecutionOutcome> {
        let [from_key, to_key] = match instruction.accounts[..] {
            [from, to] => [from, to],
            _ => {
                return Err(ExecutionOutcome::failure(
                    ExecutionResult::InvalidInstruction,
                    "transfer takes exactly two accounts",
                ))
            }
        };
        let mut from = context.account(&from_key).cloned().ok_or_else(|| {
            ExecutionOutcome::failure(
                ExecutionResult::AccountNotFound,
                format!("transfer source {from_key} not found"),
            )
        })?;
        let mut to = context.account(&to_key).cloned().ok_or_else(|| {
            ExecutionOutcome::failure(
                ExecutionResult::AccountNotFound,
                format!("transfer destination {to_key} not found"),
            )
        })?;
        if from.lamports < lamports {
            return Err(ExecutionOutcome::failure(
                ExecutionResult::InsufficientFunds,
                format!(
                    "transfer of {lamports} lamports from {from_key} holding {}",
                    from.lamports
                ),
            ));
        }
        if from_key == to_key {
            context.log(format!("Transfer: {lamports} lamports {from_key} to itself"));
            return Ok(());
        }
        from.lamports -= lamports;
        to.lamports += lamports;
        context.set_account(from);
        context.set_account(to);
        context.log(format!(
            "Transfer: {lamports} lamports from {from_key} to {to_key}"
        ));
        Ok(())
    }

    fn process_create_account(
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
        lamports: Lamports,
        space: u64,
        owner: Pubkey,
    ) -> Result<(), ExecutionOutcome> {
        let [funder_key, new_key] = match instruction.accounts[..] {
            [funder, new_key] => [funder, new_key],
            _ => {
                return Err(ExecutionOutcome::failure(
                    ExecutionResult::InvalidInstruction,
                    "create_account takes exactly two accounts",
                ))
            }
        };
        if let Some(existing) = context.account(&new_key) {
            if existing.lamports > 0 || !existing.data.is_empty() {
                return Err(ExecutionOutcome::failure(
                    ExecutionResult::InvalidInstruction,
                    format!("account {new_key} already in use"),
                ));
            }
        }
        let mut funder = context.account(&funder_key).cloned().ok_or_else(|| {
            ExecutionOutcome::failure(
                ExecutionResult::AccountNotFound,
                format!("funder {funder_key} not found"),
            )
        })?;
        if funder.lamports < lamports {
            return Err(ExecutionOutcome::failure(
                ExecutionResult::InsufficientFunds,
                format!(
                    "create_account needs {lamports} lamports, funder holds {}",
                    funder.lamports
                ),
            ));
        }
        funder.lamports -= lamports;
        let new_account = Account {
            key: new_key,
            owner,
            lamports,
            data: vec![0; space as usize],
            executable: false,
            rent_epoch: context.epoch,
        };
        context.set_account(funder);
        context.set_account(new_account);
        context.log(format!(
            "CreateAccount: {new_key} with {lamports} lamports, {space} bytes, owner {owner}"
        ));
        Ok(())
    }

    fn process_assign(
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
        owner: Pubkey,
    ) -> Result<(), ExecutionOutcome> {
        let account_key = match instruction.accounts[..] {
            [key] => key,
            _ => {
                return Err(ExecutionOutcome::failure(
                    ExecutionResult::InvalidInstruction,
                    "assign takes exactly one account",
                ))
            }
        };
        let mut account = context.account(&account_key).cloned().ok_or_else(|| {
            ExecutionOutcome::failure(
                ExecutionResult::AccountNotFound,
                format!("assign target {account_key} not found"),
            )
        })?;
        account.owner = owner;
        context.set_account(account);
        context.log(format!("Assign: {account_key} to owner {owner}"));
        Ok(())
    }
}

impl BuiltinProgram for SystemProgram {
    fn program_id(&self) -> Pubkey {
        id()
    }

    fn execute(
        &self,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        let payload: SystemInstruction = match bincode::deserialize(&instruction.data) {
            Ok(payload) => payload,
            Err(err) => {
                return ExecutionOutcome::failure(
                    ExecutionResult::InvalidInstruction,
                    format!("malformed system instruction: {err}"),
                )
            }
        };
        let before = context.consumed_compute_units;
        match Self::process(payload, instruction, context) {
            Ok(()) => ExecutionOutcome::success(context.consumed_compute_units - before),
            Err(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_store::AccountStore;
    use crate::engine::{EngineConfig, ExecutionEngine};
    use sealane_sdk::transaction::Transaction;

    fn setup() -> (ExecutionEngine, AccountStore, Pubkey, Pubkey) {
        let engine = ExecutionEngine::new(EngineConfig::default()).unwrap();
        let store = AccountStore::default();
        let alice = Pubkey::new_rand();
        let bob = Pubkey::new_rand();
        store
            .create(Account::new(alice, 1_000, Pubkey::default()))
            .unwrap();
        store.create(Account::new(bob, 0, Pubkey::default())).unwrap();
        store.commit();
        (engine, store, alice, bob)
    }

    #[test]
    fn test_transfer_moves_lamports() {
        let (engine, store, alice, bob) = setup();
        let tx = Transaction::new(vec![transfer(alice, bob, 300)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert!(outcome.is_success(), "{}", outcome.error_details);
        assert_eq!(store.balance(&alice), 700);
        assert_eq!(store.balance(&bob), 300);
        assert!(outcome.logs.contains("Transfer: 300 lamports"));
        assert_eq!(outcome.modified_accounts.len(), 2);
    }

    #[test]
    fn test_transfer_insufficient_funds() {
        let (engine, store, alice, bob) = setup();
        let tx = Transaction::new(vec![transfer(alice, bob, 5_000)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert_eq!(outcome.result, ExecutionResult::InsufficientFunds);
        assert_eq!(store.balance(&alice), 1_000);
        assert_eq!(store.balance(&bob), 0);
    }

    #[test]
    fn test_transfer_to_missing_account() {
        let (engine, store, alice, _) = setup();
        let ghost = Pubkey::new_rand();
        let tx = Transaction::new(vec![transfer(alice, ghost, 10)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert_eq!(outcome.result, ExecutionResult::AccountNotFound);
    }

    #[test]
    fn test_create_account_and_duplicate() {
        let (engine, store, alice, _) = setup();
        let fresh = Pubkey::new_rand();
        let owner = Pubkey::new_rand();
        let tx = Transaction::new(vec![create_account(alice, fresh, 200, 64, owner)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert!(outcome.is_success(), "{}", outcome.error_details);
        let created = store.get(&fresh).unwrap();
        assert_eq!(created.lamports, 200);
        assert_eq!(created.data.len(), 64);
        assert_eq!(created.owner, owner);
        assert_eq!(store.balance(&alice), 800);

        // creating the same account again is refused and rolls back
        let tx = Transaction::new(vec![create_account(alice, fresh, 100, 8, owner)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert_eq!(outcome.result, ExecutionResult::InvalidInstruction);
        assert!(outcome.error_details.contains("already in use"));
        assert_eq!(store.balance(&alice), 800);
    }

    #[test]
    fn test_assign_changes_owner() {
        let (engine, store, alice, _) = setup();
        let new_owner = Pubkey::new_rand();
        let tx = Transaction::new(vec![assign(alice, new_owner)]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert!(outcome.is_success());
        assert_eq!(store.get(&alice).unwrap().owner, new_owner);
    }

    #[test]
    fn test_malformed_payload_is_invalid_instruction() {
        let (engine, store, alice, bob) = setup();
        let tx = Transaction::new(vec![Instruction::new(
            id(),
            vec![alice, bob],
            vec![0xFF; 3],
        )]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert_eq!(outcome.result, ExecutionResult::InvalidInstruction);
        assert!(outcome.error_details.contains("malformed"));
    }

    #[test]
    fn test_wrong_account_count() {
        let (engine, store, alice, _) = setup();
        let tx = Transaction::new(vec![Instruction::new_with_bincode(
            id(),
            &SystemInstruction::Transfer { lamports: 1 },
            vec![alice],
        )]);
        let outcome = engine.execute_transaction(&tx, &store);
        assert_eq!(outcome.result, ExecutionResult::InvalidInstruction);
    }
}
