//! Transaction-level scenarios: atomic rollback with log preservation,
//! cross-program invocation depth limits, and store snapshot equality
//! around failed transactions.

use sealane_runtime::engine::{BuiltinProgram, ExecutionContext, MAX_CPI_DEPTH};
use sealane_runtime::{AccountStore, EngineConfig, ExecutionEngine};
use sealane_runtime::system_program;
use sealane_sdk::account::Account;
use sealane_sdk::instruction::Instruction;
use sealane_sdk::outcome::{ExecutionOutcome, ExecutionResult};
use sealane_sdk::pubkey::Pubkey;
use sealane_sdk::transaction::Transaction;
use std::sync::Arc;

/// A builtin that logs and then fails unconditionally.
struct FailProgram {
    id: Pubkey,
}

impl BuiltinProgram for FailProgram {
    fn program_id(&self) -> Pubkey {
        self.id
    }

    fn execute(
        &self,
        _instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        context.log("FailProgram: about to fail");
        ExecutionOutcome::failure(ExecutionResult::ProgramError, "deliberate failure")
    }
}

/// A builtin that re-invokes itself `data[0]` more times, debiting one
/// lamport from its first account at every level.
struct PingProgram {
    id: Pubkey,
}

impl BuiltinProgram for PingProgram {
    fn program_id(&self) -> Pubkey {
        self.id
    }

    fn execute(
        &self,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        // every handler observes a depth inside the allowed window
        assert!(context.cpi_depth() <= MAX_CPI_DEPTH);
        if !context.consume_compute(10) {
            return ExecutionOutcome::failure(
                ExecutionResult::ComputeBudgetExceeded,
                "ping ran out of compute",
            );
        }
        let n = instruction.data.first().copied().unwrap_or(0);
        context.log(format!("ping n={n} depth={}", context.cpi_depth()));

        if let Some(key) = instruction.accounts.first() {
            if let Some(account) = context.account(key).cloned() {
                let mut debited = account;
                debited.lamports = debited.lamports.saturating_sub(1);
                context.set_account(debited);
            }
        }

        if n == 0 {
            return ExecutionOutcome::success(10);
        }
        let inner = Instruction::new(self.id, instruction.accounts.clone(), vec![n - 1]);
        let outcome = context.invoke(&inner);
        if outcome.is_success() {
            ExecutionOutcome::success(10)
        } else {
            outcome
        }
    }
}

fn sorted_accounts(store: &AccountStore) -> Vec<Account> {
    let mut accounts = store.all_accounts();
    accounts.sort_by(|a, b| a.key.cmp(&b.key));
    accounts
}

fn setup() -> (ExecutionEngine, AccountStore, Pubkey, Pubkey) {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = ExecutionEngine::new(EngineConfig::default()).unwrap();
    let store = AccountStore::default();
    let a = Pubkey::new_rand();
    let b = Pubkey::new_rand();
    store.create(Account::new(a, 100, Pubkey::default())).unwrap();
    store.create(Account::new(b, 0, Pubkey::default())).unwrap();
    store.commit();
    (engine, store, a, b)
}

#[test]
fn test_failing_instruction_rolls_back_whole_transaction() {
    let (engine, store, a, b) = setup();
    let fail_id = Pubkey::new_rand();
    engine.register_builtin(Arc::new(FailProgram { id: fail_id }));

    let before = sorted_accounts(&store);
    let tx = Transaction::new(vec![
        system_program::transfer(a, b, 30),
        Instruction::new(fail_id, vec![], vec![]),
    ]);
    let outcome = engine.execute_transaction(&tx, &store);

    assert_eq!(outcome.result, ExecutionResult::ProgramError);
    // post-state equals pre-state, byte for byte
    assert_eq!(sorted_accounts(&store), before);
    assert_eq!(store.balance(&a), 100);
    assert_eq!(store.balance(&b), 0);
    // logs produced before the failure survive it
    assert!(outcome.logs.contains("Transfer: 30 lamports"));
    assert!(outcome.logs.contains("FailProgram: about to fail"));
    // and the diagnostic names the failing instruction
    assert!(outcome.error_details.contains("instruction 1"));
    assert!(outcome.modified_accounts.is_empty());
}

#[test]
fn test_committed_transaction_delta_matches_modified_set() {
    let (engine, store, a, b) = setup();
    let before = sorted_accounts(&store);
    let tx = Transaction::new(vec![system_program::transfer(a, b, 30)]);
    let outcome = engine.execute_transaction(&tx, &store);
    assert!(outcome.is_success());

    let after = sorted_accounts(&store);
    // the difference between snapshots is exactly the staged write set
    let changed: Vec<&Account> = after
        .iter()
        .filter(|&account| !before.contains(account))
        .collect();
    let mut reported: Vec<&Account> = outcome.modified_accounts.iter().collect();
    reported.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(changed, reported);
}

#[test]
fn test_cpi_depth_four_succeeds() {
    let (engine, store, a, _) = setup();
    let ping_id = Pubkey::new_rand();
    engine.register_builtin(Arc::new(PingProgram { id: ping_id }));

    let tx = Transaction::new(vec![Instruction::new(ping_id, vec![a], vec![4])]);
    let outcome = engine.execute_transaction(&tx, &store);
    assert!(outcome.is_success(), "{}", outcome.error_details);
    // five handler levels each debited one lamport
    assert_eq!(store.balance(&a), 95);
    assert!(outcome.logs.contains("ping n=4 depth=0"));
    assert!(outcome.logs.contains("ping n=0 depth=4"));
}

#[test]
fn test_cpi_depth_five_fails_without_state_change() {
    let (engine, store, a, _) = setup();
    let ping_id = Pubkey::new_rand();
    engine.register_builtin(Arc::new(PingProgram { id: ping_id }));

    let before = sorted_accounts(&store);
    let tx = Transaction::new(vec![Instruction::new(ping_id, vec![a], vec![5])]);
    let outcome = engine.execute_transaction(&tx, &store);

    assert_eq!(outcome.result, ExecutionResult::ProgramError);
    assert!(outcome.error_details.contains("CPI depth exceeded"));
    assert_eq!(sorted_accounts(&store), before);
    assert_eq!(store.balance(&a), 100);
}

#[test]
fn test_multi_instruction_transaction_is_ordered() {
    let (engine, store, a, b) = setup();
    let tx = Transaction::new(vec![
        system_program::transfer(a, b, 60),
        system_program::transfer(b, a, 10),
    ]);
    let outcome = engine.execute_transaction(&tx, &store);
    assert!(outcome.is_success(), "{}", outcome.error_details);
    assert_eq!(store.balance(&a), 50);
    assert_eq!(store.balance(&b), 50);

    // the second instruction saw the first one's writes: logs in order
    let transfer_logs: Vec<&str> = outcome
        .logs
        .lines()
        .filter(|line| line.starts_with("Transfer"))
        .collect();
    assert_eq!(transfer_logs.len(), 2);
    assert!(transfer_logs[0].contains("60 lamports"));
    assert!(transfer_logs[1].contains("10 lamports"));
}

#[test]
fn test_budget_exhaustion_aborts_before_next_instruction() {
    let config = EngineConfig {
        max_compute_units: 200,
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(config).unwrap();
    let store = AccountStore::default();
    let a = Pubkey::new_rand();
    let b = Pubkey::new_rand();
    store.create(Account::new(a, 100, Pubkey::default())).unwrap();
    store.create(Account::new(b, 0, Pubkey::default())).unwrap();
    store.commit();

    // each transfer costs 150: the first fits, the second cannot be charged
    let tx = Transaction::new(vec![
        system_program::transfer(a, b, 1),
        system_program::transfer(a, b, 1),
    ]);
    let outcome = engine.execute_transaction(&tx, &store);
    assert_eq!(outcome.result, ExecutionResult::ComputeBudgetExceeded);
    assert!(outcome.compute_units_consumed <= 200);
    // atomicity holds for budget failures too
    assert_eq!(store.balance(&a), 100);
    assert_eq!(store.balance(&b), 0);
}
