//! The transactional execution engine: dispatches each instruction to a
//! builtin handler or the BPF runtime, enforces the compute budget and CPI
//! depth, and commits or rolls back the whole transaction atomically.

use crate::account_store::AccountStore;
use crate::program_cache::{ProgramCache, DEFAULT_CACHE_BYTE_BUDGET};
use crate::system_program::SystemProgram;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use sealane_sdk::account::Account;
use sealane_sdk::clock::Epoch;
use sealane_sdk::instruction::Instruction;
use sealane_sdk::outcome::{ExecutionOutcome, ExecutionResult};
use sealane_sdk::pubkey::Pubkey;
use sealane_sdk::transaction::Transaction;
use sealane_svm::{BpfExecutionContext, BpfProgram, BpfRuntime, BpfVerifier, VerifyPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum cross-program invocation depth, matching the dominant
/// mainline implementation.
pub const MAX_CPI_DEPTH: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// compute budget for a whole transaction
    pub max_compute_units: u64,
    /// optional wall-clock cap per transaction; hitting it behaves exactly
    /// like compute exhaustion
    pub transaction_wall_clock_cap: Option<Duration>,
    pub cache_byte_budget: usize,
    pub verify_policy: VerifyPolicy,
    pub bpf_stack_size: usize,
    pub bpf_heap_size: usize,
    pub bpf_max_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_compute_units: 200_000,
            transaction_wall_clock_cap: None,
            cache_byte_budget: DEFAULT_CACHE_BYTE_BUDGET,
            verify_policy: VerifyPolicy::default(),
            bpf_stack_size: sealane_svm::memory::DEFAULT_STACK_SIZE,
            bpf_heap_size: sealane_svm::memory::DEFAULT_HEAP_SIZE,
            bpf_max_iterations: sealane_svm::interpreter::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_compute_units == 0 {
            return Err(EngineError::InvalidConfig(
                "max_compute_units must be nonzero".to_string(),
            ));
        }
        if self.cache_byte_budget == 0 {
            return Err(EngineError::InvalidConfig(
                "cache_byte_budget must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A builtin handler: a pure function of `(instruction, context)`. All
/// state lives in the context's working set and the account store.
pub trait BuiltinProgram: Send + Sync {
    fn program_id(&self) -> Pubkey;
    fn execute(
        &self,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome;
}

/// Per-transaction mutable state, created at entry and destroyed at
/// commit/rollback.
pub struct ExecutionContext<'a> {
    engine: &'a ExecutionEngine,
    pub accounts: HashMap<Pubkey, Account>,
    pub max_compute_units: u64,
    pub consumed_compute_units: u64,
    pub current_cpi_depth: usize,
    pub transaction_succeeded: bool,
    pub error_message: String,
    pub epoch: Epoch,
    pub modified_accounts: HashSet<Pubkey>,
    logs: Vec<String>,
}

impl<'a> ExecutionContext<'a> {
    fn new(engine: &'a ExecutionEngine, accounts: HashMap<Pubkey, Account>) -> Self {
        Self {
            engine,
            accounts,
            max_compute_units: engine.config.max_compute_units,
            consumed_compute_units: 0,
            current_cpi_depth: 0,
            transaction_succeeded: true,
            error_message: String::new(),
            epoch: engine.epoch.load(Ordering::Acquire),
            modified_accounts: HashSet::new(),
            logs: Vec::new(),
        }
    }

    /// Charge `units` against the transaction budget. Returns false (and
    /// leaves the total untouched) when the budget cannot cover it.
    pub fn consume_compute(&mut self, units: u64) -> bool {
        match self.consumed_compute_units.checked_add(units) {
            Some(total) if total <= self.max_compute_units => {
                self.consumed_compute_units = total;
                true
            }
            _ => false,
        }
    }

    pub fn remaining_compute(&self) -> u64 {
        self.max_compute_units - self.consumed_compute_units
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message.into());
    }

    pub fn account(&self, key: &Pubkey) -> Option<&Account> {
        self.accounts.get(key)
    }

    /// Stage an account write into the working set.
    pub fn set_account(&mut self, account: Account) {
        self.modified_accounts.insert(account.key);
        self.accounts.insert(account.key, account);
    }

    pub fn cpi_depth(&self) -> usize {
        self.current_cpi_depth
    }

    pub fn can_invoke_cpi(&self) -> bool {
        self.current_cpi_depth < MAX_CPI_DEPTH
    }

    /// Re-enter the dispatcher from a handler. Depth is bounded and is
    /// decremented on the return path regardless of the callee's outcome.
    pub fn invoke(&mut self, instruction: &Instruction) -> ExecutionOutcome {
        if !self.can_invoke_cpi() {
            self.transaction_succeeded = false;
            self.error_message = "CPI depth exceeded".to_string();
            return ExecutionOutcome::failure(
                ExecutionResult::ProgramError,
                "CPI depth exceeded",
            );
        }
        self.current_cpi_depth += 1;
        let engine = self.engine;
        let outcome = engine.dispatch_instruction(instruction, self);
        self.current_cpi_depth -= 1;
        outcome
    }

    fn joined_logs(&self) -> String {
        self.logs.join("\n")
    }
}

pub struct ExecutionEngine {
    config: EngineConfig,
    builtins: RwLock<HashMap<Pubkey, Arc<dyn BuiltinProgram>>>,
    cache: ProgramCache,
    runtime: BpfRuntime,
    verifier: Mutex<BpfVerifier>,
    epoch: AtomicU64,
    total_instructions: AtomicU64,
    total_compute_units: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let engine = Self {
            cache: ProgramCache::new(config.cache_byte_budget),
            runtime: BpfRuntime::new(config.max_compute_units),
            verifier: Mutex::new(BpfVerifier::new(config.verify_policy.clone())),
            config,
            builtins: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            total_instructions: AtomicU64::new(0),
            total_compute_units: AtomicU64::new(0),
        };
        engine.register_builtin(Arc::new(SystemProgram));
        Ok(engine)
    }

    pub fn register_builtin(&self, program: Arc<dyn BuiltinProgram>) {
        let id = program.program_id();
        debug!("registered builtin program {id}");
        self.builtins.write().insert(id, program);
    }

    pub fn is_builtin(&self, program_id: &Pubkey) -> bool {
        self.builtins.read().contains_key(program_id)
    }

    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }

    pub fn set_epoch(&self, epoch: Epoch) {
        self.epoch.store(epoch, Ordering::Release);
    }

    pub fn total_instructions_executed(&self) -> u64 {
        self.total_instructions.load(Ordering::Relaxed)
    }

    pub fn total_compute_units_consumed(&self) -> u64 {
        self.total_compute_units.load(Ordering::Relaxed)
    }

    /// Execute `transaction` as one atomic unit against `store`. On
    /// success every staged write commits; on any failure nothing does.
    /// Logs survive either way.
    pub fn execute_transaction(
        &self,
        transaction: &Transaction,
        store: &AccountStore,
    ) -> ExecutionOutcome {
        let working_set = self.load_working_set(transaction, store);
        let mut context = ExecutionContext::new(self, working_set);
        let started_at = Instant::now();

        let mut failure: Option<ExecutionOutcome> = None;
        for (index, instruction) in transaction.instructions.iter().enumerate() {
            if let Some(cap) = self.config.transaction_wall_clock_cap {
                if started_at.elapsed() > cap {
                    failure = Some(ExecutionOutcome::failure(
                        ExecutionResult::ComputeBudgetExceeded,
                        format!("transaction exceeded wall-clock cap of {cap:?}"),
                    ));
                    break;
                }
            }
            if context.consumed_compute_units >= context.max_compute_units {
                failure = Some(ExecutionOutcome::failure(
                    ExecutionResult::ComputeBudgetExceeded,
                    "transaction exhausted its compute budget",
                ));
                break;
            }
            let outcome = self.dispatch_instruction(instruction, &mut context);
            if !outcome.is_success() {
                failure = Some(ExecutionOutcome {
                    error_details: format!(
                        "instruction {index} ({}): {}",
                        instruction.program_id, outcome.error_details
                    ),
                    ..outcome
                });
                break;
            }
        }

        self.total_compute_units
            .fetch_add(context.consumed_compute_units, Ordering::Relaxed);

        match failure {
            None => {
                let mut modified: Vec<Account> = context
                    .modified_accounts
                    .iter()
                    .filter_map(|key| context.accounts.get(key).cloned())
                    .collect();
                modified.sort_by(|a, b| a.key.cmp(&b.key));
                {
                    let _transaction_window = store.lock_for_transaction();
                    for account in &modified {
                        store.update(account.clone());
                    }
                    store.commit();
                }
                ExecutionOutcome {
                    result: ExecutionResult::Success,
                    compute_units_consumed: context.consumed_compute_units,
                    modified_accounts: modified,
                    error_details: String::new(),
                    logs: context.joined_logs(),
                }
            }
            Some(outcome) => {
                {
                    // take the transaction window so this rollback cannot
                    // clear another lane's in-flight staging
                    let _transaction_window = store.lock_for_transaction();
                    store.rollback();
                }
                warn!("transaction rolled back: {}", outcome.error_details);
                ExecutionOutcome {
                    compute_units_consumed: context.consumed_compute_units,
                    logs: context.joined_logs(),
                    modified_accounts: vec![],
                    ..outcome
                }
            }
        }
    }

    /// Resolve every key a transaction touches: the submitted working set
    /// first, then committed store state.
    fn load_working_set(
        &self,
        transaction: &Transaction,
        store: &AccountStore,
    ) -> HashMap<Pubkey, Account> {
        let mut working = transaction.accounts.clone();
        for instruction in &transaction.instructions {
            for key in instruction
                .accounts
                .iter()
                .chain(std::iter::once(&instruction.program_id))
            {
                if !working.contains_key(key) {
                    if let Some(account) = store.get(key) {
                        working.insert(*key, account);
                    }
                }
            }
        }
        working
    }

    /// Instruction dispatch: builtin table first, then the BPF path.
    fn dispatch_instruction(
        &self,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        self.cache.process_invalidations();
        self.total_instructions.fetch_add(1, Ordering::Relaxed);
        let builtin = self.builtins.read().get(&instruction.program_id).cloned();
        match builtin {
            Some(builtin) => builtin.execute(instruction, context),
            None => self.execute_bpf_program(instruction, context),
        }
    }

    fn execute_bpf_program(
        &self,
        instruction: &Instruction,
        context: &mut ExecutionContext<'_>,
    ) -> ExecutionOutcome {
        let program_id = instruction.program_id;
        let program_account = match context.accounts.get(&program_id) {
            Some(account) => account.clone(),
            None => {
                return ExecutionOutcome::failure(
                    ExecutionResult::AccountNotFound,
                    format!("program account {program_id} not found"),
                )
            }
        };
        if !program_account.executable {
            return ExecutionOutcome::failure(
                ExecutionResult::InvalidInstruction,
                format!("account {program_id} is not executable"),
            );
        }

        let entry = match self.cache.get(&program_id) {
            Some(entry) => entry,
            None => {
                let program = Arc::new(BpfProgram::new(program_account.data.clone()));
                let mut verifier = self.verifier.lock();
                if verifier.verify(&program).is_err() {
                    let reason = verifier
                        .last_error()
                        .unwrap_or("unknown verification failure")
                        .to_string();
                    // rejected programs are not cached as executable
                    return ExecutionOutcome::failure(
                        ExecutionResult::ProgramError,
                        format!("program {program_id} failed verification: {reason}"),
                    );
                }
                drop(verifier);
                self.cache.insert(program_id, program, true, None)
            }
        };
        if !entry.verified {
            return ExecutionOutcome::failure(
                ExecutionResult::ProgramError,
                format!("program {program_id} is cached unverified"),
            );
        }

        let budget = context.remaining_compute();
        let bpf_context = BpfExecutionContext {
            input: instruction.serialize(),
            compute_budget: budget,
            stack_size: self.config.bpf_stack_size,
            heap_size: self.config.bpf_heap_size,
            max_iterations: self.config.bpf_max_iterations,
        };
        let result = self.runtime.execute(&entry.program, &bpf_context);
        context.consumed_compute_units += result.compute_units_consumed.min(budget);
        context.log(format!(
            "program {program_id} consumed {} of {budget} compute units",
            result.compute_units_consumed
        ));

        match result.result {
            ExecutionResult::Success => {
                context.log(format!(
                    "program {program_id} returned {}",
                    result.return_value
                ));
                ExecutionOutcome::success(result.compute_units_consumed)
            }
            ExecutionResult::ComputeBudgetExceeded => ExecutionOutcome::failure(
                ExecutionResult::ComputeBudgetExceeded,
                result
                    .error
                    .unwrap_or_else(|| "compute budget exceeded".to_string()),
            ),
            _ => ExecutionOutcome::failure(
                ExecutionResult::ProgramError,
                result
                    .error
                    .unwrap_or_else(|| "program execution failed".to_string()),
            ),
        }
    }
}
