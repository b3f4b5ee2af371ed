//! The `sealane_svm` crate holds the BPF execution substrate: static
//! verification, an interpreter with bounded everything, and the JIT
//! scaffold. The runtime crate layers program dispatch and transactional
//! semantics on top.

pub mod bytecode;
pub mod interpreter;
pub mod jit;
pub mod memory;
pub mod verifier;

use crate::interpreter::{Vm, DEFAULT_MAX_ITERATIONS};
use crate::jit::{JitBackend, JitError, NullJitBackend};
use crate::memory::{DEFAULT_HEAP_SIZE, DEFAULT_STACK_SIZE};
use log::debug;
use sealane_sdk::outcome::ExecutionResult;

pub use verifier::{BpfVerifier, VerifierError, VerifyPolicy};

/// A program as stored on chain: flat little-endian bytecode plus the
/// compute requirement it declares.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BpfProgram {
    pub code: Vec<u8>,
    pub declared_compute_units: u64,
}

impl BpfProgram {
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            code,
            declared_compute_units: 0,
        }
    }

    pub fn with_declared_compute_units(mut self, units: u64) -> Self {
        self.declared_compute_units = units;
        self
    }
}

/// Everything one execution needs: the guest input and the resource
/// limits. Register and memory state live inside the `Vm` for the duration
/// of the run.
#[derive(Debug, Clone)]
pub struct BpfExecutionContext {
    pub input: Vec<u8>,
    pub compute_budget: u64,
    pub stack_size: usize,
    pub heap_size: usize,
    pub max_iterations: u64,
}

impl Default for BpfExecutionContext {
    fn default() -> Self {
        Self {
            input: vec![],
            compute_budget: 200_000,
            stack_size: DEFAULT_STACK_SIZE,
            heap_size: DEFAULT_HEAP_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// The outcome of one BPF execution. Failures are data, never panics or
/// `Err`: the engine's callers translate `result` into their own taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpfExecutionResult {
    pub result: ExecutionResult,
    pub return_value: u64,
    pub compute_units_consumed: u64,
    pub error: Option<String>,
}

impl BpfExecutionResult {
    pub fn is_success(&self) -> bool {
        self.result == ExecutionResult::Success
    }
}

/// The execution facade: run verified programs, optionally through a JIT
/// backend with transparent interpreter fallback.
pub struct BpfRuntime {
    max_compute_units: u64,
    jit: Box<dyn JitBackend>,
}

impl Default for BpfRuntime {
    fn default() -> Self {
        Self {
            max_compute_units: 1_000_000,
            jit: Box::new(NullJitBackend),
        }
    }
}

impl BpfRuntime {
    pub fn new(max_compute_units: u64) -> Self {
        Self {
            max_compute_units,
            ..Self::default()
        }
    }

    pub fn with_jit_backend(mut self, jit: Box<dyn JitBackend>) -> Self {
        self.jit = jit;
        self
    }

    /// Execute `program`, preferring the JIT backend and falling back to
    /// the interpreter when it declines or fails.
    pub fn execute(
        &self,
        program: &BpfProgram,
        context: &BpfExecutionContext,
    ) -> BpfExecutionResult {
        if let Some(reject) = self.check_limits(program) {
            return reject;
        }
        match self.jit.compile(program) {
            Ok(compiled) => {
                // a real backend would jump into the sealed pages here; the
                // contract pins results to the interpreter's, so compiled
                // execution is routed through it until an emitter exists
                debug!(
                    "jit backend {} compiled {} bytes",
                    compiled.backend,
                    compiled.memory.len()
                );
                self.run_interpreter(program, context)
            }
            Err(JitError::Unsupported { .. }) => self.run_interpreter(program, context),
            Err(err) => {
                debug!("jit compilation failed, falling back: {err}");
                self.run_interpreter(program, context)
            }
        }
    }

    /// Execute strictly through the interpreter.
    pub fn execute_interpreter(
        &self,
        program: &BpfProgram,
        context: &BpfExecutionContext,
    ) -> BpfExecutionResult {
        if let Some(reject) = self.check_limits(program) {
            return reject;
        }
        self.run_interpreter(program, context)
    }

    fn check_limits(&self, program: &BpfProgram) -> Option<BpfExecutionResult> {
        if program.declared_compute_units > self.max_compute_units {
            return Some(BpfExecutionResult {
                result: ExecutionResult::ComputeBudgetExceeded,
                return_value: 0,
                compute_units_consumed: 0,
                error: Some(format!(
                    "program declares {} compute units, runtime caps at {}",
                    program.declared_compute_units, self.max_compute_units
                )),
            });
        }
        None
    }

    fn run_interpreter(
        &self,
        program: &BpfProgram,
        context: &BpfExecutionContext,
    ) -> BpfExecutionResult {
        let capped = BpfExecutionContext {
            compute_budget: context.compute_budget.min(self.max_compute_units),
            ..context.clone()
        };
        Vm::new(program, &capped).run()
    }
}
