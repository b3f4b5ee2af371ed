//! The `sealane_runtime` crate ties the execution substrate together: the
//! transactional engine dispatches instructions to builtin handlers or the
//! BPF runtime, stages account mutations, and commits or rolls back
//! atomically against the two-layer account store.

pub mod account_store;
pub mod engine;
pub mod executor_pool;
pub mod program_cache;
pub mod rent;
pub mod system_program;

pub use account_store::{AccountStore, AccountsError};
pub use engine::{
    BuiltinProgram, EngineConfig, EngineError, ExecutionContext, ExecutionEngine, MAX_CPI_DEPTH,
};
pub use executor_pool::ExecutorPool;
pub use program_cache::{CacheInvalidation, ProgramCache};
pub use rent::{RentCollector, RentConfig};
