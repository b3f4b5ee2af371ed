//! The execution outcome taxonomy shared by the BPF engine and the
//! transactional engine. `ExecutionResult` discriminants are wire-stable.

use crate::account::Account;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_derive::{Deserialize, Serialize};

#[repr(u8)]
#[derive(
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
)]
pub enum ExecutionResult {
    #[default]
    Success = 0,
    ComputeBudgetExceeded = 1,
    ProgramError = 2,
    AccountNotFound = 3,
    InsufficientFunds = 4,
    InvalidInstruction = 5,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub compute_units_consumed: u64,
    pub modified_accounts: Vec<Account>,
    pub error_details: String,
    pub logs: String,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.result == ExecutionResult::Success
    }

    pub fn success(compute_units_consumed: u64) -> Self {
        Self {
            result: ExecutionResult::Success,
            compute_units_consumed,
            ..Self::default()
        }
    }

    pub fn failure(result: ExecutionResult, error_details: impl Into<String>) -> Self {
        Self {
            result,
            error_details: error_details.into(),
            ..Self::default()
        }
    }
}
