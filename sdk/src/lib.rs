//! Core types shared by every Sealane crate: hashes, public keys, accounts,
//! instructions, transactions, and the execution outcome taxonomy.

pub mod account;
pub mod clock;
pub mod hash;
pub mod instruction;
pub mod outcome;
pub mod pubkey;
pub mod transaction;

use thiserror::Error;

/// Errors surfaced by the sdk's wire codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    #[error("input truncated: needed {needed} bytes, had {had}")]
    Truncated { needed: usize, had: usize },
    #[error("invalid field encoding: {0}")]
    InvalidEncoding(String),
}
