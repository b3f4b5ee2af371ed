//! The `sealane_poh` crate implements the validator's verifiable clock: a
//! SHA-256 hash chain produced at a fixed cadence, partitioned into slots,
//! with support for mixing external fingerprints into the chain.

pub mod config;
pub mod entry;
pub mod global;
pub mod mix_queue;
pub mod poh;
pub mod verify;

pub use config::PohConfig;
pub use entry::PohEntry;
pub use poh::{PohError, PohStats, ProofOfHistory};
pub use verify::PohVerifier;
