//! Process-wide access to an owned generator handle.
//!
//! The generator itself is an owned `Arc<ProofOfHistory>` threaded through
//! the components that need it. A few call sites (builtin handlers, test
//! harnesses) cannot be threaded a handle; they go through this registry.
//! Installation is explicit, so there is no lazy-initialization race.

use crate::poh::ProofOfHistory;
use parking_lot::Mutex;
use std::sync::Arc;

static REGISTRY: Mutex<Option<Arc<ProofOfHistory>>> = Mutex::new(None);

/// Register `poh` as the process-wide generator. Returns false (and leaves
/// the existing registration in place) if one is already installed.
pub fn install(poh: Arc<ProofOfHistory>) -> bool {
    let mut registry = REGISTRY.lock();
    if registry.is_some() {
        return false;
    }
    *registry = Some(poh);
    true
}

/// Clear the registration, returning the handle so the owner can stop it.
pub fn uninstall() -> Option<Arc<ProofOfHistory>> {
    REGISTRY.lock().take()
}

pub fn is_installed() -> bool {
    REGISTRY.lock().is_some()
}

/// Run `f` against the installed generator, if any.
pub fn with<R>(f: impl FnOnce(&ProofOfHistory) -> R) -> Option<R> {
    let handle = REGISTRY.lock().clone();
    handle.map(|poh| f(&poh))
}
