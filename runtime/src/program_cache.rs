//! The shared BPF program cache. Entries are immutable after publication
//! (usage counters aside); eviction is least-recently-used under a bounded
//! total-byte budget. The cache never calls back into the engine —
//! invalidation requests arrive over a channel the engine drains.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::RwLock;
use sealane_sdk::pubkey::Pubkey;
use sealane_svm::jit::CompiledProgram;
use sealane_svm::BpfProgram;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_CACHE_BYTE_BUDGET: usize = 16 * 1024 * 1024;

pub struct CachedProgram {
    pub program_id: Pubkey,
    pub program: Arc<BpfProgram>,
    pub verified: bool,
    pub compiled: Option<Arc<CompiledProgram>>,
    last_used: AtomicU64,
    uses: AtomicU64,
}

impl CachedProgram {
    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    fn touch(&self, tick: u64) {
        self.last_used.store(tick, Ordering::Relaxed);
        self.uses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Invalidation requests travel one way, cache-ward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheInvalidation {
    Remove(Pubkey),
    Clear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ProgramCache {
    entries: RwLock<HashMap<Pubkey, Arc<CachedProgram>>>,
    total_bytes: AtomicU64,
    byte_budget: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidation_tx: Sender<CacheInvalidation>,
    invalidation_rx: Receiver<CacheInvalidation>,
}

impl ProgramCache {
    pub fn new(byte_budget: usize) -> Self {
        let (invalidation_tx, invalidation_rx) = unbounded();
        Self {
            entries: RwLock::new(HashMap::new()),
            total_bytes: AtomicU64::new(0),
            byte_budget,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidation_tx,
            invalidation_rx,
        }
    }

    /// A handle components hand to whoever needs to invalidate entries.
    pub fn invalidation_sender(&self) -> Sender<CacheInvalidation> {
        self.invalidation_tx.clone()
    }

    /// Apply queued invalidations. The engine calls this at dispatch time,
    /// so stale entries never outlive the request by more than one lookup.
    pub fn process_invalidations(&self) {
        while let Ok(request) = self.invalidation_rx.try_recv() {
            match request {
                CacheInvalidation::Remove(key) => {
                    if let Some(entry) = self.entries.write().remove(&key) {
                        self.total_bytes
                            .fetch_sub(entry.program.code.len() as u64, Ordering::Relaxed);
                        debug!("invalidated cached program {key}");
                    }
                }
                CacheInvalidation::Clear => {
                    self.entries.write().clear();
                    self.total_bytes.store(0, Ordering::Relaxed);
                    debug!("cleared program cache");
                }
            }
        }
    }

    /// Shared-lock lookup; bumps the entry's recency on hit.
    pub fn get(&self, program_id: &Pubkey) -> Option<Arc<CachedProgram>> {
        let entries = self.entries.read();
        match entries.get(program_id) {
            Some(entry) => {
                entry.touch(self.clock.fetch_add(1, Ordering::Relaxed) + 1);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Publish a verified (or tombstoned-unverified) program, evicting
    /// least-recently-used entries until the byte budget holds.
    pub fn insert(
        &self,
        program_id: Pubkey,
        program: Arc<BpfProgram>,
        verified: bool,
        compiled: Option<Arc<CompiledProgram>>,
    ) -> Arc<CachedProgram> {
        let mut entries = self.entries.write();
        let incoming_bytes = program.code.len();
        if let Some(old) = entries.remove(&program_id) {
            self.total_bytes
                .fetch_sub(old.program.code.len() as u64, Ordering::Relaxed);
        }
        while self.total_bytes.load(Ordering::Relaxed) as usize + incoming_bytes
            > self.byte_budget
            && !entries.is_empty()
        {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| *key)
                .expect("entries is nonempty");
            if let Some(evicted) = entries.remove(&lru_key) {
                self.total_bytes
                    .fetch_sub(evicted.program.code.len() as u64, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("evicted cached program {lru_key}");
            }
        }
        let entry = Arc::new(CachedProgram {
            program_id,
            program,
            verified,
            compiled,
            last_used: AtomicU64::new(self.clock.fetch_add(1, Ordering::Relaxed) + 1),
            uses: AtomicU64::new(0),
        });
        self.total_bytes
            .fetch_add(incoming_bytes as u64, Ordering::Relaxed);
        entries.insert(program_id, entry.clone());
        entry
    }

    pub fn contains(&self, program_id: &Pubkey) -> bool {
        self.entries.read().contains_key(program_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed) as usize
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTE_BUDGET)
    }
}
