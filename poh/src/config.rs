use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// How many completed slots of entries are retained for `get_slot_entries`.
pub const MAX_SLOT_HISTORY: u64 = 1000;

/// Configuration for the Proof of History generator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PohConfig {
    /// intended wall-clock period between successive ticks
    pub target_tick_duration: Duration,
    /// slot boundary period
    pub ticks_per_slot: u64,
    /// cap on retained in-memory history
    pub max_entries_buffer: usize,
    /// worker lanes reserved for staging pending mixes (advisory)
    pub hashing_parallelism: usize,
    /// preferred batch width when the mix queue has work pending
    pub batch_size: usize,
    /// use the bounded lock-free queue rather than a mutex-guarded deque
    pub enable_lock_free_mix_queue: bool,
    /// record lock attempt/contention counters
    pub enable_contention_tracking: bool,
}

impl Default for PohConfig {
    fn default() -> Self {
        Self {
            target_tick_duration: Duration::from_micros(200),
            ticks_per_slot: 64,
            max_entries_buffer: 2000,
            hashing_parallelism: 4,
            batch_size: 8,
            enable_lock_free_mix_queue: false,
            enable_contention_tracking: false,
        }
    }
}

impl PohConfig {
    /// Reject configurations the generator cannot run with. Called at
    /// construction; a bad config refuses to start rather than misbehaving.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_tick_duration.is_zero() {
            return Err("target_tick_duration must be nonzero".to_string());
        }
        if self.ticks_per_slot == 0 {
            return Err("ticks_per_slot must be nonzero".to_string());
        }
        if self.max_entries_buffer == 0 {
            return Err("max_entries_buffer must be nonzero".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be nonzero".to_string());
        }
        Ok(())
    }
}
