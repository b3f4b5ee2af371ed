//! The Proof of History generator: a producer lane that extends the hash
//! chain on a fixed cadence, advisory staging lanes that keep the mix queue
//! drained, and read snapshots served from atomics and short-held locks.

use crate::config::{PohConfig, MAX_SLOT_HISTORY};
use crate::entry::PohEntry;
use crate::mix_queue::{ChannelMixQueue, MixQueue, MutexMixQueue};
use crate::verify::PohVerifier;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use sealane_sdk::clock::Slot;
use sealane_sdk::hash::Hash;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Builder, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Capacity of the bounded lock-free mix queue; overflow drops.
pub const LOCK_FREE_MIX_QUEUE_CAPACITY: usize = 4096;

pub type TickCallback = Box<dyn Fn(&PohEntry) + Send>;
pub type SlotCallback = Box<dyn Fn(Slot, &[PohEntry]) + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PohError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("generator is already running")]
    AlreadyRunning,
}

/// Performance and status counters for the generator. Drops and contention
/// are observable here, never through return values on the hot path.
#[derive(Debug, Clone, Default)]
pub struct PohStats {
    pub total_ticks: u64,
    pub total_hashes: u64,
    pub last_tick_duration: Duration,
    pub min_tick_duration: Duration,
    pub max_tick_duration: Duration,
    pub avg_tick_duration: Duration,
    pub ticks_per_second: f64,
    pub pending_mixes: usize,
    pub batches_processed: u64,
    pub dropped_mixes: u64,
    pub lock_attempts: u64,
    pub lock_contentions: u64,
}

#[derive(Default)]
struct StatsInner {
    total_ticks: u64,
    total_hashes: u64,
    last_tick_duration: Duration,
    min_tick_duration: Option<Duration>,
    max_tick_duration: Duration,
    batches_processed: u64,
    started_at: Option<Instant>,
}

struct CurrentState {
    entry: PohEntry,
}

#[derive(Default)]
struct History {
    entries: VecDeque<PohEntry>,
    slot_entries: BTreeMap<Slot, Vec<PohEntry>>,
}

#[derive(Default)]
struct Callbacks {
    tick: Option<TickCallback>,
    slot: Option<SlotCallback>,
}

struct StagingArea {
    buf: Mutex<Vec<Hash>>,
    work: Condvar,
}

pub struct ProofOfHistory {
    config: PohConfig,
    queue: Box<dyn MixQueue>,
    running: AtomicBool,
    stopping: AtomicBool,
    sequence: AtomicU64,
    slot: AtomicU64,
    state: Mutex<CurrentState>,
    history: Mutex<History>,
    callbacks: Mutex<Callbacks>,
    staging: StagingArea,
    stats: Mutex<StatsInner>,
    lock_attempts: AtomicU64,
    lock_contentions: AtomicU64,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ProofOfHistory {
    pub fn new(config: PohConfig) -> Result<Arc<Self>, PohError> {
        config.validate().map_err(PohError::InvalidConfig)?;
        let queue: Box<dyn MixQueue> = if config.enable_lock_free_mix_queue {
            Box::new(ChannelMixQueue::new(LOCK_FREE_MIX_QUEUE_CAPACITY))
        } else {
            Box::new(MutexMixQueue::new())
        };
        Ok(Arc::new(Self {
            config,
            queue,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            slot: AtomicU64::new(0),
            state: Mutex::new(CurrentState {
                entry: PohEntry::default(),
            }),
            history: Mutex::new(History::default()),
            callbacks: Mutex::new(Callbacks::default()),
            staging: StagingArea {
                buf: Mutex::new(Vec::new()),
                work: Condvar::new(),
            },
            stats: Mutex::new(StatsInner::default()),
            lock_attempts: AtomicU64::new(0),
            lock_contentions: AtomicU64::new(0),
            threads: Mutex::new(Vec::new()),
        }))
    }

    /// Start the producer and staging lanes from `initial_hash`. Fails if
    /// the generator is already running; sequence, slot, and history reset.
    pub fn start(self: &Arc<Self>, initial_hash: Hash) -> Result<(), PohError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PohError::AlreadyRunning);
        }
        self.stopping.store(false, Ordering::Release);
        self.sequence.store(0, Ordering::Release);
        self.slot.store(0, Ordering::Release);
        {
            let mut state = self.state.lock();
            state.entry = PohEntry {
                hash: initial_hash,
                sequence: 0,
                timestamp_ns: Self::now_ns(),
                mixed: vec![],
            };
        }
        {
            let mut history = self.history.lock();
            history.entries.clear();
            history.slot_entries.clear();
        }
        {
            let mut stats = self.stats.lock();
            *stats = StatsInner {
                started_at: Some(Instant::now()),
                ..StatsInner::default()
            };
        }

        let mut threads = self.threads.lock();
        let poh = self.clone();
        threads.push(
            Builder::new()
                .name("sealane-poh-tick-producer".to_string())
                .spawn(move || poh.tick_producer())
                .expect("spawn tick producer"),
        );
        for lane in 0..self.config.hashing_parallelism {
            let poh = self.clone();
            threads.push(
                Builder::new()
                    .name(format!("sealane-poh-mix-stage-{lane}"))
                    .spawn(move || poh.staging_lane())
                    .expect("spawn staging lane"),
            );
        }
        info!(
            "poh started: tick {:?}, {} ticks/slot, {} staging lanes",
            self.config.target_tick_duration,
            self.config.ticks_per_slot,
            self.config.hashing_parallelism,
        );
        Ok(())
    }

    /// Cooperatively halt all lanes and wait for them to exit. Safe to call
    /// on an instance that is not running.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.staging.work.notify_all();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("poh lane panicked during shutdown");
            }
        }
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue `data` for inclusion in an upcoming tick. Returns the
    /// sequence number by which the data is guaranteed to appear. Under
    /// lock-free overflow the mix is dropped and counted in stats; this is
    /// a non-blocking fire-and-forget contract.
    pub fn mix_data(&self, data: Hash) -> u64 {
        self.queue.push(data);
        self.staging.work.notify_one();
        let pending = (self.queue.len() + self.staging.buf.lock().len()) as u64;
        self.sequence.load(Ordering::Acquire) + pending.max(1)
    }

    pub fn get_current_entry(&self) -> PohEntry {
        self.state.lock().entry.clone()
    }

    pub fn get_current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn get_current_slot(&self) -> Slot {
        self.slot.load(Ordering::Acquire)
    }

    /// The retained entries of `slot`, or empty if the slot is outside the
    /// retention window.
    pub fn get_slot_entries(&self, slot: Slot) -> Vec<PohEntry> {
        self.history
            .lock()
            .slot_entries
            .get(&slot)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_tick_callback(&self, callback: TickCallback) {
        self.callbacks.lock().tick = Some(callback);
    }

    pub fn set_slot_callback(&self, callback: SlotCallback) {
        self.callbacks.lock().slot = Some(callback);
    }

    pub fn verify_sequence(entries: &[PohEntry]) -> bool {
        PohVerifier::verify_sequence(entries)
    }

    pub fn get_stats(&self) -> PohStats {
        let inner = self.stats.lock();
        let elapsed = inner
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
            .as_secs_f64();
        PohStats {
            total_ticks: inner.total_ticks,
            total_hashes: inner.total_hashes,
            last_tick_duration: inner.last_tick_duration,
            min_tick_duration: inner.min_tick_duration.unwrap_or_default(),
            max_tick_duration: inner.max_tick_duration,
            avg_tick_duration: if inner.total_ticks > 0 {
                Duration::from_secs_f64(elapsed / inner.total_ticks as f64)
            } else {
                Duration::ZERO
            },
            ticks_per_second: if elapsed > 0.0 {
                inner.total_ticks as f64 / elapsed
            } else {
                0.0
            },
            pending_mixes: self.queue.len() + self.staging.buf.lock().len(),
            batches_processed: inner.batches_processed,
            dropped_mixes: self.queue.dropped(),
            lock_attempts: self.lock_attempts.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
        }
    }

    fn now_ns() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// Lock `mutex`, optionally counting attempts and contentions.
    fn lock_tracked<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        if self.config.enable_contention_tracking {
            self.lock_attempts.fetch_add(1, Ordering::Relaxed);
            match mutex.try_lock() {
                Some(guard) => return guard,
                None => {
                    self.lock_contentions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        mutex.lock()
    }

    /// The producer lane. Absolute deadlines: a late producer issues ticks
    /// back-to-back without sleeping until the schedule is caught up, which
    /// preserves the chain while timestamps stay strictly increasing.
    fn tick_producer(self: Arc<Self>) {
        let tick = self.config.target_tick_duration;
        let mut next_deadline = Instant::now() + tick;
        while !self.stopping.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_deadline {
                thread::sleep(next_deadline - now);
            }
            self.record_tick();
            next_deadline += tick;
        }
        debug!("poh tick producer exiting");
    }

    /// A staging lane: serialized draining of the mix queue into the
    /// producer's batch buffer. Serialization through the staging lock is
    /// what keeps per-producer FIFO order across lanes.
    fn staging_lane(self: Arc<Self>) {
        let park = self.config.target_tick_duration.max(Duration::from_millis(1));
        while !self.stopping.load(Ordering::Acquire) {
            let mut staged = self.staging.buf.lock();
            let moved = self.queue.drain_into(&mut staged, self.config.batch_size);
            if moved == 0 {
                let _ = self.staging.work.wait_for(&mut staged, park);
            }
        }
        debug!("poh staging lane exiting");
    }

    fn record_tick(&self) {
        let tick_start = Instant::now();

        let mut mixed = Vec::new();
        {
            let mut staged = self.lock_tracked(&self.staging.buf);
            mixed.append(&mut staged);
        }
        let mut batches = 0u64;
        while self.queue.drain_into(&mut mixed, self.config.batch_size) > 0 {
            batches += 1;
        }

        let entry = {
            let mut state = self.lock_tracked(&self.state);
            let sequence = state.entry.sequence + 1;
            // per-tick wall clock; clamp forward so timestamps are strictly
            // increasing even when ticks are issued back-to-back
            let timestamp_ns = Self::now_ns().max(state.entry.timestamp_ns + 1);
            state.entry = PohEntry {
                hash: PohEntry::expected_hash(&state.entry.hash, &mixed),
                sequence,
                timestamp_ns,
                mixed,
            };
            self.sequence.store(sequence, Ordering::Release);
            state.entry.clone()
        };

        {
            let mut history = self.lock_tracked(&self.history);
            history.entries.push_back(entry.clone());
            while history.entries.len() > self.config.max_entries_buffer {
                history.entries.pop_front();
            }
            let current_slot = self.slot.load(Ordering::Acquire);
            history
                .slot_entries
                .entry(current_slot)
                .or_default()
                .push(entry.clone());
            let cutoff = current_slot.saturating_sub(MAX_SLOT_HISTORY);
            while let Some((&oldest, _)) = history.slot_entries.iter().next() {
                if oldest < cutoff {
                    history.slot_entries.remove(&oldest);
                } else {
                    break;
                }
            }
        }

        {
            let callbacks = self.lock_tracked(&self.callbacks);
            if let Some(tick_callback) = &callbacks.tick {
                tick_callback(&entry);
            }
        }

        self.check_slot_completion();

        let tick_duration = tick_start.elapsed();
        let mixed_count = entry.mixed.len() as u64;
        {
            let mut stats = self.lock_tracked(&self.stats);
            stats.total_ticks += 1;
            stats.total_hashes += 1 + mixed_count;
            stats.batches_processed += batches;
            stats.last_tick_duration = tick_duration;
            stats.max_tick_duration = stats.max_tick_duration.max(tick_duration);
            stats.min_tick_duration = Some(match stats.min_tick_duration {
                Some(min) => min.min(tick_duration),
                None => tick_duration,
            });
        }
    }

    fn check_slot_completion(&self) {
        let sequence = self.sequence.load(Ordering::Acquire);
        if sequence > 0 && sequence % self.config.ticks_per_slot == 0 {
            let completed = self.slot.fetch_add(1, Ordering::AcqRel);
            let entries = self
                .lock_tracked(&self.history)
                .slot_entries
                .get(&completed)
                .cloned()
                .unwrap_or_default();
            debug!("slot {completed} completed with {} entries", entries.len());
            let callbacks = self.lock_tracked(&self.callbacks);
            if let Some(slot_callback) = &callbacks.slot {
                slot_callback(completed, &entries);
            }
        }
    }
}
