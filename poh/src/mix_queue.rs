//! Pending-mix queues. Two interchangeable strategies live behind one
//! trait; the contract is identical: FIFO per producer, at-most-once
//! delivery, drop-on-overflow with a counter instead of blocking.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use sealane_sdk::hash::Hash;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait MixQueue: Send + Sync {
    /// Enqueue a hash for inclusion in an upcoming tick. Never blocks; a
    /// full bounded queue drops the hash and bumps the dropped counter.
    fn push(&self, data: Hash);

    /// Pop up to `max` hashes into `out`, preserving enqueue order.
    /// Returns the number of hashes moved.
    fn drain_into(&self, out: &mut Vec<Hash>, max: usize) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total hashes dropped on overflow since construction.
    fn dropped(&self) -> u64;
}

/// Mutex-guarded unbounded deque. Simple, never drops.
#[derive(Default)]
pub struct MutexMixQueue {
    pending: Mutex<VecDeque<Hash>>,
}

impl MutexMixQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MixQueue for MutexMixQueue {
    fn push(&self, data: Hash) {
        self.pending.lock().push_back(data);
    }

    fn drain_into(&self, out: &mut Vec<Hash>, max: usize) -> usize {
        let mut pending = self.pending.lock();
        let take = pending.len().min(max);
        out.extend(pending.drain(..take));
        take
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }

    fn dropped(&self) -> u64 {
        0
    }
}

/// Bounded MPSC channel queue. Lock-free on the push path; overflow is
/// fire-and-forget with a dropped counter the caller can observe via stats.
pub struct ChannelMixQueue {
    sender: Sender<Hash>,
    receiver: Receiver<Hash>,
    dropped: AtomicU64,
}

impl ChannelMixQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
        }
    }
}

impl MixQueue for ChannelMixQueue {
    fn push(&self, data: Hash) {
        if let Err(TrySendError::Full(_)) = self.sender.try_send(data) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn drain_into(&self, out: &mut Vec<Hash>, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            match self.receiver.try_recv() {
                Ok(data) => {
                    out.push(data);
                    moved += 1;
                }
                Err(_) => break,
            }
        }
        moved
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
