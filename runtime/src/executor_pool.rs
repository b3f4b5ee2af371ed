//! A pool of executor lanes. Each lane independently runs one transaction
//! at a time against the shared engine and store; no ordering is imposed
//! across lanes, so callers that need an order must serialize submission.

use crate::account_store::AccountStore;
use crate::engine::ExecutionEngine;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use sealane_sdk::outcome::ExecutionOutcome;
use sealane_sdk::transaction::Transaction;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

struct Job {
    transaction: Transaction,
    reply: Sender<ExecutionOutcome>,
}

pub struct ExecutorPool {
    sender: Sender<Job>,
    lanes: Vec<JoinHandle<()>>,
}

impl ExecutorPool {
    /// Spawn `lanes` worker lanes (0 picks the hardware parallelism).
    pub fn new(engine: Arc<ExecutionEngine>, store: Arc<AccountStore>, lanes: usize) -> Self {
        let lanes = if lanes == 0 { num_cpus::get() } else { lanes };
        let (sender, receiver) = unbounded::<Job>();
        let handles = (0..lanes)
            .map(|lane| {
                let receiver: Receiver<Job> = receiver.clone();
                let engine = engine.clone();
                let store = store.clone();
                Builder::new()
                    .name(format!("sealane-executor-{lane}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            let outcome = engine.execute_transaction(&job.transaction, &store);
                            // the submitter may have hung up; that's fine
                            let _ = job.reply.send(outcome);
                        }
                        debug!("executor lane {lane} exiting");
                    })
                    .expect("spawn executor lane")
            })
            .collect();
        info!("executor pool started with {lanes} lanes");
        Self {
            sender,
            lanes: handles,
        }
    }

    /// Queue a transaction; the returned channel yields its outcome.
    pub fn submit(&self, transaction: Transaction) -> Receiver<ExecutionOutcome> {
        let (reply, outcome) = unbounded();
        self.sender
            .send(Job { transaction, reply })
            .expect("executor pool is running");
        outcome
    }

    /// Execute on the pool and wait for the outcome.
    pub fn execute_blocking(&self, transaction: Transaction) -> ExecutionOutcome {
        self.submit(transaction)
            .recv()
            .expect("executor lane replies before hanging up")
    }

    /// Drain in-flight work and stop every lane.
    pub fn shutdown(self) {
        drop(self.sender);
        for lane in self.lanes {
            let _ = lane.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::system_program;
    use sealane_sdk::account::Account;
    use sealane_sdk::pubkey::Pubkey;

    fn pool_with_accounts(count: usize) -> (ExecutorPool, Arc<AccountStore>, Vec<Pubkey>) {
        let engine = Arc::new(ExecutionEngine::new(EngineConfig::default()).unwrap());
        let store = Arc::new(AccountStore::default());
        let keys: Vec<Pubkey> = (0..count).map(|_| Pubkey::new_rand()).collect();
        for key in &keys {
            store
                .create(Account::new(*key, 1_000, Pubkey::default()))
                .unwrap();
        }
        store.commit();
        let pool = ExecutorPool::new(engine, store.clone(), 4);
        (pool, store, keys)
    }

    #[test]
    fn test_parallel_transfers_commit() {
        let (pool, store, keys) = pool_with_accounts(8);
        // disjoint pairs, safe to run on any lane in any order
        let receivers: Vec<_> = keys
            .chunks(2)
            .map(|pair| {
                pool.submit(Transaction::new(vec![system_program::transfer(
                    pair[0], pair[1], 250,
                )]))
            })
            .collect();
        for receiver in receivers {
            let outcome = receiver.recv().unwrap();
            assert!(outcome.is_success(), "{}", outcome.error_details);
        }
        pool.shutdown();
        for pair in keys.chunks(2) {
            assert_eq!(store.balance(&pair[0]), 750);
            assert_eq!(store.balance(&pair[1]), 1_250);
        }
    }

    #[test]
    fn test_failed_transaction_leaves_store_intact() {
        let (pool, store, keys) = pool_with_accounts(2);
        let outcome = pool.execute_blocking(Transaction::new(vec![system_program::transfer(
            keys[0], keys[1], 1_000_000,
        )]));
        assert!(!outcome.is_success());
        pool.shutdown();
        assert_eq!(store.balance(&keys[0]), 1_000);
        assert_eq!(store.balance(&keys[1]), 1_000);
    }

    #[test]
    fn test_shutdown_drains_submitted_work() {
        let (pool, store, keys) = pool_with_accounts(2);
        let receiver = pool.submit(Transaction::new(vec![system_program::transfer(
            keys[0], keys[1], 1,
        )]));
        pool.shutdown();
        assert!(receiver.recv().unwrap().is_success());
        assert_eq!(store.balance(&keys[1]), 1_001);
    }
}
