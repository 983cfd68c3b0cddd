//! Class-based FIFO queues with rollback-first draws

use chain_core::{ShardId, Timestamp, Transaction, TxStatus, TxType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Result of one draw
#[derive(Debug, Default, Clone)]
pub struct Batch {
    /// Transactions to execute, rollbacks first
    pub transactions: Vec<Transaction>,
    /// Phase-two transactions discarded as expired, already marked `Phase2Fail`
    pub expired: Vec<Transaction>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.expired.is_empty()
    }
}

#[derive(Debug, Default)]
struct Queues {
    rollback: VecDeque<Transaction>,
    main: VecDeque<Transaction>,
}

/// Transaction pool of one shard
#[derive(Debug)]
pub struct TxPool {
    shard_id: ShardId,
    queues: Mutex<Queues>,
}

impl TxPool {
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            queues: Mutex::new(Queues::default()),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Append to the rollback queue or the main queue
    pub fn admit(&self, tx: Transaction) {
        let mut queues = self.queues.lock();
        self.push(&mut queues, tx);
    }

    /// Admit a batch under one lock acquisition
    pub fn admit_all(&self, txs: Vec<Transaction>) {
        let mut queues = self.queues.lock();
        for tx in txs {
            self.push(&mut queues, tx);
        }
        debug!(
            "S{} pool: {} pending, {} rollback",
            self.shard_id,
            queues.main.len(),
            queues.rollback.len()
        );
    }

    fn push(&self, queues: &mut Queues, tx: Transaction) {
        if tx.home_shard() != self.shard_id {
            warn!(
                "S{} pool admitting {} tx {} that belongs to shard {}",
                self.shard_id,
                tx.tx_type,
                tx.id,
                tx.home_shard()
            );
        }
        trace!("S{} pool admit {} tx {}", self.shard_id, tx.tx_type, tx.id);
        if tx.tx_type == TxType::Rollback {
            queues.rollback.push_back(tx);
        } else {
            queues.main.push_back(tx);
        }
    }

    /// Remove up to `max_size` transactions for the next block.
    ///
    /// The rollback queue is drained first. Expired phase-two entries met
    /// in the main queue are discarded without consuming budget.
    pub fn draw_batch(&self, max_size: usize, now: Timestamp) -> Batch {
        let mut queues = self.queues.lock();
        let mut batch = Batch::default();

        let from_rollback = max_size.min(queues.rollback.len());
        batch.transactions.extend(queues.rollback.drain(..from_rollback));

        while batch.transactions.len() < max_size {
            let Some(mut tx) = queues.main.pop_front() else {
                break;
            };
            if tx.is_phase2_expired(now) {
                warn!(
                    "S{} pool dropping expired phase-two tx {} (deadline {:?}, now {})",
                    self.shard_id,
                    tx.id,
                    tx.phase2_deadline(),
                    now
                );
                if let Err(e) = tx.set_status(TxStatus::Phase2Fail) {
                    warn!("S{} pool: {}", self.shard_id, e);
                }
                batch.expired.push(tx);
                continue;
            }
            batch.transactions.push(tx);
        }

        if !batch.is_empty() {
            debug!(
                "S{} pool drew {} txs ({} expired), {} pending, {} rollback left",
                self.shard_id,
                batch.transactions.len(),
                batch.expired.len(),
                queues.main.len(),
                queues.rollback.len()
            );
        }
        batch
    }

    /// Empty both queues, marking every leftover transaction `Dropped`
    pub fn reset(&self) -> Vec<Transaction> {
        let mut guard = self.queues.lock();
        let queues = &mut *guard;
        let mut dropped: Vec<Transaction> = queues
            .main
            .drain(..)
            .chain(queues.rollback.drain(..))
            .collect();
        for tx in &mut dropped {
            if let Err(e) = tx.set_status(TxStatus::Dropped) {
                warn!("S{} pool reset: {}", self.shard_id, e);
            }
        }
        debug!("S{} pool reset, dropped {} txs", self.shard_id, dropped.len());
        dropped
    }

    pub fn len(&self) -> usize {
        let queues = self.queues.lock();
        queues.main.len() + queues.rollback.len()
    }

    pub fn pending_len(&self) -> usize {
        self.queues.lock().main.len()
    }

    pub fn rollback_len(&self) -> usize {
        self.queues.lock().rollback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
