//! Client runtime
//!
//! Three independent timers drive a client: injection of the generated
//! workload, dispatch of phase-two and rollback transactions, and the
//! expiry scan. Receipts arrive through the client's hub inbox.

use crate::{ClientConfig, ClientError, ClientResult, CrossShardTracker, OutcomeReport};
use chain_core::{Clock, InjectTransaction, ReceiptBatch, ShardId, Transaction};
use chain_network::{Destination, Endpoint, Envelope, MessageHub, NetworkMessage};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Client {
    config: ClientConfig,
    endpoint: Endpoint,
    hub: Arc<dyn MessageHub>,
    clock: Arc<dyn Clock>,
    generated: usize,
    pending: Mutex<VecDeque<Transaction>>,
    // lock order: tracker, then report
    tracker: Mutex<CrossShardTracker>,
    report: Mutex<OutcomeReport>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("generated", &self.generated)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl Client {
    pub fn new(
        config: ClientConfig,
        workload: Vec<Transaction>,
        hub: Arc<dyn MessageHub>,
        clock: Arc<dyn Clock>,
    ) -> ClientResult<Self> {
        config.validate()?;
        if let Some(tx) = workload
            .iter()
            .find(|tx| tx.sender_shard.max(tx.recipient_shard) >= config.shard_count)
        {
            return Err(ClientError::Workload(format!(
                "Tx {} spans shards {} -> {}, only {} shards exist",
                tx.id, tx.sender_shard, tx.recipient_shard, config.shard_count
            )));
        }
        let generated = workload.len();
        Ok(Self {
            endpoint: Endpoint::Client(config.client_id),
            report: Mutex::new(OutcomeReport::new(config.client_id, generated)),
            config,
            hub,
            clock,
            generated,
            pending: Mutex::new(workload.into()),
            tracker: Mutex::new(CrossShardTracker::new()),
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run until cancelled
    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
    ) -> ClientResult<()> {
        info!(
            "Client {} started with {} transactions",
            self.config.client_id, self.generated
        );

        let mut inject = interval(self.config.inject_interval());
        let mut dispatch = interval(self.config.dispatch_interval());
        let mut scan = interval(self.config.scan_interval());
        for timer in [&mut inject, &mut dispatch, &mut scan] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = inject.tick() => {
                    self.inject_tick();
                }
                _ = dispatch.tick() => {
                    self.dispatch_tick();
                }
                _ = scan.tick() => {
                    self.scan_tick();
                }
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => {
                        info!("Client {} inbox closed", self.config.client_id);
                        break;
                    }
                }
            }
        }

        info!("Client {} stopped", self.config.client_id);
        Ok(())
    }

    /// Submit the next slice of the workload
    pub fn inject_tick(&self) -> usize {
        let now = self.clock.now();
        let batch: Vec<Transaction> = {
            let mut pending = self.pending.lock();
            let count = self.config.inject_speed.min(pending.len());
            pending.drain(..count).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let batch: Vec<Transaction> = batch
            .into_iter()
            .map(|mut tx| {
                tx.broadcast_time = now;
                tx
            })
            .collect();
        {
            let mut tracker = self.tracker.lock();
            for tx in &batch {
                tracker.track(tx);
            }
        }

        let count = batch.len();
        self.submit(batch);
        count
    }

    /// Submit queued rollbacks, then queued phase-two transactions
    pub fn dispatch_tick(&self) -> usize {
        let (rollbacks, phase2) = {
            let mut tracker = self.tracker.lock();
            let rollbacks = tracker.take_rollbacks(self.config.inject_speed);
            let phase2 = tracker.take_phase2(self.config.inject_speed);
            (rollbacks, phase2)
        };
        let count = rollbacks.len() + phase2.len();
        if count > 0 {
            debug!(
                "Client {} dispatching {} rollbacks, {} phase-two",
                self.config.client_id,
                rollbacks.len(),
                phase2.len()
            );
        }
        self.submit(rollbacks);
        self.submit(phase2);
        count
    }

    /// Move overdue transfers to rollback
    pub fn scan_tick(&self) -> usize {
        let now = self.clock.now();
        let expired = self
            .tracker
            .lock()
            .scan_expired(now, self.config.rollback_scan_grace_secs);
        if !expired.is_empty() {
            info!(
                "Client {} rolling back {} expired transfers",
                self.config.client_id,
                expired.len()
            );
        }
        expired.len()
    }

    fn handle_envelope(&self, envelope: Envelope) {
        match envelope.message {
            NetworkMessage::TxReceipts(batch) => self.handle_receipts(&batch),
            other => warn!(
                "Client {} ignoring {} from {}",
                self.config.client_id,
                other.kind(),
                envelope.from
            ),
        }
    }

    pub fn handle_receipts(&self, batch: &ReceiptBatch) {
        if batch.client_id != self.config.client_id {
            warn!(
                "Client {} received receipts for client {}",
                self.config.client_id, batch.client_id
            );
            return;
        }
        let mut tracker = self.tracker.lock();
        let mut report = self.report.lock();
        for receipt in &batch.receipts {
            report.record_receipt(receipt);
            tracker.on_receipt(receipt);
        }
    }

    fn submit(&self, transactions: Vec<Transaction>) {
        let mut per_shard: BTreeMap<ShardId, Vec<Transaction>> = BTreeMap::new();
        for tx in transactions {
            per_shard.entry(tx.home_shard()).or_default().push(tx);
        }
        for (shard_id, transactions) in per_shard {
            let count = transactions.len();
            let message = NetworkMessage::InjectTransactions(InjectTransaction {
                shard_id,
                transactions,
            });
            if let Err(e) = self
                .hub
                .send(self.endpoint, Destination::ShardLeader(shard_id), message)
            {
                warn!(
                    "Client {} failed to submit {} txs to shard {}: {}",
                    self.config.client_id, count, shard_id, e
                );
            }
        }
    }

    /// Everything injected and every transfer terminal
    pub fn is_finished(&self) -> bool {
        self.pending.lock().is_empty() && self.tracker.lock().is_settled()
    }

    pub fn report(&self) -> OutcomeReport {
        let injected = self.generated - self.pending.lock().len();
        let tracker = self.tracker.lock();
        let mut report = self.report.lock().clone();
        report.injected = injected;
        report.update_from(&tracker);
        report
    }
}
