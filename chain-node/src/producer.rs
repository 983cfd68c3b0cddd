//! Periodic block production for one shard

use crate::{
    BlockChain, CommitteeConfig, ConfirmationOracle, ConsensusNode, NodeError, NodeResult,
    TimeBeacon,
};
use chain_core::{
    Block, BlockHeader, BlockNumber, ClientId, Clock, Hash, ReceiptBatch, ShardId, Timestamp,
    Transaction, TxReceipt, TxStatus,
};
use chain_network::{Destination, Endpoint, MessageHub, NetworkMessage};
use chain_txpool::TxPool;
use chain_vm::{LedgerFork, SharedLedger, StateExecutor};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Turns pool batches into committed blocks.
///
/// Each tick draws a batch, executes it against a fork of the shard ledger
/// and runs one consensus round through the leader. The fork and the block
/// are committed only once the round has replied, so a tick that is still
/// waiting on its round holds off the next draw.
pub struct BlockProducer {
    shard_id: ShardId,
    config: CommitteeConfig,
    pool: Arc<TxPool>,
    executor: StateExecutor,
    ledger: SharedLedger,
    chain: Arc<RwLock<BlockChain>>,
    leader: Arc<ConsensusNode>,
    beacon: Arc<dyn ConfirmationOracle>,
    hub: Arc<dyn MessageHub>,
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
}

impl std::fmt::Debug for BlockProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProducer")
            .field("shard_id", &self.shard_id)
            .field("height", &self.chain.read().height())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl BlockProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CommitteeConfig,
        pool: Arc<TxPool>,
        ledger: SharedLedger,
        chain: Arc<RwLock<BlockChain>>,
        leader: Arc<ConsensusNode>,
        beacon: Arc<dyn ConfirmationOracle>,
        hub: Arc<dyn MessageHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            shard_id: pool.shard_id(),
            executor: StateExecutor::new(config.executor_config()),
            config,
            pool,
            ledger,
            chain,
            leader,
            beacon,
            hub,
            clock,
            paused: AtomicBool::new(false),
        }
    }

    /// Stop drawing batches; a round already running still completes
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("S{} block production paused", self.shard_id);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("S{} block production resumed", self.shard_id);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Produce blocks until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> NodeResult<()> {
        let period = self.config.recommit_interval();
        info!("S{} block producer started, recommit every {:?}", self.shard_id, period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.is_paused() {
                        continue;
                    }
                    match self.produce_block(&cancel).await {
                        Ok(_) => {}
                        Err(NodeError::Shutdown) => break,
                        Err(e) => error!("S{} block production failed: {}", self.shard_id, e),
                    }
                }
            }
        }

        info!("S{} block producer stopped", self.shard_id);
        Ok(())
    }

    /// Draw, execute and commit one block. Returns `None` on an idle tick.
    pub async fn produce_block(&self, cancel: &CancellationToken) -> NodeResult<Option<BlockNumber>> {
        let now = self.clock.now();
        let batch = self.pool.draw_batch(self.config.max_block_size, now);
        if batch.is_empty() {
            return Ok(None);
        }
        if batch.transactions.is_empty() {
            // only expired entries: report them against the current head
            let height = self.chain.read().height();
            self.send_receipts(&batch.expired, height, now);
            return Ok(None);
        }

        let drawn = batch.transactions.clone();
        let mut transactions = batch.transactions;
        let mut fork = self.ledger.fork();
        for tx in &mut transactions {
            if let Err(e) = self.executor.execute(tx, fork.ledger_mut(), now) {
                error!("S{} skipping tx {}: {}", self.shard_id, tx.id, e);
            }
        }

        let block = {
            let chain = self.chain.read();
            let header = BlockHeader {
                shard_id: self.shard_id,
                number: chain.height() + 1,
                parent_hash: chain.head_hash(),
                state_root: fork.state_root(),
                transactions_root: Block::calculate_transactions_root(&transactions)?,
                timestamp: now,
                proposer: self.leader.node_id(),
            };
            Block::new(header, transactions)
        };
        let number = block.number();

        match self.leader.run_round(&block, cancel).await {
            Ok(_) => {}
            Err(NodeError::RoundAbandoned(seq_id)) => {
                warn!(
                    "S{} round {} abandoned, returning {} txs to the pool",
                    self.shard_id,
                    seq_id,
                    drawn.len()
                );
                self.pool.admit_all(drawn);
                let height = self.chain.read().height();
                self.send_receipts(&batch.expired, height, self.clock.now());
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let (state_root, block_hash) = match self.apply(&block, fork) {
            Ok(applied) => applied,
            Err(e) => {
                error!(
                    "S{} block {} agreed but not applied, returning {} txs to the pool: {}",
                    self.shard_id,
                    number,
                    drawn.len(),
                    e
                );
                self.pool.admit_all(drawn);
                let height = self.chain.read().height();
                self.send_receipts(&batch.expired, height, self.clock.now());
                return Err(e);
            }
        };
        let confirm_time = match self.beacon.submit(TimeBeacon {
            shard_id: self.shard_id,
            height: number,
            block_hash,
            tx_root: block.header.transactions_root,
            state_root,
        }) {
            Ok(confirmed) => confirmed.confirm_time,
            Err(e) => {
                error!(
                    "S{} block {} committed without a beacon confirmation: {}",
                    self.shard_id, number, e
                );
                self.clock.now()
            }
        };

        info!(
            "S{} committed block {} ({} txs, {} expired) hash {}",
            self.shard_id,
            number,
            block.transactions.len(),
            batch.expired.len(),
            block_hash.short()
        );

        self.send_receipts(&block.transactions, number, confirm_time);
        self.send_receipts(&batch.expired, number, confirm_time);
        Ok(Some(number))
    }

    /// Commit the fork and append the block under one chain lock.
    ///
    /// The block is checked against the head first, so either both the
    /// ledger and the chain advance or neither does.
    fn apply(&self, block: &Block, fork: LedgerFork) -> NodeResult<(Hash, Hash)> {
        let mut chain = self.chain.write();
        chain.validate_next(block)?;
        let state_root = self.ledger.commit(fork)?;
        let block_hash = chain.append(block.clone())?;
        Ok((state_root, block_hash))
    }

    /// Send one receipt batch per owning client
    pub fn send_receipts(
        &self,
        transactions: &[Transaction],
        block_height: BlockNumber,
        confirm_time: Timestamp,
    ) {
        let mut per_client: BTreeMap<ClientId, Vec<TxReceipt>> = BTreeMap::new();
        for tx in transactions {
            if tx.status == TxStatus::Pending {
                error!(
                    "S{} no status recorded for {} tx {}, no receipt sent",
                    self.shard_id, tx.tx_type, tx.id
                );
                continue;
            }
            per_client.entry(tx.owner).or_default().push(TxReceipt::for_transaction(
                tx,
                self.shard_id,
                block_height,
                confirm_time,
            ));
        }

        for (client_id, receipts) in per_client {
            debug!("S{} sending {} receipts to C{}", self.shard_id, receipts.len(), client_id);
            let batch = ReceiptBatch {
                shard_id: self.shard_id,
                client_id,
                receipts,
            };
            if let Err(e) = self.hub.send(
                self.leader.endpoint(),
                Destination::Endpoint(Endpoint::Client(client_id)),
                NetworkMessage::TxReceipts(batch),
            ) {
                warn!("S{} failed to deliver receipts to C{}: {}", self.shard_id, client_id, e);
            }
        }
    }
}
