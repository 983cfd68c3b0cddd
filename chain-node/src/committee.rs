//! Committee wiring for one shard

use crate::{
    BlockChain, BlockProducer, BlockValidator, CommitteeConfig, ConfirmationOracle,
    ConsensusNode, NodeError, NodeResult,
};
use chain_core::{BlockNumber, Clock, NodeId, SeqId, ShardId};
use chain_network::{Endpoint, Envelope, LocalHub, NetworkMessage};
use chain_txpool::TxPool;
use chain_vm::SharedLedger;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Running committee of one shard: its nodes, pool, ledger, chain and producer
pub struct Committee {
    shard_id: ShardId,
    pool: Arc<TxPool>,
    ledger: SharedLedger,
    chain: Arc<RwLock<BlockChain>>,
    nodes: Vec<Arc<ConsensusNode>>,
    producer: Arc<BlockProducer>,
    hub: Arc<LocalHub>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Committee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committee")
            .field("shard_id", &self.shard_id)
            .field("nodes", &self.nodes.len())
            .field("height", &self.height())
            .finish()
    }
}

impl Committee {
    /// Register every node with the hub and spawn inbox and producer tasks
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        shard_id: ShardId,
        config: CommitteeConfig,
        hub: Arc<LocalHub>,
        beacon: Arc<dyn ConfirmationOracle>,
        clock: Arc<dyn Clock>,
        ledger: SharedLedger,
        parent: &CancellationToken,
    ) -> NodeResult<Self> {
        config.validate()?;
        let pbft = config.pbft_config();
        let chain = Arc::new(RwLock::new(BlockChain::new(shard_id)?));
        let pool = Arc::new(TxPool::new(shard_id));
        let cancel = parent.child_token();
        hub.set_leader(shard_id, pbft.leader());

        let mut nodes = Vec::with_capacity(config.committee_size);
        let mut tasks = Vec::with_capacity(config.committee_size + 1);
        for node_id in 0..config.committee_size as NodeId {
            let node = Arc::new(ConsensusNode::new(
                shard_id,
                node_id,
                pbft.clone(),
                Arc::new(BlockValidator::new(shard_id, node_id)),
                hub.clone(),
                clock.clone(),
            )?);
            let inbox = hub.register(node.endpoint());
            tasks.push(tokio::spawn(run_inbox(
                node.clone(),
                pool.clone(),
                inbox,
                cancel.clone(),
            )));
            nodes.push(node);
        }

        let leader = nodes
            .get(pbft.leader() as usize)
            .cloned()
            .ok_or_else(|| NodeError::Config(format!("No node at view {}", pbft.leader())))?;
        let producer = Arc::new(BlockProducer::new(
            config.clone(),
            pool.clone(),
            ledger.clone(),
            chain.clone(),
            leader,
            beacon,
            hub.clone(),
            clock.clone(),
        ));
        let runner = producer.clone();
        let producer_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = runner.run(producer_cancel).await {
                error!("S{} producer exited: {}", shard_id, e);
            }
        }));

        info!(
            "S{} committee started with {} nodes, leader N{}",
            shard_id,
            nodes.len(),
            pbft.leader()
        );
        Ok(Self {
            shard_id,
            pool,
            ledger,
            chain,
            nodes,
            producer,
            hub,
            clock,
            cancel,
            tasks,
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn chain(&self) -> &Arc<RwLock<BlockChain>> {
        &self.chain
    }

    pub fn height(&self) -> BlockNumber {
        self.chain.read().height()
    }

    pub fn nodes(&self) -> &[Arc<ConsensusNode>] {
        &self.nodes
    }

    pub fn node(&self, node_id: NodeId) -> Option<&Arc<ConsensusNode>> {
        self.nodes.get(node_id as usize)
    }

    pub fn leader(&self) -> Option<&Arc<ConsensusNode>> {
        self.nodes.iter().find(|node| node.is_leader())
    }

    pub fn pause(&self) {
        self.producer.pause();
    }

    pub fn resume(&self) {
        self.producer.resume();
    }

    /// Empty the pool and tell owners their transactions were dropped
    pub fn reset_pool(&self) -> usize {
        let dropped = self.pool.reset();
        if !dropped.is_empty() {
            self.producer
                .send_receipts(&dropped, self.height(), self.clock.now());
        }
        dropped.len()
    }

    /// Clear every node's consensus state and move it to `seq_id`
    pub fn reset_consensus(&self, seq_id: SeqId) {
        for node in &self.nodes {
            node.reset();
            node.set_sequence_id(seq_id);
        }
        info!("S{} consensus reset to seq {}", self.shard_id, seq_id);
    }

    /// Stop every task and leave the hub
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("S{} task ended abnormally: {}", self.shard_id, e);
            }
        }
        for node in &self.nodes {
            self.hub.unregister(&node.endpoint());
        }
        info!("S{} committee stopped at height {}", self.shard_id, self.chain.read().height());
    }
}

async fn run_inbox(
    node: Arc<ConsensusNode>,
    pool: Arc<TxPool>,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = inbox.recv() => match envelope {
                Some(envelope) => handle_envelope(&node, &pool, envelope),
                None => break,
            }
        }
    }
    debug!("{} inbox closed", node.endpoint());
}

fn handle_envelope(node: &ConsensusNode, pool: &TxPool, envelope: Envelope) {
    let Envelope { from, message } = envelope;
    match message {
        NetworkMessage::Pbft(msg) => match from {
            Endpoint::Node { shard_id, node_id } if shard_id == node.shard_id() => {
                node.handle_message(node_id, msg)
            }
            _ => warn!("{} ignoring {} from {}", node.endpoint(), msg.kind(), from),
        },
        NetworkMessage::InjectTransactions(inject) => {
            if !node.is_leader() {
                warn!(
                    "{} is not the leader, dropping {} txs from {}",
                    node.endpoint(),
                    inject.transactions.len(),
                    from
                );
                return;
            }
            if inject.shard_id != node.shard_id() {
                warn!(
                    "{} received txs addressed to shard {}",
                    node.endpoint(),
                    inject.shard_id
                );
            }
            pool.admit_all(inject.transactions);
        }
        NetworkMessage::TxReceipts(_) => {
            warn!("{} unexpected receipts from {}", node.endpoint(), from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalBeaconChain, TimeBeacon};
    use chain_core::{
        Address, Hash, InjectTransaction, ManualClock, ReceiptBatch, Transaction, TxReceipt,
        TxStatus,
    };
    use chain_network::{Destination, HubConfig, MessageHub};
    use chain_vm::{Account, MemoryLedger};
    use std::time::Duration;

    struct Fixture {
        hub: Arc<LocalHub>,
        beacon: Arc<LocalBeaconChain>,
        committee: Committee,
        client: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
        clock: Arc<ManualClock>,
    }

    const CLIENT: Endpoint = Endpoint::Client(7);

    fn start() -> Fixture {
        let hub = Arc::new(LocalHub::new(HubConfig::new().with_encoding(true)).unwrap());
        let clock = Arc::new(ManualClock::new(1_000));
        let beacon = Arc::new(LocalBeaconChain::new(clock.clone()));
        let ledger = SharedLedger::new(MemoryLedger::with_accounts([(
            Address::from_index(0),
            Account::with_balance(1_000),
        )]));
        let cancel = CancellationToken::new();
        let config = CommitteeConfig::default().with_recommit_interval_ms(100);

        let client = hub.register(CLIENT);
        let committee = Committee::start(
            0,
            config,
            hub.clone(),
            beacon.clone(),
            clock.clone(),
            ledger,
            &cancel,
        )
        .unwrap();
        Fixture {
            hub,
            beacon,
            committee,
            client,
            cancel,
            clock,
        }
    }

    fn transfer(id: u64, nonce: u64) -> Transaction {
        Transaction::transfer(
            id,
            Address::from_index(0),
            Address::from_index(4),
            0,
            0,
            10,
            nonce,
            7,
            20,
        )
    }

    /// Credit half of a transfer from shard 1 to account 4 on shard 0
    fn phase2(id: u64, confirm_time: u64) -> Transaction {
        Transaction::transfer(
            id,
            Address::from_index(1),
            Address::from_index(4),
            1,
            0,
            20,
            0,
            7,
            20,
        )
        .to_phase2(confirm_time)
    }

    fn inject(hub: &LocalHub, transactions: Vec<Transaction>) {
        hub.send(
            CLIENT,
            Destination::ShardLeader(0),
            NetworkMessage::InjectTransactions(InjectTransaction {
                shard_id: 0,
                transactions,
            }),
        )
        .unwrap();
    }

    async fn next_receipts(client: &mut mpsc::UnboundedReceiver<Envelope>) -> ReceiptBatch {
        let envelope = tokio::time::timeout(Duration::from_secs(10), client.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            NetworkMessage::TxReceipts(batch) => batch,
            other => panic!("unexpected message {:?}", other),
        }
    }

    async fn collect_receipts(
        client: &mut mpsc::UnboundedReceiver<Envelope>,
        count: usize,
    ) -> Vec<TxReceipt> {
        let mut receipts = Vec::new();
        while receipts.len() < count {
            receipts.extend(next_receipts(client).await.receipts);
        }
        receipts.sort_by_key(|receipt| receipt.tx_id);
        receipts
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_intra_transfer_is_committed_and_receipted() {
        let mut fixture = start();
        inject(&fixture.hub, vec![transfer(1, 0)]);

        let batch = next_receipts(&mut fixture.client).await;
        assert_eq!(batch.client_id, 7);
        assert_eq!(batch.receipts.len(), 1);
        let receipt = &batch.receipts[0];
        assert_eq!(receipt.tx_id, 1);
        assert_eq!(receipt.status, TxStatus::IntraSuccess);
        assert_eq!(receipt.block_height, 1);
        assert_eq!(receipt.confirm_time, 1_000);

        let committee = &fixture.committee;
        assert_eq!(committee.height(), 1);
        assert_eq!(committee.ledger().balance(&Address::from_index(0)), 990);
        assert_eq!(committee.ledger().balance(&Address::from_index(4)), 10);
        assert_eq!(fixture.beacon.latest_height(0), Some(1));
        let head = committee.chain().read().head_hash();
        assert_eq!(fixture.beacon.confirmed(0, 1).unwrap().beacon.block_hash, head);

        fixture.cancel.cancel();
        fixture.committee.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnected_replica_catches_up() {
        let mut fixture = start();
        let straggler = Endpoint::node(0, 3);
        fixture.hub.disconnect(straggler);

        for id in 1..=2 {
            inject(&fixture.hub, vec![transfer(id, id - 1)]);
            next_receipts(&mut fixture.client).await;
        }
        assert_eq!(fixture.committee.height(), 2);
        assert_eq!(fixture.committee.node(3).unwrap().sequence_id(), 1);

        fixture.hub.reconnect(&straggler);
        inject(&fixture.hub, vec![transfer(3, 2)]);
        next_receipts(&mut fixture.client).await;

        let node = fixture.committee.node(3).unwrap().clone();
        wait_until(|| node.sequence_id() == 4).await;

        fixture.committee.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_pool_sends_dropped_receipts() {
        let mut fixture = start();
        fixture.committee.pause();
        inject(&fixture.hub, vec![transfer(1, 0), transfer(2, 1)]);

        let pool = fixture.committee.pool().clone();
        wait_until(|| pool.len() == 2).await;
        assert_eq!(fixture.committee.reset_pool(), 2);

        let batch = next_receipts(&mut fixture.client).await;
        assert_eq!(batch.receipts.len(), 2);
        assert!(batch
            .receipts
            .iter()
            .all(|receipt| receipt.status == TxStatus::Dropped));
        assert_eq!(fixture.committee.height(), 0);

        fixture.committee.resume();
        fixture.committee.reset_consensus(1);
        assert!(fixture.committee.nodes().iter().all(|node| node.sequence_id() == 1));
        fixture.committee.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_phase2_is_receipted_without_execution() {
        let mut fixture = start();
        fixture.committee.pause();
        // at t=1000 the deadline 950 + 20 has passed, 990 + 20 has not
        inject(&fixture.hub, vec![phase2(1, 950), phase2(2, 990)]);
        let pool = fixture.committee.pool().clone();
        wait_until(|| pool.len() == 2).await;
        fixture.committee.resume();

        let receipts = collect_receipts(&mut fixture.client, 2).await;
        assert_eq!(receipts[0].tx_id, 1);
        assert_eq!(receipts[0].status, TxStatus::Phase2Fail);
        assert_eq!(receipts[1].tx_id, 2);
        assert_eq!(receipts[1].status, TxStatus::Phase2Success);
        assert!(receipts.iter().all(|receipt| receipt.block_height == 1));

        // only the fresh transaction reached the block and the ledger
        let committee = &fixture.committee;
        assert_eq!(committee.ledger().balance(&Address::from_index(4)), 20);
        let ids: Vec<u64> = committee
            .chain()
            .read()
            .block(1)
            .unwrap()
            .transactions
            .iter()
            .map(|tx| tx.id)
            .collect();
        assert_eq!(ids, vec![2]);

        fixture.committee.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_of_only_expired_phase2_produces_no_block() {
        let mut fixture = start();
        fixture.clock.set(1_050);
        inject(&fixture.hub, vec![phase2(1, 950)]);

        let receipts = collect_receipts(&mut fixture.client, 1).await;
        assert_eq!(receipts[0].status, TxStatus::Phase2Fail);
        assert_eq!(receipts[0].block_height, 0);
        assert_eq!(receipts[0].confirm_time, 1_050);

        assert_eq!(fixture.committee.height(), 0);
        assert!(fixture.committee.pool().is_empty());
        assert_eq!(fixture.committee.ledger().balance(&Address::from_index(4)), 0);
        fixture.committee.shutdown().await;
    }

    #[tokio::test]
    async fn test_receipts_sent_when_beacon_rejects_block() {
        let mut fixture = start();
        // occupy height 1 so the producer's beacon is out of sequence
        let foreign = Hash::keccak(b"foreign");
        fixture
            .beacon
            .submit(TimeBeacon {
                shard_id: 0,
                height: 1,
                block_hash: foreign,
                tx_root: foreign,
                state_root: foreign,
            })
            .unwrap();

        inject(&fixture.hub, vec![transfer(1, 0)]);
        let receipts = collect_receipts(&mut fixture.client, 1).await;
        assert_eq!(receipts[0].status, TxStatus::IntraSuccess);
        assert_eq!(receipts[0].block_height, 1);
        assert_eq!(receipts[0].confirm_time, 1_000);

        // ledger and chain advanced together
        let committee = &fixture.committee;
        assert_eq!(committee.height(), 1);
        assert_eq!(committee.ledger().balance(&Address::from_index(4)), 10);
        assert_eq!(fixture.beacon.confirmed(0, 1).unwrap().beacon.block_hash, foreign);
        fixture.committee.shutdown().await;
    }
}
