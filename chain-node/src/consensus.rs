//! PBFT engine bound to the message hub
//!
//! The engine itself is a synchronous state machine. `ConsensusNode` feeds
//! it inbound messages, ships its output through the hub and lets the
//! leader await the reply quorum of the round it proposed.

use crate::{NodeError, NodeResult};
use chain_consensus::{Outbound, PbftConfig, PbftEngine, Recipient, RoundHandler};
use chain_core::{Block, Clock, NodeId, PbftMessage, PbftRequest, SeqId, ShardId};
use chain_network::{Destination, Endpoint, MessageHub, NetworkMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pending proposal of the local leader
#[derive(Debug)]
struct RoundWaiter {
    seq_id: SeqId,
    done: oneshot::Sender<()>,
}

/// One committee member
pub struct ConsensusNode {
    shard_id: ShardId,
    node_id: NodeId,
    endpoint: Endpoint,
    // lock order: engine, then waiter
    engine: Mutex<PbftEngine>,
    waiter: Mutex<Option<RoundWaiter>>,
    hub: Arc<dyn MessageHub>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConsensusNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusNode")
            .field("endpoint", &self.endpoint)
            .field("engine", &*self.engine.lock())
            .finish()
    }
}

impl ConsensusNode {
    pub fn new(
        shard_id: ShardId,
        node_id: NodeId,
        config: PbftConfig,
        handler: Arc<dyn RoundHandler>,
        hub: Arc<dyn MessageHub>,
        clock: Arc<dyn Clock>,
    ) -> NodeResult<Self> {
        let engine = PbftEngine::new(shard_id, node_id, config, handler)?;
        Ok(Self {
            shard_id,
            node_id,
            endpoint: Endpoint::node(shard_id, node_id),
            engine: Mutex::new(engine),
            waiter: Mutex::new(None),
            hub,
            clock,
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn is_leader(&self) -> bool {
        self.engine.lock().is_leader()
    }

    pub fn sequence_id(&self) -> SeqId {
        self.engine.lock().sequence_id()
    }

    pub fn set_sequence_id(&self, seq_id: SeqId) {
        self.engine.lock().set_sequence_id(seq_id);
    }

    /// Clear cached rounds. A proposal still awaited is abandoned.
    pub fn reset(&self) {
        let mut engine = self.engine.lock();
        engine.reset();
        if let Some(waiter) = self.waiter.lock().take() {
            debug!("S{}N{} abandoning round {}", self.shard_id, self.node_id, waiter.seq_id);
        }
    }

    /// Propose `block` and wait until the committee replies.
    ///
    /// The sequence of the round is the block height. Only one round runs
    /// at a time; the future resolves once the reply quorum is in.
    pub async fn run_round(&self, block: &Block, cancel: &CancellationToken) -> NodeResult<SeqId> {
        let seq_id = block.number();
        let request = PbftRequest::block(block.encode()?, self.clock.now());

        let (done, replied) = oneshot::channel();
        let outbound = {
            let mut engine = self.engine.lock();
            engine.set_sequence_id(seq_id);
            let outbound = engine.propose(request)?;
            *self.waiter.lock() = Some(RoundWaiter { seq_id, done });
            outbound
        };
        self.dispatch(outbound);

        tokio::select! {
            _ = cancel.cancelled() => {
                self.waiter.lock().take();
                Err(NodeError::Shutdown)
            }
            result = replied => match result {
                Ok(()) => {
                    info!("S{}N{} round {} replied", self.shard_id, self.node_id, seq_id);
                    Ok(seq_id)
                }
                Err(_) => Err(NodeError::RoundAbandoned(seq_id)),
            }
        }
    }

    /// Feed one message from committee member `from` to the engine
    pub fn handle_message(&self, from: NodeId, message: PbftMessage) {
        let kind = message.kind();
        let outbound = {
            let mut engine = self.engine.lock();
            let result = engine.handle_message(from, message);
            let replied = engine.take_replied();
            if !replied.is_empty() {
                let mut waiter = self.waiter.lock();
                if waiter.as_ref().is_some_and(|w| replied.contains(&w.seq_id)) {
                    if let Some(waiter) = waiter.take() {
                        // receiver gone means run_round was cancelled
                        let _ = waiter.done.send(());
                    }
                }
            }
            result
        };

        match outbound {
            Ok(outbound) => self.dispatch(outbound),
            Err(e) if e.is_benign() => {
                debug!("S{}N{} {} from N{}: {}", self.shard_id, self.node_id, kind, from, e)
            }
            Err(e) => warn!("S{}N{} {} from N{}: {}", self.shard_id, self.node_id, kind, from, e),
        }
    }

    fn dispatch(&self, outbound: Vec<Outbound>) {
        for Outbound { to, message } in outbound {
            let destination = match to {
                Recipient::Committee => Destination::Committee(self.shard_id),
                Recipient::Node(node_id) => {
                    Destination::Endpoint(Endpoint::node(self.shard_id, node_id))
                }
            };
            let kind = message.kind();
            if let Err(e) = self
                .hub
                .send(self.endpoint, destination, NetworkMessage::Pbft(message))
            {
                warn!("S{}N{} failed to send {}: {}", self.shard_id, self.node_id, kind, e);
            }
        }
    }
}
