//! Block checks run by every replica before voting

use chain_consensus::RoundHandler;
use chain_core::{Block, NodeId, PbftRequest, RequestKind, SeqId, ShardId};
use tracing::{debug, warn};

/// Round handler that refuses proposals not carrying this shard's next block
#[derive(Debug, Clone)]
pub struct BlockValidator {
    shard_id: ShardId,
    node_id: NodeId,
}

impl BlockValidator {
    pub fn new(shard_id: ShardId, node_id: NodeId) -> Self {
        Self { shard_id, node_id }
    }

    fn check(&self, seq_id: SeqId, request: &PbftRequest) -> Result<(), String> {
        match request.kind {
            RequestKind::Block => {}
        }

        let block = Block::decode(&request.payload).map_err(|e| e.to_string())?;
        if block.header.shard_id != self.shard_id {
            return Err(format!("block belongs to shard {}", block.header.shard_id));
        }
        if block.number() != seq_id {
            return Err(format!("block {} proposed at seq {}", block.number(), seq_id));
        }
        if !block.has_valid_transactions_root().map_err(|e| e.to_string())? {
            return Err("transactions root mismatch".to_string());
        }
        Ok(())
    }
}

impl RoundHandler for BlockValidator {
    fn on_pre_prepare(&self, seq_id: SeqId, request: &PbftRequest) -> bool {
        match self.check(seq_id, request) {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    "S{}N{} refusing proposal for seq {}: {}",
                    self.shard_id, self.node_id, seq_id, reason
                );
                false
            }
        }
    }

    fn on_commit(&self, seq_id: SeqId, _request: &PbftRequest) {
        debug!("S{}N{} block {} final", self.shard_id, self.node_id, seq_id);
    }

    fn on_catch_up(&self, seq_id: SeqId, _request: &PbftRequest) {
        debug!("S{}N{} replayed block {}", self.shard_id, self.node_id, seq_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::{BlockHeader, Hash};

    fn request(shard_id: ShardId, number: u64) -> PbftRequest {
        let header = BlockHeader {
            shard_id,
            number,
            parent_hash: Hash::zero(),
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            timestamp: 1,
            proposer: 0,
        };
        PbftRequest::block(Block::new(header, Vec::new()).encode().unwrap(), 1)
    }

    #[test]
    fn test_accepts_next_block() {
        let validator = BlockValidator::new(1, 2);
        assert!(validator.on_pre_prepare(5, &request(1, 5)));
    }

    #[test]
    fn test_rejects_mismatches() {
        let validator = BlockValidator::new(1, 2);
        assert!(!validator.on_pre_prepare(5, &request(0, 5)));
        assert!(!validator.on_pre_prepare(6, &request(1, 5)));
        assert!(!validator.on_pre_prepare(1, &PbftRequest::block(vec![0xff; 3], 1)));
    }
}
