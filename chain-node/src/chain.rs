//! In-memory shard chain

use crate::{NodeError, NodeResult};
use chain_core::{Block, BlockNumber, Hash, ShardId};
use tracing::debug;

/// Committed blocks of one shard, starting at genesis
#[derive(Debug)]
pub struct BlockChain {
    shard_id: ShardId,
    blocks: Vec<Block>,
    head_hash: Hash,
}

impl BlockChain {
    pub fn new(shard_id: ShardId) -> NodeResult<Self> {
        let genesis = Block::genesis(shard_id);
        let head_hash = genesis.hash()?;
        Ok(Self {
            shard_id,
            blocks: vec![genesis],
            head_hash,
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Height of the head block; genesis is 0
    pub fn height(&self) -> BlockNumber {
        (self.blocks.len() - 1) as BlockNumber
    }

    pub fn head_hash(&self) -> Hash {
        self.head_hash
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn block(&self, number: BlockNumber) -> Option<&Block> {
        self.blocks.get(number as usize)
    }

    /// Check that `block` extends the head, returning its hash
    pub fn validate_next(&self, block: &Block) -> NodeResult<Hash> {
        if block.header.shard_id != self.shard_id {
            return Err(NodeError::Chain(format!(
                "Block for shard {} offered to shard {}",
                block.header.shard_id, self.shard_id
            )));
        }

        let expected = self.height() + 1;
        if block.number() != expected {
            return Err(NodeError::Chain(format!(
                "Expected block {}, got {}",
                expected,
                block.number()
            )));
        }

        if block.header.parent_hash != self.head_hash {
            return Err(NodeError::Chain(format!(
                "Block {} does not extend head {}",
                block.number(),
                self.head_hash.short()
            )));
        }

        if !block.has_valid_transactions_root()? {
            return Err(NodeError::Chain(format!(
                "Block {} has an invalid transactions root",
                block.number()
            )));
        }

        Ok(block.hash()?)
    }

    /// Append the next block after checking it extends the head
    pub fn append(&mut self, block: Block) -> NodeResult<Hash> {
        let hash = self.validate_next(&block)?;
        debug!("S{} chain head {} -> {}", self.shard_id, block.number(), hash.short());
        self.head_hash = hash;
        self.blocks.push(block);
        Ok(hash)
    }
}
