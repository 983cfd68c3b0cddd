//! Block data structures and operations

use crate::{BlockNumber, CoreResult, Hash, NodeId, ShardId, Timestamp, Transaction};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Block header containing metadata
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Shard this block belongs to
    pub shard_id: ShardId,
    /// Block number (height), equal to the consensus sequence id
    pub number: BlockNumber,
    /// Hash of the parent block
    pub parent_hash: Hash,
    /// Ledger root after executing the block
    pub state_root: Hash,
    /// Root over the transaction hashes
    pub transactions_root: Hash,
    /// Block timestamp in seconds
    pub timestamp: Timestamp,
    /// Committee node that proposed the block
    pub proposer: NodeId,
}

impl BlockHeader {
    /// Calculate the hash of this block header
    pub fn hash(&self) -> CoreResult<Hash> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())?;
        Ok(Hash::keccak(&encoded))
    }

    /// Genesis header of a shard
    pub fn genesis(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            number: 0,
            parent_hash: Hash::zero(),
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            timestamp: 0,
            proposer: 0,
        }
    }
}

/// Complete block with header and transactions
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Executed transactions, carrying their assigned status
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Create genesis block
    pub fn genesis(shard_id: ShardId) -> Self {
        Self {
            header: BlockHeader::genesis(shard_id),
            transactions: Vec::new(),
        }
    }

    /// Get the block hash (same as header hash)
    pub fn hash(&self) -> CoreResult<Hash> {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Calculate the transactions root hash
    pub fn calculate_transactions_root(transactions: &[Transaction]) -> CoreResult<Hash> {
        if transactions.is_empty() {
            return Ok(Hash::zero());
        }

        // Simple implementation: hash of concatenated transaction hashes
        let mut hasher = Keccak256::new();
        for tx in transactions {
            let tx_hash = tx.hash()?;
            hasher.update(tx_hash.as_bytes());
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(hasher.finalize().as_slice());
        Ok(Hash::new(bytes))
    }

    /// Check that the header commits to the carried transactions
    pub fn has_valid_transactions_root(&self) -> CoreResult<bool> {
        Ok(Self::calculate_transactions_root(&self.transactions)? == self.header.transactions_root)
    }

    /// Canonical payload used as a consensus request
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let (block, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(block)
    }

    /// Check if block is genesis
    pub fn is_genesis(&self) -> bool {
        self.header.number == 0 && self.header.parent_hash == Hash::zero()
    }
}
