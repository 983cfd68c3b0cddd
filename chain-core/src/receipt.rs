//! Transaction receipts returned to clients

use crate::{BlockNumber, ClientId, ShardId, Timestamp, Transaction, TxId, TxStatus, TxType};
use serde::{Deserialize, Serialize};

/// Outcome of one transaction as seen by its owner
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TxReceipt {
    pub tx_id: TxId,
    pub tx_type: TxType,
    pub status: TxStatus,
    /// Oracle confirmation time of the block that settled the transaction
    pub confirm_time: Timestamp,
    pub block_height: BlockNumber,
    pub shard_id: ShardId,
}

impl TxReceipt {
    pub fn for_transaction(
        tx: &Transaction,
        shard_id: ShardId,
        block_height: BlockNumber,
        confirm_time: Timestamp,
    ) -> Self {
        Self {
            tx_id: tx.id,
            tx_type: tx.tx_type,
            status: tx.status,
            confirm_time,
            block_height,
            shard_id,
        }
    }
}

/// Receipts for one client, emitted per committed block
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ReceiptBatch {
    pub shard_id: ShardId,
    pub client_id: ClientId,
    pub receipts: Vec<TxReceipt>,
}

impl ReceiptBatch {
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}
