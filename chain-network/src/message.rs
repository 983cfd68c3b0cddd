//! Network message types and protocols

use chain_core::{InjectTransaction, PbftMessage, ReceiptBatch};
use serde::{Deserialize, Serialize};

/// Protocol identifiers
pub mod protocols {
    /// Committee consensus traffic
    pub const PBFT: &str = "/chain/pbft/1.0.0";
    /// Client transaction submission
    pub const TX_INJECT: &str = "/chain/tx/inject/1.0.0";
    /// Receipts from a committee to a client
    pub const TX_RECEIPT: &str = "/chain/tx/receipt/1.0.0";
}

/// Everything an endpoint can receive
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum NetworkMessage {
    /// Consensus message between members of one committee
    Pbft(PbftMessage),
    /// Transactions for a shard's pool
    InjectTransactions(InjectTransaction),
    /// Per-block receipts for one client
    TxReceipts(ReceiptBatch),
}

impl NetworkMessage {
    /// Protocol this message travels on
    pub fn message_type(&self) -> &'static str {
        match self {
            NetworkMessage::Pbft(_) => protocols::PBFT,
            NetworkMessage::InjectTransactions(_) => protocols::TX_INJECT,
            NetworkMessage::TxReceipts(_) => protocols::TX_RECEIPT,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkMessage::Pbft(msg) => msg.kind(),
            NetworkMessage::InjectTransactions(_) => "inject",
            NetworkMessage::TxReceipts(_) => "receipts",
        }
    }

    /// Canonical wire encoding
    pub fn encode(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let (message, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(message)
    }
}

/// Message size limits
pub mod limits {
    /// Maximum encoded message size (8 MB)
    pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;
}
