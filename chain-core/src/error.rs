//! Error types for the core crate

use crate::{TxId, TxStatus};
use thiserror::Error;

/// Core errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Transaction {tx_id} already finalized as {status}")]
    StatusFinalized { tx_id: TxId, status: TxStatus },

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Bincode error: {0}")]
    Bincode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<bincode::error::EncodeError> for CoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CoreError::Bincode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for CoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CoreError::Deserialization(err.to_string())
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
