//! VM error types

use chain_core::{CoreError, TxId};
use thiserror::Error;

/// VM error type
#[derive(Error, Debug, Clone)]
pub enum VmError {
    /// Transaction shape the executor cannot interpret
    #[error("Malformed transaction {tx_id}: {reason}")]
    MalformedTransaction { tx_id: TxId, reason: String },

    /// Insufficient balance
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    /// Balance would overflow
    #[error("Balance overflow: {balance} + {amount}")]
    BalanceOverflow { balance: u128, amount: u128 },

    /// Nonce cannot be decremented below zero
    #[error("Nonce underflow")]
    NonceUnderflow,

    /// State error
    #[error("State error: {0}")]
    State(String),
}

impl From<CoreError> for VmError {
    fn from(err: CoreError) -> Self {
        VmError::State(err.to_string())
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
