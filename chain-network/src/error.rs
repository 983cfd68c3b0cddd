//! Network error types

use crate::hub::Endpoint;
use chain_core::ShardId;
use thiserror::Error;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(Endpoint),

    #[error("No leader registered for shard {0}")]
    NoLeader(ShardId),

    #[error("Inbox of {0} is closed")]
    ChannelClosed(Endpoint),

    #[error("Message encoding error: {0}")]
    Encoding(String),

    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::error::EncodeError> for NetworkError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NetworkError::Encoding(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for NetworkError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NetworkError::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Config(err.to_string())
    }
}
