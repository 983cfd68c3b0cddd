//! Client error types

use chain_network::NetworkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workload error: {0}")]
    Workload(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
