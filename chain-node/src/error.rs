//! Node error types

use chain_consensus::ConsensusError;
use chain_core::{CoreError, SeqId};
use chain_network::NetworkError;
use chain_vm::VmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Execution error: {0}")]
    Vm(#[from] VmError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Beacon error: {0}")]
    Beacon(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Round {0} abandoned")]
    RoundAbandoned(SeqId),

    #[error("Committee is shutting down")]
    Shutdown,
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
