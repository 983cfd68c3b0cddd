//! Simulation error types

use chain_client::ClientError;
use chain_network::NetworkError;
use chain_node::NodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Settings encoding error: {0}")]
    Encoding(#[from] toml::ser::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

pub type SimulationResult<T> = Result<T, SimulationError>;
