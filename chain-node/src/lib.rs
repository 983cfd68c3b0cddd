//! Shard committee runtime
//!
//! This crate wires the pool, executor and consensus engine of one shard
//! into a running committee:
//! - `ConsensusNode` drives a `PbftEngine` over the message hub
//! - `BlockProducer` turns pool batches into committed blocks
//! - `BlockChain` and `LocalBeaconChain` record the results
//! - `Committee` starts everything and exposes the reset hooks

pub mod beacon;
pub mod chain;
pub mod committee;
pub mod config;
pub mod consensus;
pub mod error;
pub mod producer;
pub mod validator;

pub use beacon::{ConfirmationOracle, ConfirmedBeacon, LocalBeaconChain, TimeBeacon};
pub use chain::BlockChain;
pub use committee::Committee;
pub use config::{CommitteeConfig, MIN_RECOMMIT_INTERVAL};
pub use consensus::ConsensusNode;
pub use error::{NodeError, NodeResult};
pub use producer::BlockProducer;
pub use validator::BlockValidator;
