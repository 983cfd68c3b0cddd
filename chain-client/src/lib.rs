//! Client side of the sharded chain
//!
//! A client generates a transfer workload, injects it into the shard
//! leaders and drives every cross-shard transfer to completion:
//! - `CrossShardTracker` holds the state of each transfer
//! - `Client` runs the injection, dispatch, expiry and receipt loops
//! - `OutcomeReport` summarizes what happened

pub mod client;
pub mod config;
pub mod error;
pub mod report;
pub mod tracker;
pub mod workload;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use report::{LatencyStats, OutcomeReport};
pub use tracker::{CrossShardTracker, TransferState};
pub use workload::{account_address, shard_accounts, WorkloadConfig, WorkloadGenerator};
