//! Shard ledger and transaction execution
//!
//! This crate provides the account model, the in-memory shard ledger with
//! fork/commit support, and the executor that applies intra-shard,
//! cross-shard and rollback transfers.

pub mod account;
pub mod error;
pub mod executor;
pub mod state;

pub use account::Account;
pub use error::{VmError, VmResult};
pub use executor::{ExecutionResult, ExecutorConfig, StateChange, StateExecutor};
pub use state::{Ledger, LedgerFork, MemoryLedger, SharedLedger};
