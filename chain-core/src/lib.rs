//! Core data structures for the sharded chain
//!
//! This crate provides the building blocks shared by every shard component:
//! - Basic types (Hash, Address, shard/node/transaction ids, Clock)
//! - Transaction, status lifecycle and receipts
//! - Block structures
//! - Consensus payloads and the canonical request digest

pub mod block;
pub mod error;
pub mod message;
pub mod receipt;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use block::*;
pub use error::*;
pub use message::*;
pub use receipt::*;
pub use transaction::*;
pub use types::*;
