//! Per-shard transaction pool
//!
//! Admission never blocks or rejects. Draws yield rollback transactions
//! before anything else and filter out phase-two transactions whose
//! rollback window has closed.

pub mod pool;

pub use pool::{Batch, TxPool};
