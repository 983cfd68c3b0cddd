//! Committee consensus engine
//!
//! This crate provides the PBFT state machine a shard committee uses to
//! order blocks: digest checking, per-sequence vote sets, quorum counting
//! and catch-up of lagging replicas.

pub mod error;
pub mod pbft;
pub mod traits;

pub use error::{ConsensusError, ConsensusResult};
pub use pbft::{
    ConsensusRound, Outbound, PbftConfig, PbftEngine, Recipient, RoundPhase, MIN_COMMITTEE_SIZE,
};
pub use traits::{NoopRoundHandler, RoundHandler};
