//! Practical Byzantine fault tolerant ordering for a shard committee

pub mod config;
pub mod engine;
pub mod round;

pub use config::{PbftConfig, MIN_COMMITTEE_SIZE};
pub use engine::PbftEngine;
pub use round::{ConsensusRound, RoundPhase};

use chain_core::{NodeId, PbftMessage};

/// Where an engine wants a message delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every other committee member
    Committee,
    /// A single committee member
    Node(NodeId),
}

/// Message produced by the engine for the transport to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: PbftMessage,
}

impl Outbound {
    pub fn broadcast(message: PbftMessage) -> Self {
        Self {
            to: Recipient::Committee,
            message,
        }
    }

    pub fn to_node(node: NodeId, message: PbftMessage) -> Self {
        Self {
            to: Recipient::Node(node),
            message,
        }
    }
}
