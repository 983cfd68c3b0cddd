//! Consensus error types

use chain_core::{Hash, NodeId, SeqId};
use thiserror::Error;

/// Consensus error type. Every variant is local to the message that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Carried digest differs from the recomputed one
    #[error("Digest mismatch for seq {seq_id}")]
    DigestMismatch { seq_id: SeqId },

    /// Message refers to a sequence this node already passed
    #[error("Stale sequence: local {local}, received {received}")]
    StaleSequence { local: SeqId, received: SeqId },

    /// This node is behind the message and cannot act on it yet
    #[error("Behind sequence: local {local}, received {received}")]
    BehindSequence { local: SeqId, received: SeqId },

    /// Message too far ahead of the local sequence to be buffered
    #[error("Sequence {received} is outside the window above {local}")]
    SequenceOutOfWindow { local: SeqId, received: SeqId },

    /// Vote for a digest that does not match the accepted proposal
    #[error("Unknown digest {digest} for seq {seq_id}")]
    UnknownDigest { seq_id: SeqId, digest: Hash },

    /// Leader-only operation attempted elsewhere
    #[error("Node {node_id} is not the leader (leader is {leader})")]
    NotLeader { node_id: NodeId, leader: NodeId },

    /// Message sender does not match the claimed or expected sender
    #[error("Unexpected sender: expected {expected}, got {actual}")]
    UnexpectedSender { expected: NodeId, actual: NodeId },

    /// A proposal is already waiting for its replies
    #[error("Round {seq_id} is still in flight")]
    RoundInFlight { seq_id: SeqId },

    /// Second, different proposal for a sequence
    #[error("Conflicting proposal for seq {seq_id}")]
    ConflictingProposal { seq_id: SeqId },

    /// Round handler refused the proposal
    #[error("Proposal for seq {seq_id} rejected")]
    ProposalRejected { seq_id: SeqId },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConsensusError {
    /// Expected during normal operation; logged at debug level only
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            ConsensusError::StaleSequence { .. }
                | ConsensusError::BehindSequence { .. }
                | ConsensusError::SequenceOutOfWindow { .. }
        )
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(ConsensusError::StaleSequence {
            local: 8,
            received: 7
        }
        .is_benign());
        assert!(!ConsensusError::DigestMismatch { seq_id: 7 }.is_benign());
        assert!(!ConsensusError::NotLeader {
            node_id: 1,
            leader: 0
        }
        .is_benign());
    }
}
