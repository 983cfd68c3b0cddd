//! PBFT committee configuration

use crate::{ConsensusError, ConsensusResult};
use chain_core::{NodeId, SeqId};
use serde::{Deserialize, Serialize};

/// Smallest committee that tolerates one faulty node
pub const MIN_COMMITTEE_SIZE: usize = 4;

/// PBFT committee configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PbftConfig {
    /// Committee size `N`
    pub node_count: usize,
    /// Current view; the leader is the node with this id
    pub view: NodeId,
    /// Smallest accepted committee size
    pub min_committee_size: usize,
    /// Sequences above the local one whose messages are buffered
    pub lookahead: SeqId,
    /// Rounds kept below the local sequence for serving catch-up
    pub retained_rounds: SeqId,
}

impl Default for PbftConfig {
    fn default() -> Self {
        Self {
            node_count: MIN_COMMITTEE_SIZE,
            view: 0,
            min_committee_size: MIN_COMMITTEE_SIZE,
            lookahead: 64,
            retained_rounds: 256,
        }
    }
}

impl PbftConfig {
    /// Create a configuration for a committee of `node_count` nodes
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            ..Self::default()
        }
    }

    /// Set the view
    pub fn with_view(mut self, view: NodeId) -> Self {
        self.view = view;
        self
    }

    pub fn with_window(mut self, lookahead: SeqId, retained_rounds: SeqId) -> Self {
        self.lookahead = lookahead;
        self.retained_rounds = retained_rounds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.min_committee_size < MIN_COMMITTEE_SIZE {
            return Err(ConsensusError::Config(format!(
                "Minimum committee size must be at least {}",
                MIN_COMMITTEE_SIZE
            )));
        }

        if self.node_count < self.min_committee_size {
            return Err(ConsensusError::Config(format!(
                "Committee of {} nodes is below the minimum of {}",
                self.node_count, self.min_committee_size
            )));
        }

        if self.lookahead == 0 || self.retained_rounds == 0 {
            return Err(ConsensusError::Config(
                "Lookahead and retained rounds must be greater than 0".to_string(),
            ));
        }

        if self.view as usize >= self.node_count {
            return Err(ConsensusError::Config(format!(
                "View {} is outside a committee of {} nodes",
                self.view, self.node_count
            )));
        }

        Ok(())
    }

    /// Maximum number of faulty nodes tolerated, `f` in `N >= 3f + 1`
    pub fn faulty(&self) -> usize {
        self.node_count.saturating_sub(1) / 3
    }

    /// Matching prepares needed before committing. The leader does not
    /// prepare, so a replica counts its own vote plus `2f - 1` others.
    pub fn prepare_quorum(&self) -> usize {
        2 * self.faulty()
    }

    /// Matching commits, own vote included, needed to finalize
    pub fn commit_quorum(&self) -> usize {
        2 * self.faulty() + 1
    }

    /// Replies the leader needs besides its own
    pub fn reply_quorum(&self) -> usize {
        2 * self.faulty()
    }

    pub fn leader(&self) -> NodeId {
        self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PbftConfig::default();
        assert_eq!(config.node_count, 4);
        assert_eq!(config.leader(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quorums() {
        let config = PbftConfig::new(4);
        assert_eq!(config.faulty(), 1);
        assert_eq!(config.prepare_quorum(), 2);
        assert_eq!(config.commit_quorum(), 3);
        assert_eq!(config.reply_quorum(), 2);

        let config = PbftConfig::new(7);
        assert_eq!(config.faulty(), 2);
        assert_eq!(config.commit_quorum(), 5);

        // 5 and 6 nodes still tolerate a single fault
        assert_eq!(PbftConfig::new(6).faulty(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(PbftConfig::new(3).validate().is_err());
        assert!(PbftConfig::new(4).with_view(4).validate().is_err());
        assert!(PbftConfig::new(4).with_view(3).validate().is_ok());

        let config = PbftConfig {
            min_committee_size: 2,
            ..PbftConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(PbftConfig::default().with_window(0, 8).validate().is_err());
        assert!(PbftConfig::default().with_window(8, 0).validate().is_err());
    }

    #[test]
    fn test_missing_window_fields_take_defaults() {
        let config: PbftConfig =
            serde_json::from_str(r#"{"node_count": 7, "view": 1, "min_committee_size": 4}"#)
                .unwrap();
        assert_eq!(config.node_count, 7);
        assert_eq!(config.lookahead, PbftConfig::default().lookahead);
        assert_eq!(config.retained_rounds, PbftConfig::default().retained_rounds);
    }

    #[test]
    fn test_config_serialization() {
        let config = PbftConfig::new(7).with_view(2);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PbftConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
