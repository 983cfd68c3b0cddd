//! Committee configuration

use crate::{NodeError, NodeResult};
use chain_consensus::{PbftConfig, MIN_COMMITTEE_SIZE};
use chain_vm::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Shortest recommit interval the producer accepts
pub const MIN_RECOMMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Committee configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitteeConfig {
    /// Nodes per committee
    pub committee_size: usize,
    /// Time between block production attempts
    pub recommit_interval_ms: u64,
    /// Maximum transactions per block
    pub max_block_size: usize,
    /// Extra seconds the executor allows a phase-two transaction past its window
    pub phase2_grace_secs: u64,
    /// Smallest accepted committee
    pub min_committee_size: usize,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            committee_size: 4,
            recommit_interval_ms: 500,
            max_block_size: 200,
            phase2_grace_secs: 5,
            min_committee_size: MIN_COMMITTEE_SIZE,
        }
    }
}

impl CommitteeConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> NodeResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: CommitteeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> NodeResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| NodeError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> NodeResult<()> {
        self.pbft_config().validate()?;

        if self.max_block_size == 0 {
            return Err(NodeError::Config(
                "Max block size must be greater than 0".to_string(),
            ));
        }

        if self.recommit_interval_ms == 0 {
            return Err(NodeError::Config(
                "Recommit interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Recommit interval, raised to the floor if set below it
    pub fn recommit_interval(&self) -> Duration {
        let interval = Duration::from_millis(self.recommit_interval_ms);
        if interval < MIN_RECOMMIT_INTERVAL {
            warn!(
                "Recommit interval {:?} too short, using {:?}",
                interval, MIN_RECOMMIT_INTERVAL
            );
            return MIN_RECOMMIT_INTERVAL;
        }
        interval
    }

    /// Consensus configuration of this committee; node 0 leads
    pub fn pbft_config(&self) -> PbftConfig {
        PbftConfig {
            node_count: self.committee_size,
            view: 0,
            min_committee_size: self.min_committee_size,
            ..PbftConfig::default()
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            phase2_grace_secs: self.phase2_grace_secs,
        }
    }

    /// Set committee size
    pub fn with_committee_size(mut self, size: usize) -> Self {
        self.committee_size = size;
        self
    }

    /// Set recommit interval
    pub fn with_recommit_interval_ms(mut self, interval_ms: u64) -> Self {
        self.recommit_interval_ms = interval_ms;
        self
    }

    /// Set max block size
    pub fn with_max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = size;
        self
    }

    pub fn with_phase2_grace_secs(mut self, secs: u64) -> Self {
        self.phase2_grace_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CommitteeConfig::default();
        assert_eq!(config.committee_size, 4);
        assert!(config.validate().is_ok());
        assert_eq!(config.pbft_config().commit_quorum(), 3);
        assert_eq!(config.executor_config().phase2_grace_secs, 5);
    }

    #[test]
    fn test_config_validation() {
        assert!(CommitteeConfig::default()
            .with_committee_size(3)
            .validate()
            .is_err());
        assert!(CommitteeConfig::default()
            .with_max_block_size(0)
            .validate()
            .is_err());
        assert!(CommitteeConfig::default()
            .with_recommit_interval_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_recommit_interval_floor() {
        let config = CommitteeConfig::default().with_recommit_interval_ms(10);
        assert_eq!(config.recommit_interval(), MIN_RECOMMIT_INTERVAL);

        let config = CommitteeConfig::default().with_recommit_interval_ms(250);
        assert_eq!(config.recommit_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_file_operations() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("committee.json");

        let config = CommitteeConfig::default()
            .with_committee_size(7)
            .with_max_block_size(50);
        config.save_to_file(&file_path).unwrap();

        let loaded = CommitteeConfig::load_from_file(&file_path).unwrap();
        assert_eq!(config, loaded);
    }
}
