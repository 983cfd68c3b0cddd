//! Client configuration

use crate::{ClientError, ClientResult};
use chain_core::ClientId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client_id: ClientId,
    /// Transactions per inject tick, and the per-class cap of a dispatch tick
    pub inject_speed: usize,
    pub inject_interval_ms: u64,
    /// Timer of the phase-two and rollback dispatcher
    pub dispatch_interval_ms: u64,
    /// Timer of the expiry scanner
    pub scan_interval_ms: u64,
    /// Seconds a phase-one confirmation leaves for phase two
    pub rollback_window_secs: u64,
    /// Extra seconds the scanner waits past the window before rolling back
    pub rollback_scan_grace_secs: u64,
    pub shard_count: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: 0,
            inject_speed: 100,
            inject_interval_ms: 1000,
            dispatch_interval_ms: 1000,
            scan_interval_ms: 1000,
            rollback_window_secs: 20,
            rollback_scan_grace_secs: 2,
            shard_count: 2,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: ClientId, shard_count: u32) -> Self {
        Self {
            client_id,
            shard_count,
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {}", e)))?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ClientResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ClientError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.inject_speed == 0 {
            return Err(ClientError::Config(
                "Inject speed must be greater than 0".to_string(),
            ));
        }
        if self.inject_interval_ms == 0
            || self.dispatch_interval_ms == 0
            || self.scan_interval_ms == 0
        {
            return Err(ClientError::Config(
                "Client timer intervals must be greater than 0".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(ClientError::Config(
                "Shard count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn inject_interval(&self) -> Duration {
        Duration::from_millis(self.inject_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn with_inject_speed(mut self, speed: usize) -> Self {
        self.inject_speed = speed;
        self
    }

    /// Set all three timers at once
    pub fn with_intervals_ms(mut self, interval_ms: u64) -> Self {
        self.inject_interval_ms = interval_ms;
        self.dispatch_interval_ms = interval_ms;
        self.scan_interval_ms = interval_ms;
        self
    }

    pub fn with_rollback_window(mut self, window_secs: u64, grace_secs: u64) -> Self {
        self.rollback_window_secs = window_secs;
        self.rollback_scan_grace_secs = grace_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.rollback_window_secs, 20);
        assert_eq!(config.rollback_scan_grace_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::default().with_inject_speed(0).validate().is_err());
        assert!(ClientConfig::default().with_intervals_ms(0).validate().is_err());
        assert!(ClientConfig::new(1, 0).validate().is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");

        let config = ClientConfig::new(3, 4)
            .with_inject_speed(7)
            .with_rollback_window(5, 1);
        config.save_to_file(&path).unwrap();
        assert_eq!(ClientConfig::load_from_file(&path).unwrap(), config);
    }
}
