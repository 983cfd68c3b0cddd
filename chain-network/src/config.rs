//! Hub configuration

use crate::message::limits;
use crate::{NetworkError, NetworkResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Push every message through its wire encoding before delivery
    pub encode_messages: bool,

    /// Maximum encoded message size, checked when encoding is on
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            encode_messages: false,
            max_message_size: limits::MAX_MESSAGE_SIZE,
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, encode_messages: bool) -> Self {
        self.encode_messages = encode_messages;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn validate(&self) -> NetworkResult<()> {
        if self.max_message_size == 0 {
            return Err(NetworkError::Config(
                "Maximum message size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> NetworkResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| NetworkError::Config(format!("Failed to read config file: {}", e)))?;
        let config: HubConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> NetworkResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| NetworkError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert!(!config.encode_messages);
        assert_eq!(config.max_message_size, limits::MAX_MESSAGE_SIZE);
        assert!(config.validate().is_ok());
        assert!(HubConfig::new().with_max_message_size(0).validate().is_err());
    }

    #[test]
    fn test_file_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.json");

        let config = HubConfig::new().with_encoding(true).with_max_message_size(4096);
        config.save_to_file(&path).unwrap();
        assert_eq!(HubConfig::load_from_file(&path).unwrap(), config);
    }
}
