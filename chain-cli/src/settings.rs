//! Simulation settings
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then `SHARDSIM__*` environment variables (`__` separates nested keys,
//! e.g. `SHARDSIM__COMMITTEE__MAX_BLOCK_SIZE=50`).

use crate::{SimulationError, SimulationResult};
use chain_client::{ClientConfig, WorkloadConfig};
use chain_node::CommitteeConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "SHARDSIM";

/// Everything one simulation run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub shard_count: u32,
    pub client_count: u32,
    pub txs_per_client: usize,
    pub cross_shard_ratio: f64,
    pub accounts_per_shard: u64,
    pub initial_balance: u64,
    pub max_value: u64,
    pub seed: u64,
    /// Give up waiting for the clients after this long
    pub max_duration_secs: u64,
    /// Route every message through its wire encoding
    pub encode_messages: bool,
    pub committee: CommitteeConfig,
    /// Template for every client; id and shard count are filled in per client
    pub client: ClientConfig,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            shard_count: 2,
            client_count: 2,
            txs_per_client: 200,
            cross_shard_ratio: 0.5,
            accounts_per_shard: 32,
            initial_balance: 1_000_000,
            max_value: 100,
            seed: 7,
            max_duration_secs: 120,
            encode_messages: true,
            committee: CommitteeConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl SimulationSettings {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> SimulationResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like `load`, reading overrides from `env` instead of the process
    /// environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> SimulationResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: SimulationSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> SimulationResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> SimulationResult<()> {
        if self.shard_count == 0 || self.client_count == 0 {
            return Err(SimulationError::Invalid(
                "Need at least one shard and one client".to_string(),
            ));
        }
        if self.max_duration_secs == 0 {
            return Err(SimulationError::Invalid(
                "Max duration must be greater than 0".to_string(),
            ));
        }
        self.committee.validate()?;
        self.client_config(0).validate()?;
        self.workload_config().validate()?;
        Ok(())
    }

    pub fn client_config(&self, client_id: u32) -> ClientConfig {
        ClientConfig {
            client_id,
            shard_count: self.shard_count,
            ..self.client.clone()
        }
    }

    pub fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            shard_count: self.shard_count,
            accounts_per_shard: self.accounts_per_shard,
            transaction_count: self.txs_per_client,
            cross_shard_ratio: self.cross_shard_ratio,
            max_value: u128::from(self.max_value),
            rollback_window_secs: self.client.rollback_window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = SimulationSettings::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(settings, SimulationSettings::default());
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shardsim.toml");
        fs::write(
            &path,
            "shard_count = 3\nseed = 11\n\n[committee]\nmax_block_size = 50\n",
        )
        .unwrap();

        let env = HashMap::from([
            ("SHARDSIM__SEED".to_string(), "99".to_string()),
            (
                "SHARDSIM__CLIENT__ROLLBACK_WINDOW_SECS".to_string(),
                "5".to_string(),
            ),
        ]);
        let settings = SimulationSettings::load_with_env(Some(&path), Some(env)).unwrap();

        assert_eq!(settings.shard_count, 3);
        assert_eq!(settings.seed, 99);
        assert_eq!(settings.committee.max_block_size, 50);
        assert_eq!(settings.committee.committee_size, 4);
        assert_eq!(settings.client.rollback_window_secs, 5);
        assert_eq!(settings.workload_config().rollback_window_secs, 5);
    }

    #[test]
    fn test_default_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, SimulationSettings::default().to_toml().unwrap()).unwrap();

        let settings = SimulationSettings::load_with_env(Some(&path), Some(HashMap::new())).unwrap();
        assert_eq!(settings, SimulationSettings::default());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let env = HashMap::from([("SHARDSIM__COMMITTEE__COMMITTEE_SIZE".to_string(), "2".to_string())]);
        assert!(SimulationSettings::load_with_env(None, Some(env)).is_err());
    }
}
