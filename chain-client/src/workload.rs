//! Seeded transfer workload

use crate::{ClientError, ClientResult};
use chain_core::{shard_of, Address, Balance, ClientId, Nonce, ShardId, Transaction, TxId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shape of the generated workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub shard_count: u32,
    pub accounts_per_shard: u64,
    pub transaction_count: usize,
    /// Probability that a transfer leaves the sender's shard
    pub cross_shard_ratio: f64,
    pub max_value: Balance,
    pub rollback_window_secs: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            shard_count: 2,
            accounts_per_shard: 16,
            transaction_count: 100,
            cross_shard_ratio: 0.5,
            max_value: 10,
            rollback_window_secs: 20,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> ClientResult<()> {
        if self.shard_count == 0 || self.accounts_per_shard == 0 {
            return Err(ClientError::Workload(
                "Workload needs at least one shard and one account per shard".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cross_shard_ratio) {
            return Err(ClientError::Workload(format!(
                "Cross-shard ratio {} is outside [0, 1]",
                self.cross_shard_ratio
            )));
        }
        if self.max_value == 0 {
            return Err(ClientError::Workload(
                "Max value must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Address of the `index`-th simulation account of `shard_id`
pub fn account_address(shard_id: ShardId, index: u64, shard_count: u32) -> Address {
    Address::from_index(index * u64::from(shard_count.max(1)) + u64::from(shard_id))
}

/// Every simulation account of one shard
pub fn shard_accounts(shard_id: ShardId, accounts_per_shard: u64, shard_count: u32) -> Vec<Address> {
    (0..accounts_per_shard)
        .map(|index| account_address(shard_id, index, shard_count))
        .collect()
}

/// Deterministic transfer generator for one client
#[derive(Debug)]
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: StdRng,
    nonces: HashMap<Address, Nonce>,
}

impl WorkloadGenerator {
    pub fn new(config: WorkloadConfig, seed: u64) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            nonces: HashMap::new(),
        })
    }

    /// Generate the whole workload of `client_id`. Ids are unique across clients.
    pub fn generate(&mut self, client_id: ClientId) -> Vec<Transaction> {
        let base = TxId::from(client_id) << 32;
        (0..self.config.transaction_count as TxId)
            .map(|n| self.next_transfer(base + n, client_id))
            .collect()
    }

    fn next_transfer(&mut self, id: TxId, owner: ClientId) -> Transaction {
        let shard_count = self.config.shard_count;
        let accounts = self.config.accounts_per_shard;

        let sender_shard = self.rng.random_range(0..shard_count);
        let sender_index = self.rng.random_range(0..accounts);
        let sender = account_address(sender_shard, sender_index, shard_count);

        let cross = shard_count > 1 && self.rng.random_bool(self.config.cross_shard_ratio);
        let recipient = if cross {
            let offset = self.rng.random_range(1..shard_count);
            let recipient_shard = (sender_shard + offset) % shard_count;
            account_address(recipient_shard, self.rng.random_range(0..accounts), shard_count)
        } else if accounts > 1 {
            let offset = self.rng.random_range(1..accounts);
            account_address(sender_shard, (sender_index + offset) % accounts, shard_count)
        } else {
            sender
        };

        let value = self.rng.random_range(1..=self.config.max_value);
        let nonce = self.nonces.entry(sender).or_default();
        let sender_nonce = *nonce;
        *nonce += 1;

        Transaction::transfer(
            id,
            sender,
            recipient,
            shard_of(&sender, shard_count),
            shard_of(&recipient, shard_count),
            value,
            sender_nonce,
            owner,
            self.config.rollback_window_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::TxType;
    use proptest::prelude::*;

    #[test]
    fn test_account_addresses_land_in_their_shard() {
        for shard_id in 0..3 {
            for address in shard_accounts(shard_id, 5, 3) {
                assert_eq!(shard_of(&address, 3), shard_id);
            }
        }
    }

    #[test]
    fn test_same_seed_same_workload() {
        let config = WorkloadConfig::default();
        let a = WorkloadGenerator::new(config.clone(), 42).unwrap().generate(1);
        let b = WorkloadGenerator::new(config, 42).unwrap().generate(1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
    }

    #[test]
    fn test_ratio_extremes() {
        let intra_only = WorkloadConfig {
            cross_shard_ratio: 0.0,
            ..WorkloadConfig::default()
        };
        let txs = WorkloadGenerator::new(intra_only, 1).unwrap().generate(0);
        assert!(txs.iter().all(|tx| tx.tx_type == TxType::Intra));

        let cross_only = WorkloadConfig {
            cross_shard_ratio: 1.0,
            ..WorkloadConfig::default()
        };
        let txs = WorkloadGenerator::new(cross_only, 1).unwrap().generate(0);
        assert!(txs.iter().all(|tx| tx.tx_type == TxType::CrossPhase1));
    }

    #[test]
    fn test_invalid_config() {
        let config = WorkloadConfig {
            cross_shard_ratio: 1.5,
            ..WorkloadConfig::default()
        };
        assert!(WorkloadGenerator::new(config, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_transfers_are_well_formed(
            seed in any::<u64>(),
            shard_count in 1u32..5,
            client_id in 0u32..4,
        ) {
            let config = WorkloadConfig {
                shard_count,
                transaction_count: 30,
                ..WorkloadConfig::default()
            };
            let txs = WorkloadGenerator::new(config, seed).unwrap().generate(client_id);

            let mut nonces: HashMap<Address, Nonce> = HashMap::new();
            for (n, tx) in txs.iter().enumerate() {
                prop_assert_eq!(tx.id, (TxId::from(client_id) << 32) + n as TxId);
                prop_assert_eq!(tx.owner, client_id);
                prop_assert_eq!(tx.sender_shard, shard_of(&tx.sender, shard_count));
                prop_assert_eq!(tx.recipient_shard, shard_of(&tx.recipient, shard_count));
                prop_assert!(tx.value >= 1 && tx.value <= 10);

                let expected = nonces.entry(tx.sender).or_default();
                prop_assert_eq!(tx.sender_nonce, *expected);
                *expected += 1;
            }
        }
    }
}
