//! Time beacon oracle
//!
//! Every committed shard block is anchored by a beacon. The confirmation
//! time stamped by the oracle is the reference clock for cross-shard
//! rollback windows.

use crate::{NodeError, NodeResult};
use chain_core::{BlockNumber, Clock, Hash, ShardId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Commitment to one shard block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBeacon {
    pub shard_id: ShardId,
    pub height: BlockNumber,
    pub block_hash: Hash,
    pub tx_root: Hash,
    pub state_root: Hash,
}

/// Beacon recorded by the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBeacon {
    pub beacon: TimeBeacon,
    pub confirm_time: Timestamp,
    /// Height of the oracle's own chain when the beacon was recorded
    pub beacon_height: u64,
}

/// Durable record of shard block confirmations
pub trait ConfirmationOracle: Send + Sync {
    /// Record the beacon of a shard's next block
    fn submit(&self, beacon: TimeBeacon) -> NodeResult<ConfirmedBeacon>;

    fn confirmed(&self, shard_id: ShardId, height: BlockNumber) -> Option<ConfirmedBeacon>;

    /// Highest confirmed height of a shard, if any beacon was recorded
    fn latest_height(&self, shard_id: ShardId) -> Option<BlockNumber>;
}

#[derive(Debug, Default)]
struct BeaconState {
    /// Per shard, indexed by `height - 1`
    shards: HashMap<ShardId, Vec<ConfirmedBeacon>>,
    height: u64,
}

/// In-process oracle that confirms beacons as they are submitted
#[derive(Debug)]
pub struct LocalBeaconChain {
    clock: Arc<dyn Clock>,
    state: RwLock<BeaconState>,
}

impl LocalBeaconChain {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RwLock::new(BeaconState::default()),
        }
    }

    /// Beacons recorded across all shards
    pub fn height(&self) -> u64 {
        self.state.read().height
    }
}

impl ConfirmationOracle for LocalBeaconChain {
    fn submit(&self, beacon: TimeBeacon) -> NodeResult<ConfirmedBeacon> {
        let mut state = self.state.write();
        let next_height = state.height + 1;
        let recorded = state.shards.entry(beacon.shard_id).or_default();

        let expected = recorded.len() as BlockNumber + 1;
        if beacon.height != expected {
            return Err(NodeError::Beacon(format!(
                "Shard {} beacon at height {}, expected {}",
                beacon.shard_id, beacon.height, expected
            )));
        }

        let confirmed = ConfirmedBeacon {
            beacon,
            confirm_time: self.clock.now(),
            beacon_height: next_height,
        };
        recorded.push(confirmed.clone());
        state.height = next_height;

        debug!(
            "Beacon #{} confirmed S{} height {} at {}",
            confirmed.beacon_height,
            confirmed.beacon.shard_id,
            confirmed.beacon.height,
            confirmed.confirm_time
        );
        Ok(confirmed)
    }

    fn confirmed(&self, shard_id: ShardId, height: BlockNumber) -> Option<ConfirmedBeacon> {
        let index = usize::try_from(height.checked_sub(1)?).ok()?;
        self.state.read().shards.get(&shard_id)?.get(index).cloned()
    }

    fn latest_height(&self, shard_id: ShardId) -> Option<BlockNumber> {
        self.state
            .read()
            .shards
            .get(&shard_id)
            .and_then(|recorded| recorded.last())
            .map(|confirmed| confirmed.beacon.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::ManualClock;

    fn beacon(shard_id: ShardId, height: BlockNumber) -> TimeBeacon {
        TimeBeacon {
            shard_id,
            height,
            block_hash: Hash::keccak(&height.to_be_bytes()),
            tx_root: Hash::zero(),
            state_root: Hash::zero(),
        }
    }

    #[test]
    fn test_submit_and_query() {
        let clock = Arc::new(ManualClock::new(100));
        let chain = LocalBeaconChain::new(clock.clone());
        assert_eq!(chain.latest_height(0), None);

        let first = chain.submit(beacon(0, 1)).unwrap();
        assert_eq!(first.confirm_time, 100);
        assert_eq!(first.beacon_height, 1);

        clock.advance(3);
        chain.submit(beacon(1, 1)).unwrap();
        let second = chain.submit(beacon(0, 2)).unwrap();
        assert_eq!(second.confirm_time, 103);
        assert_eq!(second.beacon_height, 3);

        assert_eq!(chain.latest_height(0), Some(2));
        assert_eq!(chain.latest_height(1), Some(1));
        assert_eq!(chain.confirmed(0, 1), Some(first));
        assert_eq!(chain.confirmed(0, 0), None);
        assert_eq!(chain.confirmed(0, 3), None);
        assert_eq!(chain.height(), 3);
    }

    #[test]
    fn test_height_continuity() {
        let chain = LocalBeaconChain::new(Arc::new(ManualClock::new(0)));
        assert!(matches!(chain.submit(beacon(0, 2)), Err(NodeError::Beacon(_))));
        chain.submit(beacon(0, 1)).unwrap();
        assert!(matches!(chain.submit(beacon(0, 1)), Err(NodeError::Beacon(_))));
        assert_eq!(chain.height(), 1);
    }
}
