//! Message routing between committee nodes and clients

use crate::{HubConfig, NetworkError, NetworkMessage, NetworkResult};
use chain_core::{ClientId, NodeId, ShardId};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Addressable participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    Node { shard_id: ShardId, node_id: NodeId },
    Client(ClientId),
}

impl Endpoint {
    pub fn node(shard_id: ShardId, node_id: NodeId) -> Self {
        Endpoint::Node { shard_id, node_id }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Node { shard_id, node_id } => write!(f, "S{}N{}", shard_id, node_id),
            Endpoint::Client(client_id) => write!(f, "C{}", client_id),
        }
    }
}

/// Target of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Endpoint(Endpoint),
    /// Every registered member of a committee except the sender
    Committee(ShardId),
    /// Current leader of a committee
    ShardLeader(ShardId),
}

/// Message as it arrives in an inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Endpoint,
    pub message: NetworkMessage,
}

/// Transport used by nodes and clients. Sends never block.
pub trait MessageHub: Send + Sync {
    fn send(&self, from: Endpoint, to: Destination, message: NetworkMessage) -> NetworkResult<()>;
}

/// Hub delivering through in-process unbounded channels.
///
/// Each endpoint owns one inbox, so messages from one sender reach a
/// receiver in the order they were sent. Disconnected endpoints neither
/// send nor receive; their traffic is dropped silently.
#[derive(Debug, Default)]
pub struct LocalHub {
    config: HubConfig,
    inboxes: DashMap<Endpoint, mpsc::UnboundedSender<Envelope>>,
    committees: DashMap<ShardId, BTreeSet<NodeId>>,
    leaders: DashMap<ShardId, NodeId>,
    severed: DashSet<Endpoint>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalHub {
    pub fn new(config: HubConfig) -> NetworkResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// Open the inbox of an endpoint, replacing any earlier one
    pub fn register(&self, endpoint: Endpoint) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if self.inboxes.insert(endpoint, sender).is_some() {
            warn!("Re-registered endpoint {}", endpoint);
        }
        if let Endpoint::Node { shard_id, node_id } = endpoint {
            self.committees.entry(shard_id).or_default().insert(node_id);
        }
        debug!("Registered endpoint {}", endpoint);
        receiver
    }

    pub fn unregister(&self, endpoint: &Endpoint) {
        self.inboxes.remove(endpoint);
        if let Endpoint::Node { shard_id, node_id } = endpoint {
            if let Some(mut members) = self.committees.get_mut(shard_id) {
                members.remove(node_id);
            }
        }
        debug!("Unregistered endpoint {}", endpoint);
    }

    pub fn set_leader(&self, shard_id: ShardId, node_id: NodeId) {
        self.leaders.insert(shard_id, node_id);
    }

    pub fn leader(&self, shard_id: ShardId) -> Option<NodeId> {
        self.leaders.get(&shard_id).map(|leader| *leader)
    }

    /// Cut an endpoint off; its traffic is dropped until reconnected
    pub fn disconnect(&self, endpoint: Endpoint) {
        self.severed.insert(endpoint);
        debug!("Disconnected endpoint {}", endpoint);
    }

    pub fn reconnect(&self, endpoint: &Endpoint) {
        self.severed.remove(endpoint);
        debug!("Reconnected endpoint {}", endpoint);
    }

    pub fn is_connected(&self, endpoint: &Endpoint) -> bool {
        !self.severed.contains(endpoint)
    }

    /// Messages placed in an inbox so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages discarded because an endpoint was disconnected
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn members(&self, shard_id: ShardId) -> Vec<NodeId> {
        self.committees
            .get(&shard_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Run a message through its wire form when configured to
    fn transcode(&self, message: NetworkMessage) -> NetworkResult<NetworkMessage> {
        if !self.config.encode_messages {
            return Ok(message);
        }
        let bytes = message.encode()?;
        if bytes.len() > self.config.max_message_size {
            return Err(NetworkError::MessageTooLarge {
                size: bytes.len(),
                max: self.config.max_message_size,
            });
        }
        Ok(NetworkMessage::decode(&bytes)?)
    }

    fn deliver(&self, from: Endpoint, to: Endpoint, message: NetworkMessage) -> NetworkResult<()> {
        if self.severed.contains(&to) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped {} {} -> {}", message.kind(), from, to);
            return Ok(());
        }

        let inbox = self
            .inboxes
            .get(&to)
            .ok_or(NetworkError::UnknownEndpoint(to))?;
        trace!("{} {} -> {}", message.kind(), from, to);
        inbox
            .send(Envelope { from, message })
            .map_err(|_| NetworkError::ChannelClosed(to))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl MessageHub for LocalHub {
    fn send(&self, from: Endpoint, to: Destination, message: NetworkMessage) -> NetworkResult<()> {
        if self.severed.contains(&from) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped {} from disconnected {}", message.kind(), from);
            return Ok(());
        }
        let message = self.transcode(message)?;

        match to {
            Destination::Endpoint(endpoint) => self.deliver(from, endpoint, message),
            Destination::ShardLeader(shard_id) => {
                let leader = self.leader(shard_id).ok_or(NetworkError::NoLeader(shard_id))?;
                self.deliver(from, Endpoint::node(shard_id, leader), message)
            }
            Destination::Committee(shard_id) => {
                // Attempt every member, report the first failure
                let mut first_error = None;
                for node_id in self.members(shard_id) {
                    let endpoint = Endpoint::node(shard_id, node_id);
                    if endpoint == from {
                        continue;
                    }
                    if let Err(err) = self.deliver(from, endpoint, message.clone()) {
                        first_error.get_or_insert(err);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::{InjectTransaction, PbftMessage, Reply};

    fn inject(shard_id: ShardId) -> NetworkMessage {
        NetworkMessage::InjectTransactions(InjectTransaction {
            shard_id,
            transactions: Vec::new(),
        })
    }

    fn reply(seq_id: u64) -> NetworkMessage {
        NetworkMessage::Pbft(PbftMessage::Reply(Reply {
            seq_id,
            sender: 1,
            result: true,
        }))
    }

    #[tokio::test]
    async fn test_direct_delivery_keeps_order() {
        let hub = LocalHub::default();
        let client = Endpoint::Client(7);
        let node = Endpoint::node(0, 1);
        let mut inbox = hub.register(node);

        for seq_id in 1..=3 {
            hub.send(client, Destination::Endpoint(node), reply(seq_id))
                .unwrap();
        }
        for seq_id in 1..=3 {
            let envelope = inbox.recv().await.unwrap();
            assert_eq!(envelope.from, client);
            assert_eq!(envelope.message, reply(seq_id));
        }
        assert_eq!(hub.delivered(), 3);
    }

    #[tokio::test]
    async fn test_committee_broadcast_skips_sender() {
        let hub = LocalHub::default();
        let mut inboxes: Vec<_> = (0..4).map(|id| hub.register(Endpoint::node(0, id))).collect();
        let mut other_shard = hub.register(Endpoint::node(1, 0));

        hub.send(Endpoint::node(0, 2), Destination::Committee(0), reply(1))
            .unwrap();

        for (id, inbox) in inboxes.iter_mut().enumerate() {
            if id == 2 {
                assert!(inbox.try_recv().is_err());
            } else {
                assert_eq!(inbox.recv().await.unwrap().from, Endpoint::node(0, 2));
            }
        }
        assert!(other_shard.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leader_routing() {
        let hub = LocalHub::default();
        let mut leader = hub.register(Endpoint::node(3, 0));
        let _replica = hub.register(Endpoint::node(3, 1));

        let client = Endpoint::Client(1);
        assert_eq!(
            hub.send(client, Destination::ShardLeader(3), inject(3)),
            Err(NetworkError::NoLeader(3))
        );

        hub.set_leader(3, 0);
        hub.send(client, Destination::ShardLeader(3), inject(3))
            .unwrap();
        assert_eq!(leader.recv().await.unwrap().message, inject(3));
    }

    #[tokio::test]
    async fn test_unknown_and_closed_endpoints() {
        let hub = LocalHub::default();
        let client = Endpoint::Client(1);
        let node = Endpoint::node(0, 0);
        assert_eq!(
            hub.send(client, Destination::Endpoint(node), inject(0)),
            Err(NetworkError::UnknownEndpoint(node))
        );

        let inbox = hub.register(node);
        drop(inbox);
        assert_eq!(
            hub.send(client, Destination::Endpoint(node), inject(0)),
            Err(NetworkError::ChannelClosed(node))
        );

        hub.unregister(&node);
        assert!(hub.members(0).is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_endpoints_drop_traffic() {
        let hub = LocalHub::default();
        let a = Endpoint::node(0, 0);
        let b = Endpoint::node(0, 1);
        let mut inbox_a = hub.register(a);
        let mut inbox_b = hub.register(b);

        hub.disconnect(b);
        assert!(!hub.is_connected(&b));

        // neither inbound nor outbound traffic gets through
        hub.send(a, Destination::Endpoint(b), reply(1)).unwrap();
        hub.send(b, Destination::Endpoint(a), reply(2)).unwrap();
        assert!(inbox_a.try_recv().is_err());
        assert!(inbox_b.try_recv().is_err());
        assert_eq!(hub.dropped(), 2);

        hub.reconnect(&b);
        hub.send(a, Destination::Endpoint(b), reply(3)).unwrap();
        assert_eq!(inbox_b.recv().await.unwrap().message, reply(3));
    }

    #[tokio::test]
    async fn test_encoded_delivery() {
        let hub = LocalHub::new(HubConfig::new().with_encoding(true)).unwrap();
        let node = Endpoint::node(0, 0);
        let mut inbox = hub.register(node);

        hub.send(Endpoint::Client(2), Destination::Endpoint(node), reply(9))
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap().message, reply(9));

        let tiny = LocalHub::new(HubConfig::new().with_encoding(true).with_max_message_size(2))
            .unwrap();
        let _inbox = tiny.register(node);
        assert!(matches!(
            tiny.send(Endpoint::Client(2), Destination::Endpoint(node), reply(9)),
            Err(NetworkError::MessageTooLarge { max: 2, .. })
        ));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::node(2, 3).to_string(), "S2N3");
        assert_eq!(Endpoint::Client(4).to_string(), "C4");
    }
}
