//! Consensus and injection payloads exchanged between nodes and clients

use crate::transaction::Transaction;
use crate::types::{Hash, NodeId, SeqId, ShardId, Timestamp};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// What a consensus request carries
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum RequestKind {
    /// An encoded shard block
    Block,
}

impl RequestKind {
    /// Stable tag fed into the request digest
    pub fn tag(&self) -> &'static [u8] {
        match self {
            RequestKind::Block => b"block",
        }
    }
}

/// A proposal ordered by one consensus round
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct PbftRequest {
    pub kind: RequestKind,
    pub payload: Vec<u8>,
    pub propose_time: Timestamp,
}

impl PbftRequest {
    pub fn block(payload: Vec<u8>, propose_time: Timestamp) -> Self {
        Self {
            kind: RequestKind::Block,
            payload,
            propose_time,
        }
    }

    /// Digest binding the proposal to its content.
    ///
    /// Fields are fed in a fixed order, each variable-length field behind a
    /// big-endian u64 length prefix, so the bytes hashed depend on nothing but
    /// the three field values.
    pub fn digest(&self) -> Hash {
        let tag = self.kind.tag();
        let mut hasher = Keccak256::new();
        hasher.update((tag.len() as u64).to_be_bytes());
        hasher.update(tag);
        hasher.update((self.payload.len() as u64).to_be_bytes());
        hasher.update(&self.payload);
        hasher.update(self.propose_time.to_be_bytes());

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(hasher.finalize().as_slice());
        Hash::new(bytes)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct PrePrepare {
    pub request: PbftRequest,
    pub digest: Hash,
    pub seq_id: SeqId,
}

/// Prepare and Commit share this shape
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Vote {
    pub digest: Hash,
    pub seq_id: SeqId,
    pub sender: NodeId,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Reply {
    pub seq_id: SeqId,
    pub sender: NodeId,
    pub result: bool,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct RequestOldMessage {
    pub from_seq: SeqId,
    pub to_seq: SeqId,
    pub asker: NodeId,
}

/// Leader's answer to a catch-up request. `requests[i]` belongs to `from_seq + i`.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct SendOldMessage {
    pub from_seq: SeqId,
    pub to_seq: SeqId,
    pub requests: Vec<PbftRequest>,
}

/// Messages of the committee consensus protocol
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum PbftMessage {
    PrePrepare(PrePrepare),
    Prepare(Vote),
    Commit(Vote),
    Reply(Reply),
    RequestOldMessage(RequestOldMessage),
    SendOldMessage(SendOldMessage),
}

impl PbftMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PbftMessage::PrePrepare(_) => "preprepare",
            PbftMessage::Prepare(_) => "prepare",
            PbftMessage::Commit(_) => "commit",
            PbftMessage::Reply(_) => "reply",
            PbftMessage::RequestOldMessage(_) => "request-old",
            PbftMessage::SendOldMessage(_) => "send-old",
        }
    }

    /// Sequence the message refers to; the first one for catch-up ranges
    pub fn seq_id(&self) -> SeqId {
        match self {
            PbftMessage::PrePrepare(msg) => msg.seq_id,
            PbftMessage::Prepare(vote) | PbftMessage::Commit(vote) => vote.seq_id,
            PbftMessage::Reply(reply) => reply.seq_id,
            PbftMessage::RequestOldMessage(msg) => msg.from_seq,
            PbftMessage::SendOldMessage(msg) => msg.from_seq,
        }
    }
}

/// Transactions submitted to a shard's pool
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct InjectTransaction {
    pub shard_id: ShardId,
    pub transactions: Vec<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let request = PbftRequest::block(vec![1, 2, 3], 100);
        assert_eq!(request.digest(), request.clone().digest());
    }

    #[test]
    fn test_digest_binds_every_field() {
        let base = PbftRequest::block(vec![1, 2, 3], 100);
        let other_payload = PbftRequest::block(vec![1, 2, 4], 100);
        let other_time = PbftRequest::block(vec![1, 2, 3], 101);
        assert_ne!(base.digest(), other_payload.digest());
        assert_ne!(base.digest(), other_time.digest());
    }

    #[test]
    fn test_digest_survives_wire_round_trip() {
        let request = PbftRequest::block(b"block bytes".to_vec(), 1_700_000_000);
        let bytes = bincode::encode_to_vec(&request, bincode::config::standard()).unwrap();
        let (decoded, _): (PbftRequest, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded.digest(), request.digest());
    }

    #[test]
    fn test_message_accessors() {
        let vote = Vote {
            digest: Hash::zero(),
            seq_id: 7,
            sender: 2,
        };
        assert_eq!(PbftMessage::Commit(vote.clone()).kind(), "commit");
        assert_eq!(PbftMessage::Prepare(vote).seq_id(), 7);

        let ask = PbftMessage::RequestOldMessage(RequestOldMessage {
            from_seq: 10,
            to_seq: 12,
            asker: 3,
        });
        assert_eq!(ask.seq_id(), 10);
    }

    proptest::proptest! {
        #[test]
        fn prop_digest_depends_only_on_fields(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256),
            time in proptest::prelude::any::<u64>(),
        ) {
            let a = PbftRequest::block(payload.clone(), time);
            let b = PbftRequest::block(payload, time);
            proptest::prop_assert_eq!(a.digest(), b.digest());
        }

        #[test]
        fn prop_length_prefix_prevents_shifting(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..64),
            time in proptest::prelude::any::<u64>(),
        ) {
            // moving a byte from the payload into the timestamp must change the digest
            let mut shorter = payload.clone();
            let last = shorter.pop().unwrap_or_default();
            let shifted_time = (time << 8) | u64::from(last);
            let a = PbftRequest::block(payload, time);
            let b = PbftRequest::block(shorter, shifted_time);
            proptest::prop_assert_ne!(a.digest(), b.digest());
        }
    }
}
