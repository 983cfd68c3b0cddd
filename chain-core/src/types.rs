//! Basic types shared by every shard component

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Block height within a shard chain
pub type BlockNumber = u64;

/// Timestamp in whole seconds since Unix epoch
pub type Timestamp = u64;

/// Shard (and committee) identifier
pub type ShardId = u32;

/// Node index inside a committee
pub type NodeId = u32;

/// Client identifier
pub type ClientId = u32;

/// Transaction identifier, unique per workload
pub type TxId = u64;

/// Consensus sequence identifier, equal to the height of the block it orders
pub type SeqId = u64;

/// Account balance
pub type Balance = u128;

/// Nonce type for transactions
pub type Nonce = u64;

/// 32-byte hash type
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new hash from byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Keccak256 of arbitrary bytes
    pub fn keccak(data: &[u8]) -> Self {
        let digest = Keccak256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_slice());
        Self(bytes)
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }

    /// Zero hash (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// First four bytes in hex, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 20-byte account address
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Address([u8; 20]);

impl Address {
    /// Create a new address from byte array
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Deterministic address for a numbered simulation account.
    ///
    /// The index is stored big-endian in the trailing eight bytes, so
    /// `shard_of` sees it directly.
    pub fn from_index(index: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }

    /// Zero address (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 20])
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Shard that owns an address
pub fn shard_of(address: &Address, shard_count: u32) -> ShardId {
    let bytes = address.as_bytes();
    let tail = u64::from_be_bytes([
        bytes[12], bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19],
    ]);
    (tail % u64::from(shard_count.max(1))) as ShardId
}

/// Source of the current time for every deadline check
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in seconds since Unix epoch
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// Manually driven clock for tests and replayed simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_creation() {
        let hash = Hash::zero();
        assert_eq!(
            hash.to_hex(),
            "0000000000000000000000000000000000000000000000000000000000000000"
        );

        let hash2 = Hash::new([1u8; 32]);
        assert_eq!(
            hash2.to_hex(),
            "0101010101010101010101010101010101010101010101010101010101010101"
        );
        assert_eq!(hash2.short(), "01010101");
    }

    #[test]
    fn test_hash_from_hex() {
        let hex = "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let hash = Hash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
        assert!(Hash::from_hex("1234").is_err());
    }

    #[test]
    fn test_keccak_is_stable() {
        assert_eq!(Hash::keccak(b"shard"), Hash::keccak(b"shard"));
        assert_ne!(Hash::keccak(b"shard"), Hash::keccak(b"shards"));
    }

    #[test]
    fn test_address_from_index() {
        let addr = Address::from_index(258);
        assert_eq!(addr.to_hex(), "0000000000000000000000000000000000000102");
        assert_eq!(Address::from_hex(&addr.to_hex()).unwrap(), addr);
    }

    #[test]
    fn test_shard_of() {
        assert_eq!(shard_of(&Address::from_index(0), 4), 0);
        assert_eq!(shard_of(&Address::from_index(5), 4), 1);
        assert_eq!(shard_of(&Address::from_index(7), 4), 3);
        assert_eq!(shard_of(&Address::from_index(7), 1), 0);
        assert_eq!(shard_of(&Address::from_index(7), 0), 0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(15);
        assert_eq!(clock.now(), 115);
        clock.set(126);
        assert_eq!(clock.now(), 126);
    }
}
