//! Transaction data structures and status lifecycle

use crate::error::{CoreError, CoreResult};
use crate::types::{Address, Balance, ClientId, Hash, Nonce, ShardId, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of value transfer
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
pub enum TxType {
    /// Sender and recipient live in the same shard
    Intra,
    /// Debit half of a cross-shard transfer, executed by the sender shard
    CrossPhase1,
    /// Credit half of a cross-shard transfer, executed by the recipient shard
    CrossPhase2,
    /// Refund of a phase-one debit, executed by the sender shard
    Rollback,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Intra => "intra",
            TxType::CrossPhase1 => "cross-phase1",
            TxType::CrossPhase2 => "cross-phase2",
            TxType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status. Every value except `Pending` is terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum TxStatus {
    #[default]
    Pending,
    IntraSuccess,
    Phase1Success,
    Phase2Success,
    RollbackSuccess,
    IntraFail,
    Phase1Fail,
    Phase2Fail,
    RollbackFail,
    Dropped,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TxStatus::IntraSuccess
                | TxStatus::Phase1Success
                | TxStatus::Phase2Success
                | TxStatus::RollbackSuccess
        )
    }

    /// Failure status matching a transaction kind
    pub fn failure_for(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Intra => TxStatus::IntraFail,
            TxType::CrossPhase1 => TxStatus::Phase1Fail,
            TxType::CrossPhase2 => TxStatus::Phase2Fail,
            TxType::Rollback => TxStatus::RollbackFail,
        }
    }

    /// Success status matching a transaction kind
    pub fn success_for(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Intra => TxStatus::IntraSuccess,
            TxType::CrossPhase1 => TxStatus::Phase1Success,
            TxType::CrossPhase2 => TxStatus::Phase2Success,
            TxType::Rollback => TxStatus::RollbackSuccess,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::IntraSuccess => "intra-success",
            TxStatus::Phase1Success => "phase1-success",
            TxStatus::Phase2Success => "phase2-success",
            TxStatus::RollbackSuccess => "rollback-success",
            TxStatus::IntraFail => "intra-fail",
            TxStatus::Phase1Fail => "phase1-fail",
            TxStatus::Phase2Fail => "phase2-fail",
            TxStatus::RollbackFail => "rollback-fail",
            TxStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction data structure
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Workload-unique id; phase-two and rollback transactions reuse the phase-one id
    pub id: TxId,
    pub tx_type: TxType,
    pub sender: Address,
    pub recipient: Address,
    pub sender_shard: ShardId,
    pub recipient_shard: ShardId,
    pub value: Balance,
    pub sender_nonce: Nonce,
    pub status: TxStatus,
    /// When the client first broadcast it
    pub broadcast_time: Timestamp,
    /// Phase-one confirmation time; set by execution (phase one) or carried (phase two)
    pub confirm_time: Option<Timestamp>,
    pub rollback_window_secs: u64,
    pub owner: ClientId,
}

impl Transaction {
    /// Create a transfer. The type follows from the two shards.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        id: TxId,
        sender: Address,
        recipient: Address,
        sender_shard: ShardId,
        recipient_shard: ShardId,
        value: Balance,
        sender_nonce: Nonce,
        owner: ClientId,
        rollback_window_secs: u64,
    ) -> Self {
        let tx_type = if sender_shard == recipient_shard {
            TxType::Intra
        } else {
            TxType::CrossPhase1
        };

        Self {
            id,
            tx_type,
            sender,
            recipient,
            sender_shard,
            recipient_shard,
            value,
            sender_nonce,
            status: TxStatus::Pending,
            broadcast_time: 0,
            confirm_time: None,
            rollback_window_secs,
            owner,
        }
    }

    pub fn is_cross_shard(&self) -> bool {
        self.sender_shard != self.recipient_shard
    }

    /// Shard whose pool must receive this transaction
    pub fn home_shard(&self) -> ShardId {
        match self.tx_type {
            TxType::CrossPhase2 => self.recipient_shard,
            TxType::Intra | TxType::CrossPhase1 | TxType::Rollback => self.sender_shard,
        }
    }

    /// Derive the credit half from a confirmed phase-one transaction
    pub fn to_phase2(&self, confirm_time: Timestamp) -> Self {
        Self {
            tx_type: TxType::CrossPhase2,
            status: TxStatus::Pending,
            confirm_time: Some(confirm_time),
            ..self.clone()
        }
    }

    /// Derive the refund of a confirmed phase-one transaction
    pub fn to_rollback(&self) -> Self {
        Self {
            tx_type: TxType::Rollback,
            status: TxStatus::Pending,
            ..self.clone()
        }
    }

    /// Last instant at which the credit half may execute
    pub fn phase2_deadline(&self) -> Option<Timestamp> {
        self.confirm_time
            .map(|confirm| confirm.saturating_add(self.rollback_window_secs))
    }

    /// True for a phase-two transaction whose deadline has passed at `now`
    pub fn is_phase2_expired(&self, now: Timestamp) -> bool {
        self.tx_type == TxType::CrossPhase2
            && self.phase2_deadline().is_some_and(|deadline| now > deadline)
    }

    /// Move to a terminal status. Once terminal, the status never changes.
    pub fn set_status(&mut self, status: TxStatus) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::StatusFinalized {
                tx_id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        Ok(())
    }

    /// Keccak256 over the bincode encoding
    pub fn hash(&self) -> CoreResult<Hash> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())?;
        Ok(Hash::keccak(&encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross_tx() -> Transaction {
        Transaction::transfer(
            9,
            Address::from_index(1),
            Address::from_index(2),
            1,
            0,
            50,
            3,
            7,
            20,
        )
    }

    #[test]
    fn test_transfer_type_follows_shards() {
        let intra = Transaction::transfer(
            1,
            Address::from_index(2),
            Address::from_index(4),
            0,
            0,
            10,
            0,
            0,
            20,
        );
        assert_eq!(intra.tx_type, TxType::Intra);
        assert!(!intra.is_cross_shard());
        assert_eq!(intra.home_shard(), 0);

        let cross = cross_tx();
        assert_eq!(cross.tx_type, TxType::CrossPhase1);
        assert!(cross.is_cross_shard());
        assert_eq!(cross.home_shard(), 1);
    }

    #[test]
    fn test_derived_transactions() {
        let mut phase1 = cross_tx();
        phase1.set_status(TxStatus::Phase1Success).unwrap();

        let phase2 = phase1.to_phase2(100);
        assert_eq!(phase2.id, phase1.id);
        assert_eq!(phase2.tx_type, TxType::CrossPhase2);
        assert_eq!(phase2.status, TxStatus::Pending);
        assert_eq!(phase2.home_shard(), 0);
        assert_eq!(phase2.phase2_deadline(), Some(120));

        let rollback = phase1.to_rollback();
        assert_eq!(rollback.tx_type, TxType::Rollback);
        assert_eq!(rollback.home_shard(), 1);
        assert_eq!(rollback.value, phase1.value);
    }

    #[test]
    fn test_phase2_expiry_boundary() {
        let phase2 = cross_tx().to_phase2(100);
        assert!(!phase2.is_phase2_expired(115));
        assert!(!phase2.is_phase2_expired(120));
        assert!(phase2.is_phase2_expired(121));

        // only phase-two transactions expire
        let mut phase1 = cross_tx();
        phase1.confirm_time = Some(100);
        assert!(!phase1.is_phase2_expired(500));
    }

    #[test]
    fn test_status_is_terminal_once_set() {
        let mut tx = cross_tx();
        tx.set_status(TxStatus::Phase1Success).unwrap();
        let err = tx.set_status(TxStatus::Dropped).unwrap_err();
        assert!(matches!(
            err,
            CoreError::StatusFinalized {
                tx_id: 9,
                status: TxStatus::Phase1Success
            }
        ));
        assert_eq!(tx.status, TxStatus::Phase1Success);
    }

    #[test]
    fn test_status_helpers() {
        assert_eq!(TxStatus::success_for(TxType::Rollback), TxStatus::RollbackSuccess);
        assert_eq!(TxStatus::failure_for(TxType::CrossPhase2), TxStatus::Phase2Fail);
        assert!(TxStatus::Phase2Success.is_success());
        assert!(!TxStatus::Dropped.is_success());
        assert!(!TxStatus::Pending.is_terminal());
    }

    #[test]
    fn test_transaction_hash() {
        let tx = cross_tx();
        assert_eq!(tx.hash().unwrap(), tx.hash().unwrap());
        assert_ne!(tx.hash().unwrap(), tx.to_rollback().hash().unwrap());
    }
}
