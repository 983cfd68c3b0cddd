//! Per-transfer state of the cross-shard protocol
//!
//! Every transfer a client injects is tracked here until it is terminal.
//! Phase two and rollback of one transfer exclude each other through the
//! single `TransferState` each id holds.

use crate::LatencyStats;
use chain_core::{Timestamp, Transaction, TxId, TxReceipt, TxStatus, TxType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, error, warn};

/// Where a transfer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    /// Injected, no receipt yet
    Submitted,
    /// Phase one confirmed at `confirm_time`; phase two queued or in flight
    ReadyPhase2 {
        confirm_time: Timestamp,
        dispatched: bool,
    },
    /// Refund queued or in flight
    RollingBack { dispatched: bool },
    Completed,
    RolledBack,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::RolledBack | TransferState::Failed
        )
    }
}

#[derive(Debug, Clone)]
struct Transfer {
    /// As first injected
    tx: Transaction,
    state: TransferState,
}

/// Transfers of one client
#[derive(Debug, Default)]
pub struct CrossShardTracker {
    transfers: BTreeMap<TxId, Transfer>,
    phase2_ready: VecDeque<TxId>,
    rollback_ready: VecDeque<TxId>,
    inconsistencies: u64,
    latency: LatencyStats,
}

impl CrossShardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an injected intra or phase-one transaction
    pub fn track(&mut self, tx: &Transaction) {
        if self.transfers.contains_key(&tx.id) {
            warn!("Tx {} is already tracked", tx.id);
            return;
        }
        self.latency.observe_broadcast(tx.broadcast_time);
        self.transfers.insert(
            tx.id,
            Transfer {
                tx: tx.clone(),
                state: TransferState::Submitted,
            },
        );
    }

    pub fn state(&self, tx_id: TxId) -> Option<TransferState> {
        self.transfers.get(&tx_id).map(|transfer| transfer.state)
    }

    /// Apply one receipt, returning the resulting state
    pub fn on_receipt(&mut self, receipt: &TxReceipt) -> Option<TransferState> {
        let Some(transfer) = self.transfers.get_mut(&receipt.tx_id) else {
            warn!("Receipt for untracked tx {}", receipt.tx_id);
            return None;
        };
        let window = transfer.tx.rollback_window_secs;

        let next = match (receipt.tx_type, receipt.status, transfer.state) {
            (TxType::Intra, TxStatus::IntraSuccess, TransferState::Submitted) => {
                TransferState::Completed
            }
            (TxType::Intra, _, TransferState::Submitted) => TransferState::Failed,

            (TxType::CrossPhase1, TxStatus::Phase1Success, TransferState::Submitted) => {
                self.phase2_ready.push_back(receipt.tx_id);
                TransferState::ReadyPhase2 {
                    confirm_time: receipt.confirm_time,
                    dispatched: false,
                }
            }
            (TxType::CrossPhase1, _, TransferState::Submitted) => TransferState::Failed,

            (
                TxType::CrossPhase2,
                TxStatus::Phase2Success,
                TransferState::ReadyPhase2 { confirm_time, .. },
            ) => {
                if receipt.confirm_time > confirm_time.saturating_add(window) {
                    warn!(
                        "Tx {} phase two confirmed at {}, past its window ending {}",
                        receipt.tx_id,
                        receipt.confirm_time,
                        confirm_time.saturating_add(window)
                    );
                    self.inconsistencies += 1;
                }
                TransferState::Completed
            }
            (
                TxType::CrossPhase2,
                TxStatus::Phase2Success,
                state @ (TransferState::RollingBack { .. } | TransferState::RolledBack),
            ) => {
                error!(
                    "Tx {} credited by phase two after its rollback was issued",
                    receipt.tx_id
                );
                self.inconsistencies += 1;
                state
            }
            (TxType::CrossPhase2, _, TransferState::ReadyPhase2 { .. }) => {
                debug!("Tx {} phase two ended {}, rolling back", receipt.tx_id, receipt.status);
                self.rollback_ready.push_back(receipt.tx_id);
                TransferState::RollingBack { dispatched: false }
            }

            (TxType::Rollback, TxStatus::RollbackSuccess, TransferState::RollingBack { .. }) => {
                TransferState::RolledBack
            }
            (TxType::Rollback, TxStatus::Dropped, TransferState::RollingBack { .. }) => {
                self.rollback_ready.push_back(receipt.tx_id);
                TransferState::RollingBack { dispatched: false }
            }
            (TxType::Rollback, status, TransferState::RollingBack { .. }) => {
                error!("Tx {} rollback ended {}", receipt.tx_id, status);
                TransferState::Failed
            }

            (_, status, state) => {
                debug!(
                    "Tx {} ignoring {} {} receipt in state {:?}",
                    receipt.tx_id, receipt.tx_type, status, state
                );
                state
            }
        };

        if next == TransferState::Completed && transfer.state != TransferState::Completed {
            self.latency
                .record(receipt.tx_id, transfer.tx.broadcast_time, receipt.confirm_time);
        }
        transfer.state = next;
        Some(next)
    }

    /// Phase-two transactions to submit, oldest confirmation first
    pub fn take_phase2(&mut self, max: usize) -> Vec<Transaction> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(tx_id) = self.phase2_ready.pop_front() else {
                break;
            };
            let Some(transfer) = self.transfers.get_mut(&tx_id) else {
                continue;
            };
            // moved to rollback while queued
            if let TransferState::ReadyPhase2 {
                confirm_time,
                dispatched: false,
            } = transfer.state
            {
                transfer.state = TransferState::ReadyPhase2 {
                    confirm_time,
                    dispatched: true,
                };
                out.push(transfer.tx.to_phase2(confirm_time));
            }
        }
        out
    }

    /// Rollback transactions to submit
    pub fn take_rollbacks(&mut self, max: usize) -> Vec<Transaction> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(tx_id) = self.rollback_ready.pop_front() else {
                break;
            };
            let Some(transfer) = self.transfers.get_mut(&tx_id) else {
                continue;
            };
            if transfer.state == (TransferState::RollingBack { dispatched: false }) {
                transfer.state = TransferState::RollingBack { dispatched: true };
                out.push(transfer.tx.to_rollback());
            }
        }
        out
    }

    /// Move every transfer whose phase two is overdue at `now` to rollback.
    ///
    /// Overdue means `now >= confirm_time + window + grace_secs`, whether or
    /// not phase two was already submitted.
    pub fn scan_expired(&mut self, now: Timestamp, grace_secs: u64) -> Vec<TxId> {
        let mut expired = Vec::new();
        for (tx_id, transfer) in self.transfers.iter_mut() {
            let TransferState::ReadyPhase2 { confirm_time, .. } = transfer.state else {
                continue;
            };
            let limit = confirm_time
                .saturating_add(transfer.tx.rollback_window_secs)
                .saturating_add(grace_secs);
            if now >= limit {
                transfer.state = TransferState::RollingBack { dispatched: false };
                self.rollback_ready.push_back(*tx_id);
                expired.push(*tx_id);
            }
        }
        if !expired.is_empty() {
            debug!("{} transfers expired at {}, rolling back", expired.len(), now);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Every tracked transfer is terminal
    pub fn is_settled(&self) -> bool {
        self.transfers.values().all(|transfer| transfer.state.is_terminal())
    }

    fn count(&self, state: TransferState) -> usize {
        self.transfers
            .values()
            .filter(|transfer| transfer.state == state)
            .count()
    }

    pub fn completed(&self) -> usize {
        self.count(TransferState::Completed)
    }

    pub fn rolled_back(&self) -> usize {
        self.count(TransferState::RolledBack)
    }

    pub fn failed(&self) -> usize {
        self.count(TransferState::Failed)
    }

    pub fn in_flight(&self) -> usize {
        self.transfers
            .values()
            .filter(|transfer| !transfer.state.is_terminal())
            .count()
    }

    /// Receipts that contradicted the window rule or mutual exclusion
    pub fn inconsistencies(&self) -> u64 {
        self.inconsistencies
    }

    /// Latency of completed transfers
    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::Address;

    fn cross(id: TxId) -> Transaction {
        Transaction::transfer(
            id,
            Address::from_index(2),
            Address::from_index(3),
            0,
            1,
            10,
            0,
            0,
            20,
        )
    }

    fn receipt(id: TxId, tx_type: TxType, status: TxStatus, confirm_time: Timestamp) -> TxReceipt {
        TxReceipt {
            tx_id: id,
            tx_type,
            status,
            confirm_time,
            block_height: 1,
            shard_id: 0,
        }
    }

    /// Phase one of tx 1 confirmed at t=100
    fn confirmed() -> CrossShardTracker {
        let mut tracker = CrossShardTracker::new();
        tracker.track(&cross(1));
        tracker.on_receipt(&receipt(1, TxType::CrossPhase1, TxStatus::Phase1Success, 100));
        tracker
    }

    #[test]
    fn test_phase2_within_window_completes() {
        let mut tracker = confirmed();

        // submitted at t=115
        let phase2 = tracker.take_phase2(10);
        assert_eq!(phase2.len(), 1);
        assert_eq!(phase2[0].tx_type, TxType::CrossPhase2);
        assert_eq!(phase2[0].confirm_time, Some(100));
        assert!(!phase2[0].is_phase2_expired(115));
        assert!(tracker.take_phase2(10).is_empty());

        assert!(tracker.scan_expired(115, 2).is_empty());
        let state =
            tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Success, 115));
        assert_eq!(state, Some(TransferState::Completed));

        assert!(tracker.scan_expired(122, 2).is_empty());
        assert!(tracker.take_rollbacks(10).is_empty());
        assert!(tracker.is_settled());
        assert_eq!(tracker.completed(), 1);
        assert_eq!(tracker.inconsistencies(), 0);
    }

    #[test]
    fn test_scan_moves_to_rollback_at_window_plus_grace() {
        let mut tracker = confirmed();

        assert!(tracker.scan_expired(121, 2).is_empty());
        assert_eq!(tracker.scan_expired(122, 2), vec![1]);
        assert_eq!(
            tracker.state(1),
            Some(TransferState::RollingBack { dispatched: false })
        );

        // phase two never leaves the client after the move
        assert!(tracker.take_phase2(10).is_empty());
        let rollbacks = tracker.take_rollbacks(10);
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].tx_type, TxType::Rollback);
        assert_eq!(rollbacks[0].home_shard(), 0);

        // a late phase two at t=126 would be past its deadline
        assert!(cross(1).to_phase2(100).is_phase2_expired(126));

        let state =
            tracker.on_receipt(&receipt(1, TxType::Rollback, TxStatus::RollbackSuccess, 127));
        assert_eq!(state, Some(TransferState::RolledBack));
        assert!(tracker.is_settled());
        assert_eq!(tracker.rolled_back(), 1);
    }

    #[test]
    fn test_phase2_fail_receipt_triggers_single_rollback() {
        let mut tracker = confirmed();
        tracker.take_phase2(10);

        tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Fail, 126));
        assert_eq!(tracker.take_rollbacks(10).len(), 1);

        // the scanner no longer sees it
        assert!(tracker.scan_expired(500, 2).is_empty());
        assert!(tracker.take_rollbacks(10).is_empty());
    }

    #[test]
    fn test_late_phase2_success_is_inconsistent() {
        let mut tracker = confirmed();
        tracker.take_phase2(10);
        tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Success, 125));
        assert_eq!(tracker.state(1), Some(TransferState::Completed));
        assert_eq!(tracker.inconsistencies(), 1);
    }

    #[test]
    fn test_phase2_after_rollback_is_inconsistent() {
        let mut tracker = confirmed();
        tracker.take_phase2(10);
        tracker.scan_expired(122, 2);
        tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Success, 120));
        assert_eq!(
            tracker.state(1),
            Some(TransferState::RollingBack { dispatched: false })
        );
        assert_eq!(tracker.inconsistencies(), 1);
    }

    #[test]
    fn test_dropped_rollback_is_requeued() {
        let mut tracker = confirmed();
        tracker.scan_expired(122, 2);
        assert_eq!(tracker.take_rollbacks(10).len(), 1);

        tracker.on_receipt(&receipt(1, TxType::Rollback, TxStatus::Dropped, 123));
        assert_eq!(tracker.take_rollbacks(10).len(), 1);
        assert!(!tracker.is_settled());
    }

    #[test]
    fn test_intra_and_failed_phase1() {
        let mut tracker = CrossShardTracker::new();
        let mut intra = cross(5);
        intra.recipient_shard = 0;
        intra.tx_type = TxType::Intra;
        tracker.track(&intra);
        tracker.track(&cross(6));
        assert_eq!(tracker.in_flight(), 2);

        tracker.on_receipt(&receipt(5, TxType::Intra, TxStatus::IntraSuccess, 10));
        tracker.on_receipt(&receipt(6, TxType::CrossPhase1, TxStatus::Phase1Fail, 10));
        assert_eq!(tracker.completed(), 1);
        assert_eq!(tracker.failed(), 1);
        assert!(tracker.is_settled());
        assert!(tracker.take_phase2(10).is_empty());
    }

    #[test]
    fn test_latency_measured_from_broadcast_to_final_confirmation() {
        let mut tracker = CrossShardTracker::new();
        let mut tx = cross(1);
        tx.broadcast_time = 96;
        tracker.track(&tx);
        tracker.on_receipt(&receipt(1, TxType::CrossPhase1, TxStatus::Phase1Success, 100));
        assert_eq!(tracker.latency().samples, 0);

        tracker.take_phase2(10);
        tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Success, 115));
        assert_eq!(tracker.latency().samples, 1);
        assert_eq!(tracker.latency().max_secs, Some(19));

        // a duplicate receipt is not sampled twice
        tracker.on_receipt(&receipt(1, TxType::CrossPhase2, TxStatus::Phase2Success, 116));
        assert_eq!(tracker.latency().samples, 1);
    }

    #[test]
    fn test_rolled_back_transfer_has_no_latency_sample() {
        let mut tracker = confirmed();
        tracker.scan_expired(122, 2);
        tracker.take_rollbacks(10);
        tracker.on_receipt(&receipt(1, TxType::Rollback, TxStatus::RollbackSuccess, 124));
        assert_eq!(tracker.latency().samples, 0);
        assert_eq!(tracker.latency().first_broadcast, Some(0));
    }

    #[test]
    fn test_dispatch_caps() {
        let mut tracker = CrossShardTracker::new();
        for id in 1..=5 {
            tracker.track(&cross(id));
            tracker.on_receipt(&receipt(id, TxType::CrossPhase1, TxStatus::Phase1Success, 100));
        }
        let ids: Vec<TxId> = tracker.take_phase2(3).iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(tracker.take_phase2(3).len(), 2);
    }
}
