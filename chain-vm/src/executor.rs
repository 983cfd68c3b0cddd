//! Transaction execution engine

use crate::account::Account;
use crate::state::Ledger;
use crate::{VmError, VmResult};
use chain_core::{Address, Balance, Nonce, Timestamp, Transaction, TxStatus, TxType};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Extra seconds a phase-two credit may trail its deadline, absorbing
    /// the delay between pool draw and execution
    pub phase2_grace_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            phase2_grace_secs: 5,
        }
    }
}

/// State change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    /// Account balance changed
    BalanceChange {
        address: Address,
        old_balance: Balance,
        new_balance: Balance,
    },
    /// Account nonce changed
    NonceChange {
        address: Address,
        old_nonce: Nonce,
        new_nonce: Nonce,
    },
}

/// Transaction execution result
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Status assigned to the transaction
    pub status: TxStatus,
    /// State changes made
    pub state_changes: Vec<StateChange>,
    /// Error message if failed
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Create successful result
    pub fn success(status: TxStatus, state_changes: Vec<StateChange>) -> Self {
        Self {
            status,
            state_changes,
            error: None,
        }
    }

    /// Create failed result; nothing was written
    pub fn failure(status: TxStatus, error: String) -> Self {
        Self {
            status,
            state_changes: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Applies one transaction to a shard ledger
#[derive(Debug, Clone, Default)]
pub struct StateExecutor {
    config: ExecutorConfig,
}

impl StateExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a transaction and record its terminal status on it.
    ///
    /// A malformed transaction returns an error and keeps `Pending`; the
    /// caller skips it without aborting the block.
    pub fn execute<L: Ledger + ?Sized>(
        &self,
        tx: &mut Transaction,
        ledger: &mut L,
        now: Timestamp,
    ) -> VmResult<ExecutionResult> {
        self.check_shape(tx)?;

        let result = match tx.tx_type {
            TxType::Intra => self.apply_intra(tx, ledger),
            TxType::CrossPhase1 => self.apply_phase1(tx, ledger),
            TxType::CrossPhase2 => self.apply_phase2(tx, ledger, now),
            TxType::Rollback => self.apply_rollback(tx, ledger),
        };

        if tx.tx_type == TxType::CrossPhase1 && result.is_success() {
            tx.confirm_time = Some(now);
        }
        tx.set_status(result.status)?;

        debug!(
            "Executed {} tx {} -> {}",
            tx.tx_type, tx.id, result.status
        );
        Ok(result)
    }

    fn check_shape(&self, tx: &Transaction) -> VmResult<()> {
        let malformed = |reason: &str| VmError::MalformedTransaction {
            tx_id: tx.id,
            reason: reason.to_string(),
        };

        if tx.status.is_terminal() {
            return Err(malformed("status already terminal"));
        }
        match tx.tx_type {
            TxType::Intra if tx.is_cross_shard() => {
                Err(malformed("intra transfer spans two shards"))
            }
            TxType::CrossPhase1 | TxType::CrossPhase2 | TxType::Rollback
                if !tx.is_cross_shard() =>
            {
                Err(malformed("cross-shard transfer within one shard"))
            }
            TxType::CrossPhase2 if tx.confirm_time.is_none() => {
                Err(malformed("phase two without phase-one confirmation"))
            }
            _ => Ok(()),
        }
    }

    fn apply_intra<L: Ledger + ?Sized>(&self, tx: &Transaction, ledger: &mut L) -> ExecutionResult {
        let mut sender = ledger.get_account(&tx.sender).unwrap_or_default();
        let mut changes = Vec::new();

        // Self-transfer only bumps the nonce
        if tx.sender == tx.recipient {
            if sender.balance < tx.value {
                let error = VmError::InsufficientBalance {
                    required: tx.value,
                    available: sender.balance,
                };
                return ExecutionResult::failure(TxStatus::IntraFail, error.to_string());
            }
            bump_nonce(tx.sender, &mut sender, &mut changes);
            ledger.set_account(tx.sender, sender);
            return ExecutionResult::success(TxStatus::IntraSuccess, changes);
        }

        let mut recipient = ledger.get_account(&tx.recipient).unwrap_or_default();
        if let Err(e) = debit(tx.sender, &mut sender, tx.value, &mut changes) {
            return ExecutionResult::failure(TxStatus::IntraFail, e.to_string());
        }
        if let Err(e) = credit(tx.recipient, &mut recipient, tx.value, &mut changes) {
            return ExecutionResult::failure(TxStatus::IntraFail, e.to_string());
        }
        bump_nonce(tx.sender, &mut sender, &mut changes);

        ledger.set_account(tx.sender, sender);
        ledger.set_account(tx.recipient, recipient);
        ExecutionResult::success(TxStatus::IntraSuccess, changes)
    }

    fn apply_phase1<L: Ledger + ?Sized>(&self, tx: &Transaction, ledger: &mut L) -> ExecutionResult {
        let mut sender = ledger.get_account(&tx.sender).unwrap_or_default();
        let mut changes = Vec::new();

        if let Err(e) = debit(tx.sender, &mut sender, tx.value, &mut changes) {
            return ExecutionResult::failure(TxStatus::Phase1Fail, e.to_string());
        }
        bump_nonce(tx.sender, &mut sender, &mut changes);

        ledger.set_account(tx.sender, sender);
        ExecutionResult::success(TxStatus::Phase1Success, changes)
    }

    fn apply_phase2<L: Ledger + ?Sized>(
        &self,
        tx: &Transaction,
        ledger: &mut L,
        now: Timestamp,
    ) -> ExecutionResult {
        let deadline = tx
            .phase2_deadline()
            .unwrap_or_default()
            .saturating_add(self.config.phase2_grace_secs);
        if now > deadline {
            warn!(
                "Phase-two tx {} reached execution at {} past deadline {} (pool filter missed it)",
                tx.id, now, deadline
            );
            return ExecutionResult::failure(
                TxStatus::Phase2Fail,
                format!("phase two expired at {}", deadline),
            );
        }

        let mut recipient = ledger.get_account(&tx.recipient).unwrap_or_default();
        let mut changes = Vec::new();
        if let Err(e) = credit(tx.recipient, &mut recipient, tx.value, &mut changes) {
            return ExecutionResult::failure(TxStatus::Phase2Fail, e.to_string());
        }

        ledger.set_account(tx.recipient, recipient);
        ExecutionResult::success(TxStatus::Phase2Success, changes)
    }

    fn apply_rollback<L: Ledger + ?Sized>(
        &self,
        tx: &Transaction,
        ledger: &mut L,
    ) -> ExecutionResult {
        let mut sender = ledger.get_account(&tx.sender).unwrap_or_default();
        let mut changes = Vec::new();

        let old_nonce = sender.nonce;
        if let Err(e) = sender.decrement_nonce() {
            return ExecutionResult::failure(TxStatus::RollbackFail, e.to_string());
        }
        if let Err(e) = credit(tx.sender, &mut sender, tx.value, &mut changes) {
            return ExecutionResult::failure(TxStatus::RollbackFail, e.to_string());
        }
        changes.push(StateChange::NonceChange {
            address: tx.sender,
            old_nonce,
            new_nonce: sender.nonce,
        });

        ledger.set_account(tx.sender, sender);
        ExecutionResult::success(TxStatus::RollbackSuccess, changes)
    }
}

fn debit(
    address: Address,
    account: &mut Account,
    amount: Balance,
    changes: &mut Vec<StateChange>,
) -> VmResult<()> {
    let old_balance = account.balance;
    account.sub_balance(amount)?;
    changes.push(StateChange::BalanceChange {
        address,
        old_balance,
        new_balance: account.balance,
    });
    Ok(())
}

fn credit(
    address: Address,
    account: &mut Account,
    amount: Balance,
    changes: &mut Vec<StateChange>,
) -> VmResult<()> {
    let old_balance = account.balance;
    account.add_balance(amount)?;
    changes.push(StateChange::BalanceChange {
        address,
        old_balance,
        new_balance: account.balance,
    });
    Ok(())
}

fn bump_nonce(address: Address, account: &mut Account, changes: &mut Vec<StateChange>) {
    let old_nonce = account.nonce;
    account.increment_nonce();
    changes.push(StateChange::NonceChange {
        address,
        old_nonce,
        new_nonce: account.nonce,
    });
}
