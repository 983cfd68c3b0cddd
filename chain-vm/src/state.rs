//! Shard ledger and forks

use crate::account::Account;
use crate::{VmError, VmResult};
use chain_core::{Address, Balance, Hash, Nonce};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key-value ledger with balance/nonce accessors and a root hash
pub trait Ledger: Send + Sync {
    /// Get account by address
    fn get_account(&self, address: &Address) -> Option<Account>;

    /// Set account
    fn set_account(&mut self, address: Address, account: Account);

    /// Root hash committing to every account
    fn state_root(&self) -> Hash;

    fn balance(&self, address: &Address) -> Balance {
        self.get_account(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    fn nonce(&self, address: &Address) -> Nonce {
        self.get_account(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }
}

/// In-memory ledger implementation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    /// Account data, ordered so the root is deterministic
    accounts: BTreeMap<Address, Account>,
}

impl MemoryLedger {
    /// Create new memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with initial accounts
    pub fn with_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (Address, Account)>,
    {
        Self {
            accounts: accounts
                .into_iter()
                .filter(|(_, account)| !account.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sum of every balance
    pub fn total_balance(&self) -> Balance {
        self.accounts
            .values()
            .fold(0, |total: Balance, account| total.saturating_add(account.balance))
    }
}

impl Ledger for MemoryLedger {
    fn get_account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).cloned()
    }

    fn set_account(&mut self, address: Address, account: Account) {
        if account.is_empty() {
            self.accounts.remove(&address);
        } else {
            self.accounts.insert(address, account);
        }
    }

    fn state_root(&self) -> Hash {
        // Flat hash over sorted accounts; proofs are out of scope
        let mut hasher = blake3::Hasher::new();
        for (address, account) in &self.accounts {
            hasher.update(address.as_bytes());
            hasher.update(&account.nonce.to_le_bytes());
            hasher.update(&account.balance.to_le_bytes());
        }
        Hash::new(*hasher.finalize().as_bytes())
    }
}

/// Working copy of a shared ledger, committed back only if nothing else
/// was committed in between
#[derive(Debug, Clone)]
pub struct LedgerFork {
    ledger: MemoryLedger,
    base_version: u64,
}

impl LedgerFork {
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut MemoryLedger {
        &mut self.ledger
    }

    pub fn state_root(&self) -> Hash {
        self.ledger.state_root()
    }
}

#[derive(Debug, Default)]
struct Versioned {
    ledger: MemoryLedger,
    version: u64,
}

/// Thread-safe ledger handle shared by a shard's producer and readers
#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<RwLock<Versioned>>,
}

impl SharedLedger {
    /// Create new shared ledger
    pub fn new(ledger: MemoryLedger) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Versioned { ledger, version: 0 })),
        }
    }

    /// Create an empty in-memory ledger
    pub fn memory() -> Self {
        Self::new(MemoryLedger::new())
    }

    /// Get account (read-only)
    pub fn get_account(&self, address: &Address) -> Option<Account> {
        self.inner.read().ledger.get_account(address)
    }

    pub fn balance(&self, address: &Address) -> Balance {
        self.inner.read().ledger.balance(address)
    }

    pub fn nonce(&self, address: &Address) -> Nonce {
        self.inner.read().ledger.nonce(address)
    }

    /// Get state root
    pub fn state_root(&self) -> Hash {
        self.inner.read().ledger.state_root()
    }

    pub fn total_balance(&self) -> Balance {
        self.inner.read().ledger.total_balance()
    }

    /// Copy of the current state for speculative execution
    pub fn fork(&self) -> LedgerFork {
        let inner = self.inner.read();
        LedgerFork {
            ledger: inner.ledger.clone(),
            base_version: inner.version,
        }
    }

    /// Replace the state with a fork taken from the current version
    pub fn commit(&self, fork: LedgerFork) -> VmResult<Hash> {
        let mut inner = self.inner.write();
        if inner.version != fork.base_version {
            return Err(VmError::State(format!(
                "Stale fork: based on version {}, ledger is at {}",
                fork.base_version, inner.version
            )));
        }
        inner.ledger = fork.ledger;
        inner.version += 1;
        Ok(inner.ledger.state_root())
    }

    /// Copy of the committed state
    pub fn snapshot(&self) -> MemoryLedger {
        self.inner.read().ledger.clone()
    }
}
