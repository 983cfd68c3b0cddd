//! Account model

use crate::{VmError, VmResult};
use chain_core::{Balance, Nonce};
use serde::{Deserialize, Serialize};

/// Account information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account nonce (number of transactions sent)
    pub nonce: Nonce,
    /// Account balance
    pub balance: Balance,
}

impl Account {
    /// Create a new empty account
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with initial balance
    pub fn with_balance(balance: Balance) -> Self {
        Self { nonce: 0, balance }
    }

    /// Check if account is empty
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance == 0
    }

    /// Increment nonce
    pub fn increment_nonce(&mut self) {
        self.nonce = self.nonce.saturating_add(1);
    }

    /// Decrement nonce, the inverse of a phase-one bump
    pub fn decrement_nonce(&mut self) -> VmResult<()> {
        self.nonce = self.nonce.checked_sub(1).ok_or(VmError::NonceUnderflow)?;
        Ok(())
    }

    /// Add to balance
    pub fn add_balance(&mut self, amount: Balance) -> VmResult<()> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(VmError::BalanceOverflow {
                balance: self.balance,
                amount,
            })?;
        Ok(())
    }

    /// Subtract from balance
    pub fn sub_balance(&mut self, amount: Balance) -> VmResult<()> {
        if self.balance < amount {
            return Err(VmError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_creation() {
        let account = Account::new();
        assert_eq!(account.nonce, 0);
        assert_eq!(account.balance, 0);
        assert!(account.is_empty());
        assert!(!Account::with_balance(1000).is_empty());
    }

    #[test]
    fn test_balance_operations() {
        let mut account = Account::new();

        account.add_balance(500).unwrap();
        assert_eq!(account.balance, 500);

        account.sub_balance(200).unwrap();
        assert_eq!(account.balance, 300);

        // Insufficient balance should fail and leave the balance alone
        assert!(matches!(
            account.sub_balance(400),
            Err(VmError::InsufficientBalance {
                required: 400,
                available: 300
            })
        ));
        assert_eq!(account.balance, 300);

        let mut full = Account::with_balance(Balance::MAX);
        assert!(matches!(
            full.add_balance(1),
            Err(VmError::BalanceOverflow { .. })
        ));
    }

    #[test]
    fn test_nonce_operations() {
        let mut account = Account::new();
        account.increment_nonce();
        assert_eq!(account.nonce, 1);

        account.decrement_nonce().unwrap();
        assert_eq!(account.nonce, 0);
        assert!(matches!(
            account.decrement_nonce(),
            Err(VmError::NonceUnderflow)
        ));
    }
}
