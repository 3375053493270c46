//! # Token Ledgers
//!
//! The marketplace never moves value itself. Native value, ERC-20 style
//! tokens and subscription credits all live in external ledgers reached
//! through the narrow [`TokenLedger`] capability: read a balance, move an
//! amount, fail on insufficient funds.
//!
//! Transfers are all-or-nothing. A failed transfer changes no balance.

use mech_protocol::identity::Address;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by a token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("insufficient funds: {account} has {available}, needs {required}")]
    InsufficientFunds {
        account: Address,
        required: u64,
        available: u64,
    },

    #[error("balance overflow crediting {account}")]
    Overflow { account: Address },

    #[error("zero address")]
    ZeroAddress,

    #[error("ledger rejected the call: {0}")]
    Rejected(String),
}

/// Debit/credit capability over one asset.
pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, account: &Address) -> u64;

    /// Moves `amount` from `from` to `to`, or fails without effect.
    fn transfer(&self, from: &Address, to: &Address, amount: u64) -> Result<(), TokenError>;

    /// Creates `amount` new units in `to`. Genesis and test seeding only.
    fn mint(&self, to: &Address, amount: u64) -> Result<(), TokenError>;

    /// Destroys `amount` units held by `from`.
    fn burn(&self, from: &Address, amount: u64) -> Result<(), TokenError>;
}

/// In-memory ledger used by the devnet node and tests.
#[derive(Debug, Default)]
pub struct InMemoryTokenLedger {
    name: String,
    balances: RwLock<BTreeMap<Address, u64>>,
}

impl InMemoryTokenLedger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            balances: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.read().values().map(|&b| b as u128).sum()
    }

    /// Copy of every non-zero balance, for snapshots.
    pub fn balances(&self) -> BTreeMap<Address, u64> {
        self.balances.read().clone()
    }

    /// Replaces all balances with a snapshot.
    pub fn restore(&self, balances: BTreeMap<Address, u64>) {
        *self.balances.write() = balances;
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn balance_of(&self, account: &Address) -> u64 {
        self.balances.read().get(account).copied().unwrap_or(0)
    }

    fn transfer(&self, from: &Address, to: &Address, amount: u64) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        let mut balances = self.balances.write();

        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TokenError::InsufficientFunds {
                account: *from,
                required: amount,
                available,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        let target = balances.get(to).copied().unwrap_or(0);
        let credited = target
            .checked_add(amount)
            .ok_or(TokenError::Overflow { account: *to })?;

        set_balance(&mut balances, from, available - amount);
        set_balance(&mut balances, to, credited);
        Ok(())
    }

    fn mint(&self, to: &Address, amount: u64) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        let mut balances = self.balances.write();
        let current = balances.get(to).copied().unwrap_or(0);
        let credited = current
            .checked_add(amount)
            .ok_or(TokenError::Overflow { account: *to })?;
        set_balance(&mut balances, to, credited);
        Ok(())
    }

    fn burn(&self, from: &Address, amount: u64) -> Result<(), TokenError> {
        let mut balances = self.balances.write();
        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TokenError::InsufficientFunds {
                account: *from,
                required: amount,
                available,
            });
        }
        set_balance(&mut balances, from, available - amount);
        Ok(())
    }
}

fn set_balance(balances: &mut BTreeMap<Address, u64>, account: &Address, value: u64) {
    if value == 0 {
        balances.remove(account);
    } else {
        balances.insert(*account, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::derive(label)
    }

    #[test]
    fn mint_then_transfer() {
        let ledger = InMemoryTokenLedger::new("olas");
        ledger.mint(&addr("a"), 100).unwrap();
        ledger.transfer(&addr("a"), &addr("b"), 40).unwrap();
        assert_eq!(ledger.balance_of(&addr("a")), 60);
        assert_eq!(ledger.balance_of(&addr("b")), 40);
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn insufficient_transfer_changes_nothing() {
        let ledger = InMemoryTokenLedger::new("olas");
        ledger.mint(&addr("a"), 10).unwrap();
        let err = ledger.transfer(&addr("a"), &addr("b"), 11).unwrap_err();
        assert_eq!(
            err,
            TokenError::InsufficientFunds {
                account: addr("a"),
                required: 11,
                available: 10
            }
        );
        assert_eq!(ledger.balance_of(&addr("a")), 10);
        assert_eq!(ledger.balance_of(&addr("b")), 0);
    }

    #[test]
    fn transfer_to_zero_address_rejected() {
        let ledger = InMemoryTokenLedger::new("olas");
        ledger.mint(&addr("a"), 10).unwrap();
        assert_eq!(
            ledger.transfer(&addr("a"), &Address::ZERO, 1),
            Err(TokenError::ZeroAddress)
        );
    }

    #[test]
    fn overflow_is_rejected() {
        let ledger = InMemoryTokenLedger::new("olas");
        ledger.mint(&addr("a"), u64::MAX).unwrap();
        assert!(ledger.mint(&addr("a"), 1).is_err());
        ledger.mint(&addr("b"), 1).unwrap();
        assert!(ledger.transfer(&addr("b"), &addr("a"), 1).is_err());
        assert_eq!(ledger.balance_of(&addr("b")), 1);
    }

    #[test]
    fn burn_reduces_supply() {
        let ledger = InMemoryTokenLedger::new("credits");
        ledger.mint(&addr("a"), 50).unwrap();
        ledger.burn(&addr("a"), 20).unwrap();
        assert_eq!(ledger.total_supply(), 30);
        assert!(ledger.burn(&addr("a"), 31).is_err());
    }

    #[test]
    fn snapshot_and_restore() {
        let ledger = InMemoryTokenLedger::new("native");
        ledger.mint(&addr("a"), 5).unwrap();
        let snap = ledger.balances();

        let fresh = InMemoryTokenLedger::new("native");
        fresh.restore(snap);
        assert_eq!(fresh.balance_of(&addr("a")), 5);
    }
}
