//! # Payment Escrow
//!
//! One [`BalanceTracker`] per payment type holds:
//!
//! - **requester balances**: debit balances, funds locked for requests;
//! - **mech balances**: credit balances, funds earned and awaiting payout;
//! - **collected fees**: the marketplace's cut, only ever increased by
//!   payouts and zeroed by draining.
//!
//! Requests lock funds pessimistically at the agreed rate. Delivery
//! reconciles: the difference between agreed and actual rate flows back to
//! the requester, the actual rate is credited to the mech. Value is only
//! ever moved, never created:
//!
//! ```text
//! Σ requester debits == Σ mech credits + Σ refunds
//! ```
//!
//! How value enters and leaves the tracker depends on the payment type and
//! is delegated to a [`PaymentStrategy`].

pub mod strategy;
pub mod tracker;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::guard::ReentrancyError;
use crate::token::TokenError;

pub use strategy::{NativeStrategy, PaymentStrategy, SubscriptionStrategy, TokenStrategy};
pub use tracker::{split_fee, BalanceTracker, PaymentSplit, PaymentTracker, TrackerBalances};

/// Which escrow governs a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    /// Native chain value attached to calls.
    Native,
    /// A fungible token pulled from the requester's token balance.
    Token,
    /// Prepaid subscription credits, settled to mechs in tokens.
    Subscription,
}

impl PaymentType {
    pub const ALL: [PaymentType; 3] = [
        PaymentType::Native,
        PaymentType::Token,
        PaymentType::Subscription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Native => "native",
            PaymentType::Token => "token",
            PaymentType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(PaymentType::Native),
            "token" => Ok(PaymentType::Token),
            "subscription" => Ok(PaymentType::Subscription),
            other => Err(EscrowError::UnknownPaymentType(other.to_string())),
        }
    }
}

/// Errors raised by the escrow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("zero value")]
    ZeroValue,

    #[error("nothing to pay: balance {balance} is below the payable minimum")]
    NothingToPay { balance: u64 },

    #[error("wrong array length: expected {expected}, got {got}")]
    WrongArrayLength { expected: usize, got: usize },

    #[error("this payment type does not accept attached value")]
    NoDepositAllowed,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("ledger error: {0}")]
    Ledger(#[from] TokenError),

    #[error("reentrant call rejected")]
    Reentrancy,

    #[error("unknown payment type: {0}")]
    UnknownPaymentType(String),
}

impl From<ReentrancyError> for EscrowError {
    fn from(_: ReentrancyError) -> Self {
        EscrowError::Reentrancy
    }
}
