use mech_protocol::identity::Address;
use thiserror::Error;

use crate::escrow::{EscrowError, PaymentType};
use crate::guard::ReentrancyError;
use crate::request_id::RequestId;

/// Every way a marketplace call can fail. A failed call leaves no trace.
///
/// Variants carry the offending values so callers can tell causes apart
/// without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketplaceError {
    // -- Input validation ---------------------------------------------------
    #[error("zero address")]
    ZeroAddress,

    #[error("zero value")]
    ZeroValue,

    #[error("payload at index {index} is empty")]
    EmptyPayload { index: usize },

    #[error("empty batch")]
    EmptyBatch,

    #[error("wrong array length: expected {expected}, got {got}")]
    WrongArrayLength { expected: usize, got: usize },

    #[error("value {provided} out of bounds [{min}, {max}]")]
    OutOfBounds { provided: u64, min: u64, max: u64 },

    #[error("overflow: {provided} exceeds {max}")]
    Overflow { provided: u64, max: u64 },

    // -- Authorization ------------------------------------------------------
    #[error("mech {mech} is not authorized by this marketplace")]
    UnauthorizedMech { mech: Address },

    #[error("service {service_id} has no registered mech")]
    UnknownService { service_id: u64 },

    #[error("account {account} is not authorized")]
    UnauthorizedAccount { account: Address },

    #[error("owner only: owner is {owner}, caller is {caller}")]
    OwnerOnly { owner: Address, caller: Address },

    #[error("reentrant call rejected")]
    Reentrancy,

    // -- Conflicts ----------------------------------------------------------
    #[error("request {id} already requested")]
    AlreadyRequested { id: RequestId },

    #[error("request {id} does not exist")]
    RequestNotFound { id: RequestId },

    // -- Delivery -----------------------------------------------------------
    #[error("payment type mismatch: mech uses {expected}, request uses {got}")]
    PaymentTypeMismatch {
        expected: PaymentType,
        got: PaymentType,
    },

    #[error("priority mech response window still open: deadline {deadline}, now {now}")]
    PriorityMechResponseTimeout { deadline: u64, now: u64 },

    #[error("authorization of requester {requester} failed at index {index}")]
    SignatureNotValid { requester: Address, index: usize },

    #[error("no payment tracker for {payment_type}")]
    UnknownPaymentType { payment_type: PaymentType },

    // -- Economic -----------------------------------------------------------
    #[error("escrow: {0}")]
    Escrow(#[from] EscrowError),
}

impl From<ReentrancyError> for MarketplaceError {
    fn from(_: ReentrancyError) -> Self {
        MarketplaceError::Reentrancy
    }
}

impl MarketplaceError {
    /// Stable short name, used as a metrics label and in RPC error data.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketplaceError::ZeroAddress => "zero_address",
            MarketplaceError::ZeroValue => "zero_value",
            MarketplaceError::EmptyPayload { .. } => "empty_payload",
            MarketplaceError::EmptyBatch => "empty_batch",
            MarketplaceError::WrongArrayLength { .. } => "wrong_array_length",
            MarketplaceError::OutOfBounds { .. } => "out_of_bounds",
            MarketplaceError::Overflow { .. } => "overflow",
            MarketplaceError::UnauthorizedMech { .. } => "unauthorized_mech",
            MarketplaceError::UnknownService { .. } => "unknown_service",
            MarketplaceError::UnauthorizedAccount { .. } => "unauthorized_account",
            MarketplaceError::OwnerOnly { .. } => "owner_only",
            MarketplaceError::Reentrancy => "reentrancy",
            MarketplaceError::AlreadyRequested { .. } => "already_requested",
            MarketplaceError::RequestNotFound { .. } => "request_not_found",
            MarketplaceError::PaymentTypeMismatch { .. } => "payment_type_mismatch",
            MarketplaceError::PriorityMechResponseTimeout { .. } => "priority_mech_response_timeout",
            MarketplaceError::SignatureNotValid { .. } => "signature_not_valid",
            MarketplaceError::UnknownPaymentType { .. } => "unknown_payment_type",
            MarketplaceError::Escrow(EscrowError::Reentrancy) => "reentrancy",
            MarketplaceError::Escrow(EscrowError::InsufficientBalance { .. }) => "insufficient_balance",
            MarketplaceError::Escrow(EscrowError::NothingToPay { .. }) => "nothing_to_pay",
            MarketplaceError::Escrow(_) => "escrow",
        }
    }
}
