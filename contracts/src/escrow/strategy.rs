//! Payment strategies: how value enters and leaves an escrow.
//!
//! | Strategy       | Attached value | Shortfall pulled from      | Paid out in         |
//! |----------------|----------------|----------------------------|---------------------|
//! | `Native`       | accepted       | nothing (returns 0)        | native value        |
//! | `Token`        | rejected       | requester's token balance  | tokens              |
//! | `Subscription` | rejected       | requester's credits (burn) | tokens, at a ratio  |
//!
//! Every acquisition is all-or-nothing: a strategy either acquires exactly
//! the shortfall or fails without moving anything.

use mech_protocol::config::CREDIT_RATIO_SCALE;
use mech_protocol::identity::Address;
use std::sync::Arc;

use super::{EscrowError, PaymentType};
use crate::token::TokenLedger;

/// Acquire-funds / release-funds / finalized-rate hooks for one payment type.
pub trait PaymentStrategy: Send + Sync {
    fn payment_type(&self) -> PaymentType;

    /// Account holding the escrowed value on the backing ledger.
    fn escrow_account(&self) -> Address;

    /// Whether value attached to a call can be deposited.
    fn accepts_value(&self) -> bool {
        false
    }

    /// Moves value attached to a call from `payer` into escrow.
    fn accept_value(&self, _payer: &Address, _amount: u64) -> Result<(), EscrowError> {
        Err(EscrowError::NoDepositAllowed)
    }

    /// Pulls `shortfall` from an external source on behalf of `requester`.
    /// Returns the amount acquired.
    fn acquire_funds(
        &self,
        requester: &Address,
        shortfall: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError>;

    /// Sends settled value out of escrow.
    fn release_funds(&self, recipient: &Address, amount: u64) -> Result<(), EscrowError>;

    /// Converts escrow units into the units actually released.
    fn finalized_amount(&self, escrow_units: u64) -> Result<u64, EscrowError> {
        Ok(escrow_units)
    }

    /// Smallest amount of escrow units that finalizes to `released`.
    fn escrow_units_for(&self, released: u64) -> Result<u64, EscrowError> {
        Ok(released)
    }
}

/// Native value: deposits arrive attached to calls.
pub struct NativeStrategy {
    ledger: Arc<dyn TokenLedger>,
    escrow: Address,
}

impl NativeStrategy {
    pub fn new(ledger: Arc<dyn TokenLedger>, escrow: Address) -> Self {
        Self { ledger, escrow }
    }
}

impl PaymentStrategy for NativeStrategy {
    fn payment_type(&self) -> PaymentType {
        PaymentType::Native
    }

    fn escrow_account(&self) -> Address {
        self.escrow
    }

    fn accepts_value(&self) -> bool {
        true
    }

    fn accept_value(&self, payer: &Address, amount: u64) -> Result<(), EscrowError> {
        self.ledger.transfer(payer, &self.escrow, amount)?;
        Ok(())
    }

    fn acquire_funds(&self, _: &Address, _: u64, _: &[u8]) -> Result<u64, EscrowError> {
        // Native funds only arrive attached to a call.
        Ok(0)
    }

    fn release_funds(&self, recipient: &Address, amount: u64) -> Result<(), EscrowError> {
        self.ledger.transfer(&self.escrow, recipient, amount)?;
        Ok(())
    }
}

/// Fungible token pulled from the requester's balance.
pub struct TokenStrategy {
    ledger: Arc<dyn TokenLedger>,
    escrow: Address,
}

impl TokenStrategy {
    pub fn new(ledger: Arc<dyn TokenLedger>, escrow: Address) -> Self {
        Self { ledger, escrow }
    }
}

impl PaymentStrategy for TokenStrategy {
    fn payment_type(&self) -> PaymentType {
        PaymentType::Token
    }

    fn escrow_account(&self) -> Address {
        self.escrow
    }

    fn acquire_funds(
        &self,
        requester: &Address,
        shortfall: u64,
        _: &[u8],
    ) -> Result<u64, EscrowError> {
        self.ledger.transfer(requester, &self.escrow, shortfall)?;
        Ok(shortfall)
    }

    fn release_funds(&self, recipient: &Address, amount: u64) -> Result<(), EscrowError> {
        self.ledger.transfer(&self.escrow, recipient, amount)?;
        Ok(())
    }
}

/// Subscription credits. Requesters spend credits; mechs are paid in the
/// settlement token at `token_credit_ratio / CREDIT_RATIO_SCALE` tokens per
/// credit, out of a reserve held by the escrow account.
pub struct SubscriptionStrategy {
    credits: Arc<dyn TokenLedger>,
    settlement: Arc<dyn TokenLedger>,
    escrow: Address,
    token_credit_ratio: u128,
}

impl SubscriptionStrategy {
    pub fn new(
        credits: Arc<dyn TokenLedger>,
        settlement: Arc<dyn TokenLedger>,
        escrow: Address,
        token_credit_ratio: u128,
    ) -> Result<Self, EscrowError> {
        if token_credit_ratio == 0 {
            return Err(EscrowError::ZeroValue);
        }
        Ok(Self {
            credits,
            settlement,
            escrow,
            token_credit_ratio,
        })
    }

    pub fn token_credit_ratio(&self) -> u128 {
        self.token_credit_ratio
    }
}

impl PaymentStrategy for SubscriptionStrategy {
    fn payment_type(&self) -> PaymentType {
        PaymentType::Subscription
    }

    fn escrow_account(&self) -> Address {
        self.escrow
    }

    fn acquire_funds(
        &self,
        requester: &Address,
        shortfall: u64,
        _: &[u8],
    ) -> Result<u64, EscrowError> {
        self.credits.burn(requester, shortfall)?;
        Ok(shortfall)
    }

    fn release_funds(&self, recipient: &Address, amount: u64) -> Result<(), EscrowError> {
        self.settlement.transfer(&self.escrow, recipient, amount)?;
        Ok(())
    }

    fn finalized_amount(&self, credits: u64) -> Result<u64, EscrowError> {
        let tokens = (credits as u128)
            .checked_mul(self.token_credit_ratio)
            .ok_or(EscrowError::Overflow)?
            / CREDIT_RATIO_SCALE;
        u64::try_from(tokens).map_err(|_| EscrowError::Overflow)
    }

    fn escrow_units_for(&self, tokens: u64) -> Result<u64, EscrowError> {
        let scaled = (tokens as u128)
            .checked_mul(CREDIT_RATIO_SCALE)
            .ok_or(EscrowError::Overflow)?;
        let credits = scaled.div_ceil(self.token_credit_ratio);
        u64::try_from(credits).map_err(|_| EscrowError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{InMemoryTokenLedger, TokenError};

    fn ledger() -> Arc<InMemoryTokenLedger> {
        Arc::new(InMemoryTokenLedger::new("test"))
    }

    #[test]
    fn native_accepts_value_and_acquires_nothing() {
        let l = ledger();
        let payer = Address::derive("payer");
        let escrow = Address::derive("escrow/native");
        l.mint(&payer, 100).unwrap();

        let s = NativeStrategy::new(l.clone(), escrow);
        assert!(s.accepts_value());
        s.accept_value(&payer, 30).unwrap();
        assert_eq!(l.balance_of(&escrow), 30);
        assert_eq!(s.acquire_funds(&payer, 50, &[]).unwrap(), 0);
        assert_eq!(l.balance_of(&payer), 70);
    }

    #[test]
    fn token_pulls_exact_shortfall() {
        let l = ledger();
        let req = Address::derive("req");
        let escrow = Address::derive("escrow/token");
        l.mint(&req, 100).unwrap();

        let s = TokenStrategy::new(l.clone(), escrow);
        assert!(!s.accepts_value());
        assert_eq!(s.accept_value(&req, 1), Err(EscrowError::NoDepositAllowed));
        assert_eq!(s.acquire_funds(&req, 40, &[]).unwrap(), 40);
        assert_eq!(l.balance_of(&req), 60);
        assert_eq!(l.balance_of(&escrow), 40);
    }

    #[test]
    fn token_acquire_failure_moves_nothing() {
        let l = ledger();
        let req = Address::derive("req");
        l.mint(&req, 10).unwrap();
        let s = TokenStrategy::new(l.clone(), Address::derive("escrow/token"));
        let err = s.acquire_funds(&req, 11, &[]).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::Ledger(TokenError::InsufficientFunds { .. })
        ));
        assert_eq!(l.balance_of(&req), 10);
    }

    #[test]
    fn subscription_burns_credits_and_converts_at_ratio() {
        let credits = ledger();
        let settlement = ledger();
        let req = Address::derive("req");
        credits.mint(&req, 100).unwrap();

        // Half a token per credit.
        let s = SubscriptionStrategy::new(
            credits.clone(),
            settlement,
            Address::derive("escrow/subscription"),
            CREDIT_RATIO_SCALE / 2,
        )
        .unwrap();
        assert_eq!(s.acquire_funds(&req, 25, &[]).unwrap(), 25);
        assert_eq!(credits.balance_of(&req), 75);
        assert_eq!(credits.total_supply(), 75);
        assert_eq!(s.finalized_amount(10).unwrap(), 5);
        assert_eq!(s.finalized_amount(3).unwrap(), 1);
        // One token costs two credits; the third credit is not spent.
        assert_eq!(s.escrow_units_for(1).unwrap(), 2);
        assert_eq!(s.escrow_units_for(0).unwrap(), 0);
    }

    #[test]
    fn subscription_units_for_rounds_up_on_uneven_ratio() {
        // 1.5 tokens per credit: 3 credits finalize to 4 tokens, and
        // 4 tokens need all 3 credits.
        let s = SubscriptionStrategy::new(
            ledger(),
            ledger(),
            Address::derive("escrow/subscription"),
            CREDIT_RATIO_SCALE * 3 / 2,
        )
        .unwrap();
        assert_eq!(s.finalized_amount(3).unwrap(), 4);
        assert_eq!(s.escrow_units_for(4).unwrap(), 3);
        assert_eq!(s.finalized_amount(s.escrow_units_for(4).unwrap()).unwrap(), 4);
    }

    #[test]
    fn subscription_rejects_zero_ratio() {
        assert!(SubscriptionStrategy::new(
            ledger(),
            ledger(),
            Address::derive("escrow/subscription"),
            0
        )
        .is_err());
    }

    #[test]
    fn subscription_conversion_overflow() {
        let s = SubscriptionStrategy::new(
            ledger(),
            ledger(),
            Address::derive("escrow/subscription"),
            CREDIT_RATIO_SCALE * 4,
        )
        .unwrap();
        assert_eq!(s.finalized_amount(u64::MAX), Err(EscrowError::Overflow));
    }
}
