//! Balance tracking and reconciliation for one payment type.

use mech_protocol::config::{MAX_FEE_FACTOR, MIN_PAYABLE_BALANCE};
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::strategy::PaymentStrategy;
use super::{EscrowError, PaymentType};
use crate::guard::Guarded;

/// The persistent part of a tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerBalances {
    /// Funds held for requesters.
    pub requester_balances: BTreeMap<Address, u64>,
    /// Funds earned by mechs, not yet paid out.
    pub mech_balances: BTreeMap<Address, u64>,
    /// Marketplace fees not yet drained.
    pub collected_fees: u64,
}

impl TrackerBalances {
    pub fn requester_balance(&self, account: &Address) -> u64 {
        self.requester_balances.get(account).copied().unwrap_or(0)
    }

    pub fn mech_balance(&self, mech: &Address) -> u64 {
        self.mech_balances.get(mech).copied().unwrap_or(0)
    }

    /// Sum of every balance the tracker owes to someone.
    pub fn total_held(&self) -> u128 {
        let requesters: u128 = self.requester_balances.values().map(|&v| v as u128).sum();
        let mechs: u128 = self.mech_balances.values().map(|&v| v as u128).sum();
        requesters + mechs + self.collected_fees as u128
    }

    fn set_requester(&mut self, account: &Address, value: u64) {
        set_or_remove(&mut self.requester_balances, account, value);
    }

    fn set_mech(&mut self, mech: &Address, value: u64) {
        set_or_remove(&mut self.mech_balances, mech, value);
    }
}

fn set_or_remove(map: &mut BTreeMap<Address, u64>, account: &Address, value: u64) {
    if value == 0 {
        map.remove(account);
    } else {
        map.insert(*account, value);
    }
}

/// Outcome of a mech payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSplit {
    /// Mech balance before the payout, in escrow units.
    pub balance: u64,
    /// Marketplace fee, in escrow units.
    pub fee: u64,
    /// Mech share spent on the release, in escrow units.
    pub payout: u64,
    /// Amount actually sent to the mech, in settlement units.
    pub released: u64,
    /// Conversion remainder left on the mech balance, in escrow units.
    #[serde(default)]
    pub retained: u64,
}

/// Ceiling fee on `balance`, clamped to `balance - 1` so the payout is
/// never zero.
pub fn split_fee(balance: u64, fee_bps: u16) -> (u64, u64) {
    let numerator = balance as u128 * fee_bps as u128;
    let denominator = MAX_FEE_FACTOR as u128;
    let ceil = (numerator + denominator - 1) / denominator;
    let fee = (ceil as u64).min(balance.saturating_sub(1));
    (fee, balance - fee)
}

/// Ledger state plus the strategy that moves value in and out.
pub struct BalanceTracker {
    balances: TrackerBalances,
    strategy: Box<dyn PaymentStrategy>,
    drainer: Address,
}

impl BalanceTracker {
    pub fn new(strategy: Box<dyn PaymentStrategy>, drainer: Address) -> Self {
        Self {
            balances: TrackerBalances::default(),
            strategy,
            drainer,
        }
    }

    pub fn payment_type(&self) -> PaymentType {
        self.strategy.payment_type()
    }

    pub fn balances(&self) -> &TrackerBalances {
        &self.balances
    }

    /// Credits a requester's balance with attached `value` and `amount`
    /// pulled through the strategy. Returns the new balance.
    pub fn deposit(
        &mut self,
        payer: &Address,
        value: u64,
        amount: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        let total = value.checked_add(amount).ok_or(EscrowError::Overflow)?;
        if total == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let new_balance = self
            .balances
            .requester_balance(payer)
            .checked_add(total)
            .ok_or(EscrowError::Overflow)?;

        self.collect(payer, value, amount, payment_data)?;
        self.balances.set_requester(payer, new_balance);

        debug!(payer = %payer, total, payment_type = %self.payment_type(), "escrow deposit");
        Ok(new_balance)
    }

    /// Locks `unit_rate * count` from the requester's balance, topping it
    /// up with attached value and, failing that, the exact shortfall from the
    /// strategy. Returns the amount locked.
    pub fn check_and_record_delivery_rates(
        &mut self,
        requester: &Address,
        count: u64,
        unit_rate: u64,
        value: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        let total = unit_rate.checked_mul(count).ok_or(EscrowError::Overflow)?;
        if total == 0 {
            return Err(EscrowError::ZeroValue);
        }
        self.debit_requester(requester, total, value, payment_data)?;
        Ok(total)
    }

    /// Settles a delivered batch: refunds `agreed - actual` to each
    /// requester and credits the mech with the sum of actual rates.
    /// Returns the mech credit.
    pub fn finalize_delivery_rates(
        &mut self,
        mech: &Address,
        requesters: &[Address],
        delivered: &[bool],
        actual_rates: &[u64],
        agreed_rates: &[u64],
    ) -> Result<u64, EscrowError> {
        let expected = requesters.len();
        for got in [delivered.len(), actual_rates.len(), agreed_rates.len()] {
            if got != expected {
                return Err(EscrowError::WrongArrayLength { expected, got });
            }
        }

        let mut refunds: BTreeMap<Address, u64> = BTreeMap::new();
        let mut total: u64 = 0;
        for i in 0..expected {
            if !delivered[i] {
                continue;
            }
            // Never credit more than was locked for the request.
            let credited = actual_rates[i].min(agreed_rates[i]);
            total = total.checked_add(credited).ok_or(EscrowError::Overflow)?;
            let refund = agreed_rates[i] - credited;
            if refund > 0 {
                let entry = refunds.entry(requesters[i]).or_insert(0);
                *entry = entry.checked_add(refund).ok_or(EscrowError::Overflow)?;
            }
        }
        if total == 0 {
            return Err(EscrowError::ZeroValue);
        }

        // Compute every new balance before writing any.
        let mech_after = self
            .balances
            .mech_balance(mech)
            .checked_add(total)
            .ok_or(EscrowError::Overflow)?;
        let mut requester_after = Vec::with_capacity(refunds.len());
        for (requester, refund) in refunds {
            let after = self
                .balances
                .requester_balance(&requester)
                .checked_add(refund)
                .ok_or(EscrowError::Overflow)?;
            requester_after.push((requester, after));
        }

        for (requester, after) in requester_after {
            self.balances.set_requester(&requester, after);
        }
        self.balances.set_mech(mech, mech_after);
        Ok(total)
    }

    /// Direct settlement of signature-authorized deliveries: debits the
    /// requester by the sum of `rates` and credits the mech in one step.
    pub fn adjust_mech_requester_balances(
        &mut self,
        mech: &Address,
        requester: &Address,
        rates: &[u64],
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        let total = rates
            .iter()
            .try_fold(0u64, |acc, &r| acc.checked_add(r))
            .ok_or(EscrowError::Overflow)?;
        if total == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let mech_after = self
            .balances
            .mech_balance(mech)
            .checked_add(total)
            .ok_or(EscrowError::Overflow)?;

        self.debit_requester(requester, total, 0, payment_data)?;
        self.balances.set_mech(mech, mech_after);
        Ok(total)
    }

    /// Pays out a mech's whole balance minus the marketplace fee.
    pub fn process_payment(
        &mut self,
        mech: &Address,
        fee_bps: u16,
    ) -> Result<PaymentSplit, EscrowError> {
        let balance = self.balances.mech_balance(mech);
        if balance < MIN_PAYABLE_BALANCE {
            return Err(EscrowError::NothingToPay { balance });
        }

        let (fee, share) = split_fee(balance, fee_bps);
        let released = self.strategy.finalized_amount(share)?;
        if released == 0 {
            return Err(EscrowError::NothingToPay { balance });
        }
        let payout = self.strategy.escrow_units_for(released)?;
        let retained = share.checked_sub(payout).ok_or(EscrowError::Overflow)?;
        let fees_after = self
            .balances
            .collected_fees
            .checked_add(fee)
            .ok_or(EscrowError::Overflow)?;

        // Settle the balance before the external transfer.
        let fees_before = self.balances.collected_fees;
        self.balances.set_mech(mech, retained);
        self.balances.collected_fees = fees_after;

        if let Err(e) = self.strategy.release_funds(mech, released) {
            self.balances.set_mech(mech, balance);
            self.balances.collected_fees = fees_before;
            return Err(e);
        }

        info!(
            mech = %mech,
            balance,
            fee,
            payout,
            released,
            retained,
            payment_type = %self.payment_type(),
            "mech payment processed"
        );
        Ok(PaymentSplit {
            balance,
            fee,
            payout,
            released,
            retained,
        })
    }

    /// Sends collected fees to the drainer. Returns the released amount.
    /// Fees too small to convert into a whole settlement unit stay collected.
    pub fn drain(&mut self) -> Result<u64, EscrowError> {
        let fees = self.balances.collected_fees;
        if fees == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let released = self.strategy.finalized_amount(fees)?;
        if released == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let spent = self.strategy.escrow_units_for(released)?;
        let remainder = fees.checked_sub(spent).ok_or(EscrowError::Overflow)?;

        self.balances.collected_fees = remainder;
        if let Err(e) = self.strategy.release_funds(&self.drainer, released) {
            self.balances.collected_fees = fees;
            return Err(e);
        }

        info!(drainer = %self.drainer, fees, released, payment_type = %self.payment_type(), "fees drained");
        Ok(released)
    }

    pub fn drainer(&self) -> Address {
        self.drainer
    }

    /// Debits `total` from the requester, topping up first with attached
    /// `value` and then with the exact shortfall.
    fn debit_requester(
        &mut self,
        requester: &Address,
        total: u64,
        value: u64,
        payment_data: &[u8],
    ) -> Result<(), EscrowError> {
        let held = self
            .balances
            .requester_balance(requester)
            .checked_add(value)
            .ok_or(EscrowError::Overflow)?;
        let shortfall = total.saturating_sub(held);

        let collected = self.collect(requester, value, shortfall, payment_data)?;
        let available = self
            .balances
            .requester_balance(requester)
            .checked_add(collected)
            .ok_or(EscrowError::Overflow)?;

        self.balances.set_requester(requester, available - total);
        Ok(())
    }

    /// Brings `value` and `pull` units into escrow for `payer`. Returns the
    /// total brought in.
    ///
    /// Acquisition runs first and is all-or-nothing; the native strategy,
    /// the only one accepting value, never acquires. So when this fails no
    /// ledger has moved.
    fn collect(
        &self,
        payer: &Address,
        value: u64,
        pull: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        if value > 0 && !self.strategy.accepts_value() {
            return Err(EscrowError::NoDepositAllowed);
        }

        let acquired = if pull > 0 {
            self.strategy.acquire_funds(payer, pull, payment_data)?
        } else {
            0
        };
        if acquired < pull {
            let held = self.balances.requester_balance(payer);
            return Err(EscrowError::InsufficientBalance {
                required: held.saturating_add(value).saturating_add(pull),
                available: held.saturating_add(value).saturating_add(acquired),
            });
        }

        if value > 0 {
            self.strategy.accept_value(payer, value)?;
        }
        value.checked_add(acquired).ok_or(EscrowError::Overflow)
    }
}

/// Shared, reentrancy-guarded handle to a [`BalanceTracker`].
pub struct PaymentTracker {
    payment_type: PaymentType,
    escrow_account: Address,
    inner: Guarded<BalanceTracker>,
}

impl PaymentTracker {
    pub fn new(strategy: Box<dyn PaymentStrategy>, drainer: Address) -> Self {
        Self {
            payment_type: strategy.payment_type(),
            escrow_account: strategy.escrow_account(),
            inner: Guarded::new(BalanceTracker::new(strategy, drainer)),
        }
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn escrow_account(&self) -> Address {
        self.escrow_account
    }

    pub fn deposit(
        &self,
        payer: &Address,
        value: u64,
        amount: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        self.inner
            .with(|t| t.deposit(payer, value, amount, payment_data))?
    }

    pub fn check_and_record_delivery_rates(
        &self,
        requester: &Address,
        count: u64,
        unit_rate: u64,
        value: u64,
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        self.inner.with(|t| {
            t.check_and_record_delivery_rates(requester, count, unit_rate, value, payment_data)
        })?
    }

    pub fn finalize_delivery_rates(
        &self,
        mech: &Address,
        requesters: &[Address],
        delivered: &[bool],
        actual_rates: &[u64],
        agreed_rates: &[u64],
    ) -> Result<u64, EscrowError> {
        self.inner.with(|t| {
            t.finalize_delivery_rates(mech, requesters, delivered, actual_rates, agreed_rates)
        })?
    }

    pub fn adjust_mech_requester_balances(
        &self,
        mech: &Address,
        requester: &Address,
        rates: &[u64],
        payment_data: &[u8],
    ) -> Result<u64, EscrowError> {
        self.inner
            .with(|t| t.adjust_mech_requester_balances(mech, requester, rates, payment_data))?
    }

    pub fn process_payment(&self, mech: &Address, fee_bps: u16) -> Result<PaymentSplit, EscrowError> {
        self.inner.with(|t| t.process_payment(mech, fee_bps))?
    }

    pub fn drain(&self) -> Result<u64, EscrowError> {
        self.inner.with(|t| t.drain())?
    }

    pub fn requester_balance(&self, account: &Address) -> Result<u64, EscrowError> {
        Ok(self.inner.read(|t| t.balances.requester_balance(account))?)
    }

    pub fn mech_balance(&self, mech: &Address) -> Result<u64, EscrowError> {
        Ok(self.inner.read(|t| t.balances.mech_balance(mech))?)
    }

    pub fn collected_fees(&self) -> Result<u64, EscrowError> {
        Ok(self.inner.read(|t| t.balances.collected_fees)?)
    }

    pub fn drainer(&self) -> Result<Address, EscrowError> {
        Ok(self.inner.read(|t| t.drainer)?)
    }

    /// Copy of the balances, for snapshots.
    pub fn balances(&self) -> Result<TrackerBalances, EscrowError> {
        Ok(self.inner.read(|t| t.balances.clone())?)
    }

    pub fn restore(&self, balances: TrackerBalances) -> Result<(), EscrowError> {
        Ok(self.inner.with(|t| t.balances = balances)?)
    }
}

impl std::fmt::Debug for PaymentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentTracker")
            .field("payment_type", &self.payment_type)
            .field("escrow_account", &self.escrow_account)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::strategy::{NativeStrategy, SubscriptionStrategy, TokenStrategy};
    use mech_protocol::config::CREDIT_RATIO_SCALE;
    use crate::token::{InMemoryTokenLedger, TokenLedger};
    use std::sync::Arc;

    struct Setup {
        ledger: Arc<InMemoryTokenLedger>,
        tracker: PaymentTracker,
        escrow: Address,
        drainer: Address,
    }

    fn token_setup() -> Setup {
        let ledger = Arc::new(InMemoryTokenLedger::new("olas"));
        let escrow = Address::derive("escrow/token");
        let drainer = Address::derive("drainer");
        let tracker = PaymentTracker::new(
            Box::new(TokenStrategy::new(ledger.clone(), escrow)),
            drainer,
        );
        Setup {
            ledger,
            tracker,
            escrow,
            drainer,
        }
    }

    fn native_setup() -> Setup {
        let ledger = Arc::new(InMemoryTokenLedger::new("native"));
        let escrow = Address::derive("escrow/native");
        let drainer = Address::derive("drainer");
        let tracker = PaymentTracker::new(
            Box::new(NativeStrategy::new(ledger.clone(), escrow)),
            drainer,
        );
        Setup {
            ledger,
            tracker,
            escrow,
            drainer,
        }
    }

    fn alice() -> Address {
        Address::derive("alice")
    }

    fn mech() -> Address {
        Address::derive("mech")
    }

    #[test]
    fn split_fee_is_ceiling_rounded() {
        // Floor would give 0 here.
        assert_eq!(split_fee(10, 1), (1, 9));
        assert_eq!(split_fee(10_000, 100), (100, 9_900));
        assert_eq!(split_fee(10_001, 100), (101, 9_900));
    }

    #[test]
    fn split_fee_never_takes_everything() {
        assert_eq!(split_fee(2, 9_999), (1, 1));
        assert_eq!(split_fee(3, 9_999), (2, 1));
        assert_eq!(split_fee(5, 0), (0, 5));
    }

    #[test]
    fn token_request_pulls_exact_shortfall() {
        let s = token_setup();
        s.ledger.mint(&alice(), 1_000).unwrap();
        s.tracker.deposit(&alice(), 0, 30, &[]).unwrap();

        let locked = s
            .tracker
            .check_and_record_delivery_rates(&alice(), 5, 10, 0, &[])
            .unwrap();
        assert_eq!(locked, 50);
        // 30 deposited, 20 pulled; nothing left over.
        assert_eq!(s.ledger.balance_of(&alice()), 950);
        assert_eq!(s.tracker.requester_balance(&alice()).unwrap(), 0);
        assert_eq!(s.ledger.balance_of(&s.escrow), 50);
    }

    #[test]
    fn token_request_without_funds_changes_nothing() {
        let s = token_setup();
        s.ledger.mint(&alice(), 5).unwrap();
        let err = s
            .tracker
            .check_and_record_delivery_rates(&alice(), 1, 10, 0, &[])
            .unwrap_err();
        assert!(matches!(err, EscrowError::Ledger(_)));
        assert_eq!(s.ledger.balance_of(&alice()), 5);
        assert_eq!(s.tracker.requester_balance(&alice()).unwrap(), 0);
    }

    #[test]
    fn native_request_uses_attached_value() {
        let s = native_setup();
        s.ledger.mint(&alice(), 100).unwrap();
        s.tracker
            .check_and_record_delivery_rates(&alice(), 2, 10, 25, &[])
            .unwrap();
        assert_eq!(s.tracker.requester_balance(&alice()).unwrap(), 5);
        assert_eq!(s.ledger.balance_of(&s.escrow), 25);
    }

    #[test]
    fn native_request_short_of_value_changes_nothing() {
        let s = native_setup();
        s.ledger.mint(&alice(), 100).unwrap();
        let err = s
            .tracker
            .check_and_record_delivery_rates(&alice(), 2, 10, 15, &[])
            .unwrap_err();
        assert_eq!(
            err,
            EscrowError::InsufficientBalance {
                required: 20,
                available: 15
            }
        );
        assert_eq!(s.ledger.balance_of(&alice()), 100);
        assert_eq!(s.ledger.balance_of(&s.escrow), 0);
    }

    #[test]
    fn token_tracker_rejects_attached_value() {
        let s = token_setup();
        s.ledger.mint(&alice(), 100).unwrap();
        assert_eq!(
            s.tracker
                .check_and_record_delivery_rates(&alice(), 1, 10, 10, &[]),
            Err(EscrowError::NoDepositAllowed)
        );
        assert_eq!(s.ledger.balance_of(&alice()), 100);
    }

    #[test]
    fn zero_total_is_rejected() {
        let s = token_setup();
        assert_eq!(
            s.tracker.check_and_record_delivery_rates(&alice(), 3, 0, 0, &[]),
            Err(EscrowError::ZeroValue)
        );
        assert_eq!(s.tracker.deposit(&alice(), 0, 0, &[]), Err(EscrowError::ZeroValue));
    }

    #[test]
    fn finalize_refunds_overestimate_and_credits_actual() {
        let s = token_setup();
        s.ledger.mint(&alice(), 30).unwrap();
        s.tracker
            .check_and_record_delivery_rates(&alice(), 3, 10, 0, &[])
            .unwrap();

        let credited = s
            .tracker
            .finalize_delivery_rates(
                &mech(),
                &[alice(), alice(), alice()],
                &[true, false, true],
                &[5, 15, 10],
                &[10, 10, 10],
            )
            .unwrap();
        assert_eq!(credited, 15);
        assert_eq!(s.tracker.mech_balance(&mech()).unwrap(), 15);
        // Item 1 refunds 5; item 2 stays locked until someone delivers it.
        assert_eq!(s.tracker.requester_balance(&alice()).unwrap(), 5);
    }

    #[test]
    fn finalize_never_credits_above_agreed() {
        let s = token_setup();
        let credited = s
            .tracker
            .finalize_delivery_rates(&mech(), &[alice()], &[true], &[50], &[10])
            .unwrap();
        assert_eq!(credited, 10);
    }

    #[test]
    fn finalize_rejects_zero_total_and_bad_lengths() {
        let s = token_setup();
        assert_eq!(
            s.tracker
                .finalize_delivery_rates(&mech(), &[alice()], &[false], &[5], &[5]),
            Err(EscrowError::ZeroValue)
        );
        assert_eq!(
            s.tracker
                .finalize_delivery_rates(&mech(), &[alice()], &[true, true], &[5], &[5]),
            Err(EscrowError::WrongArrayLength {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn process_payment_zeroes_balance_and_collects_fee() {
        let s = token_setup();
        s.ledger.mint(&alice(), 1_000).unwrap();
        s.tracker
            .adjust_mech_requester_balances(&mech(), &alice(), &[600, 400], &[])
            .unwrap();

        let split = s.tracker.process_payment(&mech(), 250).unwrap();
        assert_eq!(split.fee, 25);
        assert_eq!(split.payout, 975);
        assert_eq!(s.ledger.balance_of(&mech()), 975);
        assert_eq!(s.tracker.mech_balance(&mech()).unwrap(), 0);
        assert_eq!(s.tracker.collected_fees().unwrap(), 25);

        assert_eq!(s.tracker.drain().unwrap(), 25);
        assert_eq!(s.ledger.balance_of(&s.drainer), 25);
        assert_eq!(s.tracker.collected_fees().unwrap(), 0);
        assert_eq!(s.tracker.drain(), Err(EscrowError::ZeroValue));
    }

    #[test]
    fn process_payment_rejects_dust() {
        let s = token_setup();
        assert_eq!(
            s.tracker.process_payment(&mech(), 100),
            Err(EscrowError::NothingToPay { balance: 0 })
        );
        s.ledger.mint(&alice(), 1).unwrap();
        s.tracker
            .adjust_mech_requester_balances(&mech(), &alice(), &[1], &[])
            .unwrap();
        assert_eq!(
            s.tracker.process_payment(&mech(), 100),
            Err(EscrowError::NothingToPay { balance: 1 })
        );
    }

    #[test]
    fn failed_release_restores_balances() {
        // Credit a mech without funding the escrow account, so the release fails.
        let s = token_setup();
        s.tracker
            .finalize_delivery_rates(&mech(), &[alice()], &[true], &[10], &[10])
            .unwrap();
        let err = s.tracker.process_payment(&mech(), 100).unwrap_err();
        assert!(matches!(err, EscrowError::Ledger(_)));
        assert_eq!(s.tracker.mech_balance(&mech()).unwrap(), 10);
        assert_eq!(s.tracker.collected_fees().unwrap(), 0);
    }

    struct SubscriptionSetup {
        credits: Arc<InMemoryTokenLedger>,
        settlement: Arc<InMemoryTokenLedger>,
        tracker: PaymentTracker,
        drainer: Address,
    }

    /// Half a settlement token per credit, with a funded reserve.
    fn half_token_subscription() -> SubscriptionSetup {
        let credits = Arc::new(InMemoryTokenLedger::new("credits"));
        let settlement = Arc::new(InMemoryTokenLedger::new("olas"));
        let escrow = Address::derive("escrow/subscription");
        settlement.mint(&escrow, 1_000).unwrap();
        let drainer = Address::derive("drainer");
        let strategy = SubscriptionStrategy::new(
            credits.clone(),
            settlement.clone(),
            escrow,
            CREDIT_RATIO_SCALE / 2,
        )
        .unwrap();
        SubscriptionSetup {
            credits,
            settlement,
            tracker: PaymentTracker::new(Box::new(strategy), drainer),
            drainer,
        }
    }

    #[test]
    fn payout_below_one_settlement_unit_is_refused() {
        let s = half_token_subscription();
        s.credits.mint(&alice(), 10).unwrap();
        s.tracker
            .adjust_mech_requester_balances(&mech(), &alice(), &[2], &[])
            .unwrap();

        // Fee 1, share 1 credit = half a token.
        assert_eq!(
            s.tracker.process_payment(&mech(), 100),
            Err(EscrowError::NothingToPay { balance: 2 })
        );
        assert_eq!(s.tracker.mech_balance(&mech()).unwrap(), 2);
        assert_eq!(s.tracker.collected_fees().unwrap(), 0);
        assert_eq!(s.settlement.balance_of(&mech()), 0);
    }

    #[test]
    fn conversion_remainder_stays_on_mech_balance() {
        let s = half_token_subscription();
        s.credits.mint(&alice(), 10).unwrap();
        s.tracker
            .adjust_mech_requester_balances(&mech(), &alice(), &[4], &[])
            .unwrap();

        let split = s.tracker.process_payment(&mech(), 100).unwrap();
        assert_eq!(
            split,
            PaymentSplit {
                balance: 4,
                fee: 1,
                payout: 2,
                released: 1,
                retained: 1,
            }
        );
        assert_eq!(s.settlement.balance_of(&mech()), 1);
        assert_eq!(s.tracker.mech_balance(&mech()).unwrap(), 1);
        assert_eq!(s.tracker.collected_fees().unwrap(), 1);
        assert_eq!(split.fee + split.payout + split.retained, split.balance);

        // One credit of fees is half a token: nothing to drain yet.
        assert_eq!(s.tracker.drain(), Err(EscrowError::ZeroValue));
        assert_eq!(s.tracker.collected_fees().unwrap(), 1);
        assert_eq!(s.settlement.balance_of(&s.drainer), 0);
    }

    #[test]
    fn drain_keeps_unconverted_fees() {
        let s = half_token_subscription();
        s.tracker
            .restore(TrackerBalances {
                collected_fees: 3,
                ..TrackerBalances::default()
            })
            .unwrap();

        assert_eq!(s.tracker.drain().unwrap(), 1);
        assert_eq!(s.settlement.balance_of(&s.drainer), 1);
        assert_eq!(s.tracker.collected_fees().unwrap(), 1);
    }

    #[test]
    fn balances_snapshot_roundtrip() {
        let s = token_setup();
        s.ledger.mint(&alice(), 100).unwrap();
        s.tracker.deposit(&alice(), 0, 40, &[]).unwrap();
        let snap = s.tracker.balances().unwrap();

        let fresh = token_setup();
        fresh.tracker.restore(snap.clone()).unwrap();
        assert_eq!(fresh.tracker.balances().unwrap(), snap);
        assert_eq!(snap.total_held(), 40);
    }
}
