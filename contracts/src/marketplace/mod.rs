//! The marketplace: request lifecycle, delivery routing and payment
//! settlement.
//!
//! Every entry point follows the same order. All checks run first. Then at
//! most one escrow call, the only step after validation that can fail.
//! Then local writes, karma updates and events. A call that returns an
//! error therefore leaves nothing behind.
//!
//! `Marketplace` itself is plain `&mut self` state. Wrap it in
//! [`MarketplaceService`](crate::service::MarketplaceService) to share it
//! across threads with reentrancy protection.

mod config;
mod deliver;
mod error;
mod request;
mod types;

pub use config::MarketplaceConfig;
pub use deliver::SignedDeliveryBatch;
pub use error::MarketplaceError;
pub use types::{CallContext, Counters, MarketplaceState, RequestRecord, RequestStatus};

use mech_protocol::config::{MAX_BATCH_SIZE, MAX_PAGE_SIZE};
use mech_protocol::identity::Address;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::escrow::{PaymentSplit, PaymentTracker, PaymentType};
use crate::events::MarketplaceEvent;
use crate::karma::ReputationLedger;
use crate::registry::{FulfillerRegistry, MechProfile};
use crate::request_id::{request_id, RequestId};
use crate::verifier::AuthorizationVerifier;

/// External systems the marketplace consults.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn FulfillerRegistry>,
    pub karma: Arc<dyn ReputationLedger>,
    pub verifier: Arc<dyn AuthorizationVerifier>,
}

pub struct Marketplace {
    state: MarketplaceState,
    registry: Arc<dyn FulfillerRegistry>,
    karma: Arc<dyn ReputationLedger>,
    verifier: Arc<dyn AuthorizationVerifier>,
    trackers: BTreeMap<PaymentType, Arc<PaymentTracker>>,
    events: Vec<MarketplaceEvent>,
}

impl Marketplace {
    /// Creates an empty marketplace living at `address` on `chain_id`.
    pub fn new(
        owner: Address,
        address: Address,
        chain_id: u64,
        config: MarketplaceConfig,
        collaborators: Collaborators,
    ) -> Result<Self, MarketplaceError> {
        if owner.is_zero() || address.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        config.validate()?;
        Self::restore(MarketplaceState::new(owner, address, chain_id, config), collaborators)
    }

    /// Rebuilds a marketplace from a snapshot. Trackers are attached
    /// separately since their balances live with them.
    pub fn restore(
        state: MarketplaceState,
        collaborators: Collaborators,
    ) -> Result<Self, MarketplaceError> {
        state.config.validate()?;
        Ok(Self {
            state,
            registry: collaborators.registry,
            karma: collaborators.karma,
            verifier: collaborators.verifier,
            trackers: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    /// Attaches a tracker at construction time, without an event.
    pub fn with_tracker(mut self, tracker: Arc<PaymentTracker>) -> Self {
        self.trackers.insert(tracker.payment_type(), tracker);
        self
    }

    pub fn with_factory(mut self, factory: Address) -> Self {
        self.state.factories.insert(factory);
        self
    }

    // -- Reads --------------------------------------------------------------

    pub fn owner(&self) -> Address {
        self.state.owner
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.state.config
    }

    pub fn state(&self) -> &MarketplaceState {
        &self.state
    }

    pub fn counters(&self) -> Counters {
        self.state.counters
    }

    pub fn request_record(&self, id: &RequestId) -> Option<&RequestRecord> {
        self.state.requests.get(id)
    }

    pub fn request_status(&self, id: &RequestId, now: u64) -> RequestStatus {
        match self.state.requests.get(id) {
            Some(record) => record.status(now),
            None => RequestStatus::DoesNotExist,
        }
    }

    pub fn nonce(&self, account: &Address) -> u64 {
        self.state.nonce(account)
    }

    pub fn requester_requests(&self, account: &Address) -> u64 {
        self.state.requester_requests.get(account).copied().unwrap_or(0)
    }

    pub fn requester_deliveries(&self, account: &Address) -> u64 {
        self.state.requester_deliveries.get(account).copied().unwrap_or(0)
    }

    pub fn mech_deliveries(&self, mech: &Address) -> u64 {
        self.state.mech_deliveries.get(mech).copied().unwrap_or(0)
    }

    pub fn is_factory_enabled(&self, factory: &Address) -> bool {
        self.state.factories.contains(factory)
    }

    /// Undelivered request ids, oldest first. `limit` is capped at
    /// `MAX_PAGE_SIZE`.
    pub fn undelivered_requests(&self, offset: usize, limit: usize) -> Vec<RequestId> {
        self.state.pending.page(offset, limit.min(MAX_PAGE_SIZE))
    }

    pub fn domain_separator(&self, chain_id: u64) -> [u8; 32] {
        self.state.domain.for_chain(chain_id)
    }

    /// The id a request by `requester` with `payload` and `nonce` would get
    /// on `chain_id`. Signers use it to build delivery authorizations.
    pub fn request_id_for(
        &self,
        requester: &Address,
        payload: &[u8],
        nonce: u64,
        chain_id: u64,
    ) -> RequestId {
        request_id(&self.domain_separator(chain_id), requester, payload, nonce)
    }

    pub fn tracker(&self, payment_type: PaymentType) -> Option<Arc<PaymentTracker>> {
        self.trackers.get(&payment_type).cloned()
    }

    pub fn trackers(&self) -> impl Iterator<Item = &Arc<PaymentTracker>> {
        self.trackers.values()
    }

    pub fn karma(&self) -> &Arc<dyn ReputationLedger> {
        &self.karma
    }

    pub fn registry(&self) -> &Arc<dyn FulfillerRegistry> {
        &self.registry
    }

    /// Drains the events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<MarketplaceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Events emitted since the last [`take_events`](Self::take_events).
    pub fn pending_events(&self) -> &[MarketplaceEvent] {
        &self.events
    }

    /// Puts the state back to `state` and discards unread events. Trackers
    /// and collaborators are rewound by their owners.
    pub fn rewind(&mut self, state: MarketplaceState) -> Result<(), MarketplaceError> {
        state.config.validate()?;
        self.state = state;
        self.events.clear();
        Ok(())
    }

    // -- Escrow -------------------------------------------------------------

    /// Prefunds the caller's balance with attached value and `amount`
    /// pulled from their account. Returns the new balance.
    pub fn deposit(
        &mut self,
        ctx: &CallContext,
        payment_type: PaymentType,
        amount: u64,
        payment_data: &[u8],
    ) -> Result<u64, MarketplaceError> {
        if ctx.caller.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        let tracker = self.require_tracker(payment_type)?;
        let balance = tracker.deposit(&ctx.caller, ctx.value, amount, payment_data)?;

        let total = ctx.value.saturating_add(amount);
        self.events.push(MarketplaceEvent::Deposit {
            account: ctx.caller,
            payment_type,
            amount: total,
        });
        info!(account = %ctx.caller, %payment_type, amount = total, balance, "deposit");
        Ok(balance)
    }

    /// Pays `mech` its accumulated balance minus the fee. Callable by the
    /// mech itself or by the operator of its service.
    pub fn process_payment(
        &mut self,
        ctx: &CallContext,
        mech: &Address,
    ) -> Result<PaymentSplit, MarketplaceError> {
        let profile = self
            .registry
            .mech_profile(mech)
            .ok_or(MarketplaceError::UnauthorizedMech { mech: *mech })?;
        if ctx.caller != *mech && !self.registry.is_operator(&ctx.caller, profile.service_id) {
            return Err(MarketplaceError::UnauthorizedAccount {
                account: ctx.caller,
            });
        }
        let tracker = self.require_tracker(profile.payment_type)?;
        let split = tracker.process_payment(mech, self.state.config.fee_bps)?;

        self.events.push(MarketplaceEvent::Withdraw {
            mech: *mech,
            payment_type: profile.payment_type,
            payout: split.released,
            fee: split.fee,
        });
        Ok(split)
    }

    /// Sends the collected fees of one tracker to its drainer.
    pub fn drain(
        &mut self,
        ctx: &CallContext,
        payment_type: PaymentType,
    ) -> Result<u64, MarketplaceError> {
        let tracker = self.require_tracker(payment_type)?;
        let drainer = tracker.drainer()?;
        if ctx.caller != drainer && ctx.caller != self.state.owner {
            return Err(MarketplaceError::UnauthorizedAccount {
                account: ctx.caller,
            });
        }
        let amount = tracker.drain()?;
        self.events.push(MarketplaceEvent::Drained {
            payment_type,
            drainer,
            amount,
        });
        Ok(amount)
    }

    // -- Owner administration -----------------------------------------------

    pub fn change_owner(
        &mut self,
        ctx: &CallContext,
        new_owner: Address,
    ) -> Result<(), MarketplaceError> {
        self.require_owner(ctx)?;
        if new_owner.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        self.state.owner = new_owner;
        self.events.push(MarketplaceEvent::OwnerUpdated { owner: new_owner });
        info!(owner = %new_owner, "owner changed");
        Ok(())
    }

    pub fn set_fee(&mut self, ctx: &CallContext, fee_bps: u16) -> Result<(), MarketplaceError> {
        self.require_owner(ctx)?;
        config::validate_fee(fee_bps)?;
        self.state.config.fee_bps = fee_bps;
        self.events.push(MarketplaceEvent::FeeUpdated { fee_bps });
        Ok(())
    }

    pub fn set_response_timeouts(
        &mut self,
        ctx: &CallContext,
        min: u64,
        max: u64,
    ) -> Result<(), MarketplaceError> {
        self.require_owner(ctx)?;
        config::validate_timeouts(min, max)?;
        self.state.config.min_response_timeout = min;
        self.state.config.max_response_timeout = max;
        self.events
            .push(MarketplaceEvent::ResponseTimeoutsUpdated { min, max });
        Ok(())
    }

    pub fn set_factory_status(
        &mut self,
        ctx: &CallContext,
        factory: Address,
        enabled: bool,
    ) -> Result<(), MarketplaceError> {
        self.require_owner(ctx)?;
        if factory.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        if enabled {
            self.state.factories.insert(factory);
        } else {
            self.state.factories.remove(&factory);
        }
        self.events
            .push(MarketplaceEvent::FactoryStatusUpdated { factory, enabled });
        Ok(())
    }

    /// Installs or replaces the tracker for `payment_type`.
    pub fn set_payment_tracker(
        &mut self,
        ctx: &CallContext,
        payment_type: PaymentType,
        tracker: Arc<PaymentTracker>,
    ) -> Result<(), MarketplaceError> {
        self.require_owner(ctx)?;
        if tracker.payment_type() != payment_type {
            return Err(MarketplaceError::PaymentTypeMismatch {
                expected: payment_type,
                got: tracker.payment_type(),
            });
        }
        let escrow_account = tracker.escrow_account();
        self.trackers.insert(payment_type, tracker);
        self.events.push(MarketplaceEvent::PaymentTrackerUpdated {
            payment_type,
            escrow_account,
        });
        Ok(())
    }

    // -- Shared checks ------------------------------------------------------

    fn require_owner(&self, ctx: &CallContext) -> Result<(), MarketplaceError> {
        if ctx.caller != self.state.owner {
            return Err(MarketplaceError::OwnerOnly {
                owner: self.state.owner,
                caller: ctx.caller,
            });
        }
        Ok(())
    }

    fn require_tracker(
        &self,
        payment_type: PaymentType,
    ) -> Result<Arc<PaymentTracker>, MarketplaceError> {
        self.tracker(payment_type)
            .ok_or(MarketplaceError::UnknownPaymentType { payment_type })
    }

    /// A mech may act only if it is registered, came from an enabled
    /// factory, and its service is deployed and maps back to it.
    fn authorized_mech(&self, mech: &Address) -> Result<MechProfile, MarketplaceError> {
        let unauthorized = MarketplaceError::UnauthorizedMech { mech: *mech };
        let profile = self.registry.mech_profile(mech).ok_or(unauthorized.clone())?;
        if !self.state.factories.contains(&profile.factory) {
            return Err(unauthorized);
        }
        let deployed = self
            .registry
            .service(profile.service_id)
            .is_some_and(|s| s.is_deployed());
        let maps_back = self.registry.mech_for_service(profile.service_id) == Some(*mech);
        if !deployed || !maps_back {
            return Err(unauthorized);
        }
        Ok(profile)
    }

    /// Service id 0 means the requester acts as a plain account. Otherwise
    /// it must operate that deployed service.
    fn check_requester(
        &self,
        requester: &Address,
        requester_service_id: u64,
    ) -> Result<(), MarketplaceError> {
        if requester_service_id == 0 {
            return Ok(());
        }
        let ok = self
            .registry
            .service(requester_service_id)
            .is_some_and(|s| s.is_deployed() && s.operator == *requester);
        if !ok {
            return Err(MarketplaceError::UnauthorizedAccount {
                account: *requester,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_batch_len(len: usize) -> Result<(), MarketplaceError> {
    if len == 0 {
        return Err(MarketplaceError::EmptyBatch);
    }
    if len > MAX_BATCH_SIZE {
        return Err(MarketplaceError::OutOfBounds {
            provided: len as u64,
            min: 1,
            max: MAX_BATCH_SIZE as u64,
        });
    }
    Ok(())
}

pub(crate) fn check_same_len(expected: usize, got: usize) -> Result<(), MarketplaceError> {
    if expected != got {
        return Err(MarketplaceError::WrongArrayLength { expected, got });
    }
    Ok(())
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("address", &self.state.address)
            .field("owner", &self.state.owner)
            .field("counters", &self.state.counters)
            .field("trackers", &self.trackers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testkit;

#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;

    #[test]
    fn admin_calls_are_owner_only() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let stranger = CallContext::new(kit.requester, T0, CHAIN);
        assert!(matches!(
            m.set_fee(&stranger, 10),
            Err(MarketplaceError::OwnerOnly { .. })
        ));
        m.set_fee(&kit.owner_ctx(), 10).unwrap();
        assert_eq!(m.config().fee_bps, 10);
        assert!(m.set_fee(&kit.owner_ctx(), 10_000).is_err());
    }

    #[test]
    fn change_owner_hands_over_control() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        m.change_owner(&kit.owner_ctx(), kit.requester).unwrap();
        assert_eq!(m.owner(), kit.requester);
        assert!(m.set_fee(&kit.owner_ctx(), 5).is_err());
        assert_eq!(
            m.change_owner(&CallContext::new(kit.requester, T0, CHAIN), Address::ZERO),
            Err(MarketplaceError::ZeroAddress)
        );
    }

    #[test]
    fn disabling_factory_deauthorizes_its_mechs() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        m.set_factory_status(&kit.owner_ctx(), kit.factory, false)
            .unwrap();
        let err = m
            .request(&kit.requester_ctx(), b"q", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap_err();
        assert_eq!(err, MarketplaceError::UnauthorizedMech { mech: kit.priority });
    }

    #[test]
    fn tracker_type_must_match_slot() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let native = m.tracker(PaymentType::Native).unwrap();
        assert!(matches!(
            m.set_payment_tracker(&kit.owner_ctx(), PaymentType::Token, native.clone()),
            Err(MarketplaceError::PaymentTypeMismatch { .. })
        ));
        m.set_payment_tracker(&kit.owner_ctx(), PaymentType::Native, native)
            .unwrap();
    }

    #[test]
    fn process_payment_by_operator_or_mech_only() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let id = m
            .request(&kit.requester_ctx().with_value(RATE), b"q", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap();
        m.deliver_marketplace(&kit.mech_ctx(kit.priority, T0 + 1), &[id], &[RATE], &[b"r".to_vec()])
            .unwrap();

        let stranger = CallContext::new(kit.requester, T0, CHAIN);
        assert!(matches!(
            m.process_payment(&stranger, &kit.priority),
            Err(MarketplaceError::UnauthorizedAccount { .. })
        ));
        let operator = CallContext::new(kit.priority_operator, T0, CHAIN);
        let split = m.process_payment(&operator, &kit.priority).unwrap();
        assert_eq!(split.balance, RATE);
        assert_eq!(split.fee + split.payout, RATE);
        assert_eq!(kit.native.balance_of(&kit.priority), split.released);
    }

    #[test]
    fn drain_requires_drainer_or_owner() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let stranger = CallContext::new(kit.requester, T0, CHAIN);
        assert!(matches!(
            m.drain(&stranger, PaymentType::Native),
            Err(MarketplaceError::UnauthorizedAccount { .. })
        ));
        // Nothing collected yet.
        assert!(matches!(
            m.drain(&kit.owner_ctx(), PaymentType::Native),
            Err(MarketplaceError::Escrow(_))
        ));
    }

    #[test]
    fn undelivered_page_is_capped() {
        let kit = Kit::new();
        let m = kit.marketplace();
        assert!(m.undelivered_requests(0, usize::MAX).is_empty());
    }
}
