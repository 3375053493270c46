//! Shared handle to a [`Marketplace`].
//!
//! Concurrent callers are serialized. A collaborator that calls back into
//! the service while one of its calls is in flight gets
//! [`MarketplaceError::Reentrancy`].

use mech_protocol::identity::Address;

use crate::escrow::{PaymentSplit, PaymentType};
use crate::events::MarketplaceEvent;
use crate::guard::Guarded;
use crate::marketplace::{
    CallContext, Marketplace, MarketplaceError, RequestStatus, SignedDeliveryBatch,
};
use crate::request_id::RequestId;

pub struct MarketplaceService {
    inner: Guarded<Marketplace>,
}

impl MarketplaceService {
    pub fn new(marketplace: Marketplace) -> Self {
        Self {
            inner: Guarded::new(marketplace),
        }
    }

    /// Runs a mutating call.
    pub fn call<R>(
        &self,
        f: impl FnOnce(&mut Marketplace) -> Result<R, MarketplaceError>,
    ) -> Result<R, MarketplaceError> {
        self.inner.with(f)?
    }

    /// Runs a read.
    pub fn view<R>(&self, f: impl FnOnce(&Marketplace) -> R) -> Result<R, MarketplaceError> {
        Ok(self.inner.read(f)?)
    }

    pub fn request(
        &self,
        ctx: &CallContext,
        payload: &[u8],
        priority_mech_service_id: u64,
        requester_service_id: u64,
        response_timeout: u64,
        payment_data: &[u8],
    ) -> Result<RequestId, MarketplaceError> {
        self.call(|m| {
            m.request(
                ctx,
                payload,
                priority_mech_service_id,
                requester_service_id,
                response_timeout,
                payment_data,
            )
        })
    }

    pub fn request_batch(
        &self,
        ctx: &CallContext,
        payloads: &[Vec<u8>],
        priority_mech_service_id: u64,
        requester_service_id: u64,
        response_timeout: u64,
        payment_data: &[u8],
    ) -> Result<Vec<RequestId>, MarketplaceError> {
        self.call(|m| {
            m.request_batch(
                ctx,
                payloads,
                priority_mech_service_id,
                requester_service_id,
                response_timeout,
                payment_data,
            )
        })
    }

    pub fn deliver_marketplace(
        &self,
        ctx: &CallContext,
        request_ids: &[RequestId],
        delivery_rates: &[u64],
        results: &[Vec<u8>],
    ) -> Result<Vec<bool>, MarketplaceError> {
        self.call(|m| m.deliver_marketplace(ctx, request_ids, delivery_rates, results))
    }

    pub fn deliver_marketplace_with_signatures(
        &self,
        ctx: &CallContext,
        batch: &SignedDeliveryBatch,
    ) -> Result<Vec<RequestId>, MarketplaceError> {
        self.call(|m| m.deliver_marketplace_with_signatures(ctx, batch))
    }

    pub fn deposit(
        &self,
        ctx: &CallContext,
        payment_type: PaymentType,
        amount: u64,
        payment_data: &[u8],
    ) -> Result<u64, MarketplaceError> {
        self.call(|m| m.deposit(ctx, payment_type, amount, payment_data))
    }

    pub fn process_payment(
        &self,
        ctx: &CallContext,
        mech: &Address,
    ) -> Result<PaymentSplit, MarketplaceError> {
        self.call(|m| m.process_payment(ctx, mech))
    }

    pub fn drain(
        &self,
        ctx: &CallContext,
        payment_type: PaymentType,
    ) -> Result<u64, MarketplaceError> {
        self.call(|m| m.drain(ctx, payment_type))
    }

    pub fn request_status(&self, id: &RequestId, now: u64) -> Result<RequestStatus, MarketplaceError> {
        self.view(|m| m.request_status(id, now))
    }

    pub fn nonce(&self, account: &Address) -> Result<u64, MarketplaceError> {
        self.view(|m| m.nonce(account))
    }

    pub fn take_events(&self) -> Result<Vec<MarketplaceEvent>, MarketplaceError> {
        self.call(|m| Ok(m.take_events()))
    }
}

impl std::fmt::Debug for MarketplaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceService").finish_non_exhaustive()
    }
}
