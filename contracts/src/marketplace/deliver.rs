use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::types::bump;
use super::types::RequestRecord;
use super::{check_batch_len, check_same_len, CallContext, Marketplace, MarketplaceError};
use crate::escrow::EscrowError;
use crate::events::{hex_bytes, hex_vecs, MarketplaceEvent};
use crate::request_id::{request_id, RequestId};

/// Requests a requester authorized offline, delivered and settled in one
/// call by the mech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDeliveryBatch {
    pub requester: Address,
    /// 0 when the requester acts as a plain account.
    #[serde(default)]
    pub requester_service_id: u64,
    #[serde(with = "hex_vecs")]
    pub payloads: Vec<Vec<u8>>,
    /// One authorization proof per payload, over the request id.
    #[serde(with = "hex_vecs")]
    pub auth_proofs: Vec<Vec<u8>>,
    #[serde(with = "hex_vecs")]
    pub results: Vec<Vec<u8>>,
    pub delivery_rates: Vec<u64>,
    #[serde(default, with = "hex_bytes")]
    pub payment_data: Vec<u8>,
}

impl Marketplace {
    /// Delivers results for existing requests. The caller is the mech.
    ///
    /// Returns one flag per id: `true` if that request was delivered by this
    /// call. Requests already delivered, repeated within the batch, or
    /// claimed at more than their agreed rate are skipped. Delivering
    /// someone else's request before its deadline fails the whole call.
    pub fn deliver_marketplace(
        &mut self,
        ctx: &CallContext,
        request_ids: &[RequestId],
        delivery_rates: &[u64],
        results: &[Vec<u8>],
    ) -> Result<Vec<bool>, MarketplaceError> {
        let mech = ctx.caller;
        let n = request_ids.len();
        check_batch_len(n)?;
        check_same_len(n, delivery_rates.len())?;
        check_same_len(n, results.len())?;
        let profile = self.authorized_mech(&mech)?;
        let tracker = self.require_tracker(profile.payment_type)?;
        let now = ctx.timestamp;

        let mut delivered = vec![false; n];
        let mut requesters = Vec::with_capacity(n);
        let mut agreed = Vec::with_capacity(n);
        let mut failovers = Vec::new();
        let mut seen = BTreeSet::new();
        for (i, id) in request_ids.iter().enumerate() {
            let record = self
                .state
                .requests
                .get(id)
                .ok_or(MarketplaceError::RequestNotFound { id: *id })?;
            requesters.push(record.requester);
            agreed.push(record.agreed_rate);

            if record.payment_type != profile.payment_type {
                return Err(MarketplaceError::PaymentTypeMismatch {
                    expected: profile.payment_type,
                    got: record.payment_type,
                });
            }
            if record.is_delivered() || !seen.insert(*id) {
                debug!(request_id = %id, "already delivered, skipped");
                continue;
            }
            let is_priority = record.priority_mech == mech;
            if !is_priority && now <= record.response_deadline {
                return Err(MarketplaceError::PriorityMechResponseTimeout {
                    deadline: record.response_deadline,
                    now,
                });
            }
            if delivery_rates[i] > record.agreed_rate {
                debug!(
                    request_id = %id,
                    claimed = delivery_rates[i],
                    agreed = record.agreed_rate,
                    "delivery rate above agreed rate, skipped"
                );
                continue;
            }
            delivered[i] = true;
            if !is_priority {
                failovers.push((i, record.priority_mech));
            }
        }

        let count = delivered.iter().filter(|d| **d).count() as u64;
        if count == 0 {
            return Ok(delivered);
        }
        let credited =
            tracker.finalize_delivery_rates(&mech, &requesters, &delivered, delivery_rates, &agreed)?;

        for (i, id) in request_ids.iter().enumerate() {
            if !delivered[i] {
                continue;
            }
            if let Some(record) = self.state.requests.get_mut(id) {
                record.delivery_mech = mech;
                record.delivered_at = Some(now);
            }
            self.state.pending.remove(id);
            bump(&mut self.state.requester_deliveries, &requesters[i], 1);
            self.events.push(MarketplaceEvent::Deliver {
                request_id: *id,
                requester: requesters[i],
                mech,
                delivery_rate: delivery_rates[i].min(agreed[i]),
                result: results[i].clone(),
            });
        }
        for (i, priority_mech) in &failovers {
            warn!(
                request_id = %request_ids[*i],
                priority_mech = %priority_mech,
                delivery_mech = %mech,
                "priority mech missed its window"
            );
            self.karma.change_mech_karma(priority_mech, -1);
            self.events.push(MarketplaceEvent::Failover {
                request_id: request_ids[*i],
                priority_mech: *priority_mech,
                delivery_mech: mech,
            });
        }
        self.record_deliveries(&mech, count);
        self.karma.change_mech_karma(&mech, count as i64);

        info!(
            mech = %mech,
            delivered = count,
            skipped = n as u64 - count,
            failovers = failovers.len(),
            credited,
            "deliveries settled"
        );
        Ok(delivered)
    }

    /// Creates and delivers requests in one step using requester
    /// authorizations gathered offline. The caller is the mech. All or
    /// nothing: any bad signature, seen id or rate above the mech's
    /// maximum fails the whole batch.
    pub fn deliver_marketplace_with_signatures(
        &mut self,
        ctx: &CallContext,
        batch: &SignedDeliveryBatch,
    ) -> Result<Vec<RequestId>, MarketplaceError> {
        let mech = ctx.caller;
        let requester = batch.requester;
        if requester.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        // Requesters prefund; nothing may ride along with the call.
        if ctx.value > 0 {
            return Err(EscrowError::NoDepositAllowed.into());
        }
        let n = batch.payloads.len();
        check_batch_len(n)?;
        check_same_len(n, batch.auth_proofs.len())?;
        check_same_len(n, batch.results.len())?;
        check_same_len(n, batch.delivery_rates.len())?;
        if let Some(index) = batch.payloads.iter().position(|p| p.is_empty()) {
            return Err(MarketplaceError::EmptyPayload { index });
        }

        let profile = self.authorized_mech(&mech)?;
        self.check_requester(&requester, batch.requester_service_id)?;
        let tracker = self.require_tracker(profile.payment_type)?;
        if let Some(&rate) = batch
            .delivery_rates
            .iter()
            .find(|r| **r > profile.max_delivery_rate)
        {
            return Err(MarketplaceError::OutOfBounds {
                provided: rate,
                min: 0,
                max: profile.max_delivery_rate,
            });
        }

        let domain = self.domain_separator(ctx.chain_id);
        let nonce = self.state.nonce(&requester);
        let count = n as u64;
        let next_nonce = nonce.checked_add(count).ok_or(MarketplaceError::Overflow {
            provided: nonce,
            max: u64::MAX - count,
        })?;
        let mut ids = Vec::with_capacity(n);
        for (index, payload) in batch.payloads.iter().enumerate() {
            let id = request_id(&domain, &requester, payload, nonce + index as u64);
            if self.state.requests.contains_key(&id) {
                return Err(MarketplaceError::AlreadyRequested { id });
            }
            if !self
                .verifier
                .verify(&requester, id.as_bytes(), &batch.auth_proofs[index])
            {
                return Err(MarketplaceError::SignatureNotValid { requester, index });
            }
            ids.push(id);
        }

        let total = tracker.adjust_mech_requester_balances(
            &mech,
            &requester,
            &batch.delivery_rates,
            &batch.payment_data,
        )?;

        let now = ctx.timestamp;
        for (i, id) in ids.iter().enumerate() {
            self.state.requests.insert(
                *id,
                RequestRecord {
                    priority_mech: mech,
                    delivery_mech: mech,
                    requester,
                    response_deadline: now,
                    agreed_rate: batch.delivery_rates[i],
                    payment_type: profile.payment_type,
                    requested_at: now,
                    delivered_at: Some(now),
                },
            );
            self.events.push(MarketplaceEvent::DeliverWithSignature {
                request_id: *id,
                requester,
                mech,
                delivery_rate: batch.delivery_rates[i],
                payload: batch.payloads[i].clone(),
                result: batch.results[i].clone(),
            });
        }
        self.state.nonces.insert(requester, next_nonce);
        let counters = &mut self.state.counters;
        counters.total_requests = counters.total_requests.saturating_add(count);
        bump(&mut self.state.requester_requests, &requester, count);
        bump(&mut self.state.requester_deliveries, &requester, count);
        self.record_deliveries(&mech, count);
        self.karma.change_mech_karma(&mech, count as i64);
        self.karma
            .change_requester_mech_karma(&requester, &mech, count as i64);

        info!(
            mech = %mech,
            requester = %requester,
            count,
            total,
            "signed deliveries settled"
        );
        Ok(ids)
    }

    /// Counter updates shared by both delivery paths. Signed deliveries
    /// never enter the undelivered set, so only `count` of marketplace
    /// deliveries leave it.
    fn record_deliveries(&mut self, mech: &Address, count: u64) {
        let counters = &mut self.state.counters;
        counters.total_deliveries = counters.total_deliveries.saturating_add(count);
        counters.undelivered = self.state.pending.len() as u64;
        bump(&mut self.state.mech_deliveries, mech, count);
    }
}
