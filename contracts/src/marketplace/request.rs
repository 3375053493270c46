use mech_protocol::config::MAX_TIMESTAMP;
use mech_protocol::identity::Address;
use tracing::info;

use super::types::{bump, RequestRecord};
use super::{check_batch_len, CallContext, Marketplace, MarketplaceError};
use crate::events::MarketplaceEvent;
use crate::request_id::{request_id, RequestId};

impl Marketplace {
    /// Posts one request to the mech behind `priority_mech_service_id`.
    /// See [`Marketplace::request_batch`].
    pub fn request(
        &mut self,
        ctx: &CallContext,
        payload: &[u8],
        priority_mech_service_id: u64,
        requester_service_id: u64,
        response_timeout: u64,
        payment_data: &[u8],
    ) -> Result<RequestId, MarketplaceError> {
        let ids = self.request_batch(
            ctx,
            &[payload.to_vec()],
            priority_mech_service_id,
            requester_service_id,
            response_timeout,
            payment_data,
        )?;
        ids.into_iter().next().ok_or(MarketplaceError::EmptyBatch)
    }

    /// Posts a batch of requests to one priority mech, locking
    /// `agreed_rate * payloads.len()` in escrow.
    ///
    /// The priority mech has exclusive delivery rights until
    /// `timestamp + response_timeout`. After that any authorized mech may
    /// deliver.
    pub fn request_batch(
        &mut self,
        ctx: &CallContext,
        payloads: &[Vec<u8>],
        priority_mech_service_id: u64,
        requester_service_id: u64,
        response_timeout: u64,
        payment_data: &[u8],
    ) -> Result<Vec<RequestId>, MarketplaceError> {
        let requester = ctx.caller;
        if requester.is_zero() {
            return Err(MarketplaceError::ZeroAddress);
        }
        check_batch_len(payloads.len())?;
        if let Some(index) = payloads.iter().position(|p| p.is_empty()) {
            return Err(MarketplaceError::EmptyPayload { index });
        }
        let deadline = self.response_deadline(ctx.timestamp, response_timeout)?;

        let mech = self
            .registry
            .mech_for_service(priority_mech_service_id)
            .ok_or(MarketplaceError::UnknownService {
                service_id: priority_mech_service_id,
            })?;
        let profile = self.authorized_mech(&mech)?;
        self.check_requester(&requester, requester_service_id)?;
        let tracker = self.require_tracker(profile.payment_type)?;
        let agreed_rate = profile.max_delivery_rate;
        if agreed_rate == 0 {
            return Err(MarketplaceError::ZeroValue);
        }

        let domain = self.domain_separator(ctx.chain_id);
        let nonce = self.state.nonce(&requester);
        let count = payloads.len() as u64;
        let next_nonce = nonce.checked_add(count).ok_or(MarketplaceError::Overflow {
            provided: nonce,
            max: u64::MAX - count,
        })?;
        let mut ids = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            let id = request_id(&domain, &requester, payload, nonce + i as u64);
            if self.state.requests.contains_key(&id) {
                return Err(MarketplaceError::AlreadyRequested { id });
            }
            ids.push(id);
        }

        let locked = tracker.check_and_record_delivery_rates(
            &requester,
            count,
            agreed_rate,
            ctx.value,
            payment_data,
        )?;

        for (id, payload) in ids.iter().zip(payloads) {
            self.state.requests.insert(
                *id,
                RequestRecord {
                    priority_mech: mech,
                    delivery_mech: Address::ZERO,
                    requester,
                    response_deadline: deadline,
                    agreed_rate,
                    payment_type: profile.payment_type,
                    requested_at: ctx.timestamp,
                    delivered_at: None,
                },
            );
            self.state.pending.insert(*id);
            self.events.push(MarketplaceEvent::Request {
                request_id: *id,
                requester,
                priority_mech: mech,
                response_deadline: deadline,
                agreed_rate,
                payment_type: profile.payment_type,
                payload: payload.clone(),
            });
        }
        self.state.nonces.insert(requester, next_nonce);
        let counters = &mut self.state.counters;
        counters.total_requests = counters.total_requests.saturating_add(count);
        counters.undelivered = counters.undelivered.saturating_add(count);
        bump(&mut self.state.requester_requests, &requester, count);
        self.karma
            .change_requester_mech_karma(&requester, &mech, count as i64);

        info!(
            requester = %requester,
            mech = %mech,
            count,
            locked,
            deadline,
            payment_type = %profile.payment_type,
            "requests posted"
        );
        Ok(ids)
    }

    fn response_deadline(&self, now: u64, response_timeout: u64) -> Result<u64, MarketplaceError> {
        let cfg = &self.state.config;
        if response_timeout < cfg.min_response_timeout || response_timeout > cfg.max_response_timeout
        {
            return Err(MarketplaceError::OutOfBounds {
                provided: response_timeout,
                min: cfg.min_response_timeout,
                max: cfg.max_response_timeout,
            });
        }
        match now.checked_add(response_timeout) {
            Some(deadline) if deadline <= MAX_TIMESTAMP => Ok(deadline),
            _ => Err(MarketplaceError::Overflow {
                provided: now.saturating_add(response_timeout),
                max: MAX_TIMESTAMP,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::super::{MarketplaceError, RequestStatus};
    use crate::escrow::{EscrowError, PaymentType};
    use crate::events::MarketplaceEvent;
    use crate::karma::ReputationLedger;
    use crate::token::TokenLedger;

    #[test]
    fn request_records_and_locks_funds() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let id = m
            .request(&kit.requester_ctx().with_value(RATE), b"hello", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap();

        let rec = m.request_record(&id).unwrap();
        assert_eq!(rec.priority_mech, kit.priority);
        assert_eq!(rec.requester, kit.requester);
        assert_eq!(rec.response_deadline, T0 + TIMEOUT);
        assert_eq!(rec.agreed_rate, RATE);
        assert!(!rec.is_delivered());
        assert_eq!(m.request_status(&id, T0), RequestStatus::RequestedPriority);
        assert_eq!(m.nonce(&kit.requester), 1);
        assert_eq!(m.counters().undelivered, 1);
        assert_eq!(m.undelivered_requests(0, 10), vec![id]);
        assert_eq!(kit.karma.requester_mech_karma(&kit.requester, &kit.priority), 1);

        let tracker = m.tracker(PaymentType::Native).unwrap();
        assert_eq!(tracker.requester_balance(&kit.requester).unwrap(), 0);
        assert_eq!(kit.native.balance_of(&kit.native_escrow), RATE);
        assert!(matches!(
            m.take_events().as_slice(),
            [MarketplaceEvent::Request { agreed_rate: RATE, .. }]
        ));
    }

    #[test]
    fn ids_match_the_public_derivation() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let expected = m.request_id_for(&kit.requester, b"p", 0, CHAIN);
        let id = m
            .request(&kit.requester_ctx().with_value(RATE), b"p", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap();
        assert_eq!(id, expected);
    }

    #[test]
    fn same_payload_twice_gets_distinct_ids() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let ids = m
            .request_batch(
                &kit.requester_ctx().with_value(2 * RATE),
                &[b"same".to_vec(), b"same".to_vec()],
                kit.priority_service,
                0,
                TIMEOUT,
                &[],
            )
            .unwrap();
        assert_ne!(ids[0], ids[1]);
        assert_eq!(m.nonce(&kit.requester), 2);
    }

    #[test]
    fn underfunded_request_leaves_no_trace() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let err = m
            .request(&kit.requester_ctx().with_value(RATE - 1), b"q", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            MarketplaceError::Escrow(EscrowError::InsufficientBalance { .. })
        ));
        assert_eq!(m.nonce(&kit.requester), 0);
        assert_eq!(m.counters().total_requests, 0);
        assert!(m.take_events().is_empty());
        assert_eq!(kit.native.balance_of(&kit.native_escrow), 0);
    }

    #[test]
    fn validation_failures() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let ctx = kit.requester_ctx().with_value(RATE);

        assert_eq!(
            m.request_batch(&ctx, &[], kit.priority_service, 0, TIMEOUT, &[]),
            Err(MarketplaceError::EmptyBatch)
        );
        assert_eq!(
            m.request_batch(&ctx, &[b"a".to_vec(), vec![]], kit.priority_service, 0, TIMEOUT, &[]),
            Err(MarketplaceError::EmptyPayload { index: 1 })
        );
        assert!(matches!(
            m.request(&ctx, b"q", kit.priority_service, 0, 1, &[]),
            Err(MarketplaceError::OutOfBounds { provided: 1, .. })
        ));
        assert_eq!(
            m.request(&ctx, b"q", 999, 0, TIMEOUT, &[]),
            Err(MarketplaceError::UnknownService { service_id: 999 })
        );
        assert!(matches!(
            m.request(&ctx, b"q", kit.priority_service, kit.backup_service, TIMEOUT, &[]),
            Err(MarketplaceError::UnauthorizedAccount { .. })
        ));
    }

    #[test]
    fn token_request_pulls_exact_shortfall() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        let before = kit.token.balance_of(&kit.requester);
        m.request(&kit.requester_ctx(), b"q", kit.token_service, 0, TIMEOUT, &[])
            .unwrap();
        assert_eq!(kit.token.balance_of(&kit.requester), before - RATE);

        // Attached value is refused by non-native trackers.
        let err = m
            .request(&kit.requester_ctx().with_value(1), b"q2", kit.token_service, 0, TIMEOUT, &[])
            .unwrap_err();
        assert_eq!(err, MarketplaceError::Escrow(EscrowError::NoDepositAllowed));
    }

    #[test]
    fn prefunded_balance_is_used_first() {
        let kit = Kit::new();
        let mut m = kit.marketplace();
        m.deposit(&kit.requester_ctx().with_value(3 * RATE), PaymentType::Native, 0, &[])
            .unwrap();
        m.request(&kit.requester_ctx(), b"q", kit.priority_service, 0, TIMEOUT, &[])
            .unwrap();
        let tracker = m.tracker(PaymentType::Native).unwrap();
        assert_eq!(tracker.requester_balance(&kit.requester).unwrap(), 2 * RATE);
    }
}
