//! Shared fixture for marketplace unit tests: three deployed mechs, funded
//! requester, native and token trackers.

use mech_protocol::crypto::MechKeypair;
use mech_protocol::identity::Address;
use std::sync::Arc;

pub use crate::karma::ReputationLedger;
pub use crate::token::TokenLedger;

use super::{CallContext, Collaborators, Marketplace, MarketplaceConfig, SignedDeliveryBatch};
use crate::escrow::{NativeStrategy, PaymentTracker, PaymentType, TokenStrategy};
use crate::karma::Karma;
use crate::registry::{InMemoryRegistry, MechProfile, ServiceState};
use crate::token::InMemoryTokenLedger;
use crate::verifier::{signature_proof, RequesterAuthorization};

pub const CHAIN: u64 = 7;
pub const T0: u64 = 1_000;
pub const TIMEOUT: u64 = 300;
pub const RATE: u64 = 10;
pub const FUNDS: u64 = 1_000_000;

pub struct Kit {
    pub owner: Address,
    pub requester: Address,
    pub requester_keys: MechKeypair,
    pub priority: Address,
    pub priority_operator: Address,
    pub priority_service: u64,
    pub backup: Address,
    pub backup_service: u64,
    pub token_mech: Address,
    pub token_service: u64,
    pub factory: Address,
    pub drainer: Address,
    pub native: Arc<InMemoryTokenLedger>,
    pub token: Arc<InMemoryTokenLedger>,
    pub native_escrow: Address,
    pub token_escrow: Address,
    pub karma: Arc<Karma>,
    pub registry: Arc<InMemoryRegistry>,
}

impl Kit {
    pub fn new() -> Self {
        let requester_keys = MechKeypair::from_seed(&[7u8; 32]);
        let requester = Address::from_public_key(&requester_keys.public_key());
        let factory = Address::derive("test/factory");
        let registry = Arc::new(InMemoryRegistry::new());

        let mechs = [
            (1, "priority", PaymentType::Native),
            (2, "backup", PaymentType::Native),
            (3, "token", PaymentType::Token),
        ];
        for (service_id, name, payment_type) in mechs {
            registry.register_service(
                service_id,
                Address::derive(&format!("test/operator/{name}")),
                ServiceState::Deployed,
            );
            registry.register_mech(MechProfile {
                mech: Address::derive(&format!("test/mech/{name}")),
                service_id,
                payment_type,
                max_delivery_rate: RATE,
                factory,
            });
        }

        let native = Arc::new(InMemoryTokenLedger::new("native"));
        let token = Arc::new(InMemoryTokenLedger::new("token"));
        native.mint(&requester, FUNDS).unwrap();
        token.mint(&requester, FUNDS).unwrap();

        Self {
            owner: Address::derive("test/owner"),
            requester,
            requester_keys,
            priority: Address::derive("test/mech/priority"),
            priority_operator: Address::derive("test/operator/priority"),
            priority_service: 1,
            backup: Address::derive("test/mech/backup"),
            backup_service: 2,
            token_mech: Address::derive("test/mech/token"),
            token_service: 3,
            factory,
            drainer: Address::derive("test/drainer"),
            native,
            token,
            native_escrow: Address::derive("test/escrow/native"),
            token_escrow: Address::derive("test/escrow/token"),
            karma: Arc::new(Karma::new()),
            registry,
        }
    }

    pub fn marketplace(&self) -> Marketplace {
        let collaborators = Collaborators {
            registry: self.registry.clone(),
            karma: self.karma.clone(),
            verifier: Arc::new(RequesterAuthorization::new()),
        };
        let native = PaymentTracker::new(
            Box::new(NativeStrategy::new(self.native.clone(), self.native_escrow)),
            self.drainer,
        );
        let token = PaymentTracker::new(
            Box::new(TokenStrategy::new(self.token.clone(), self.token_escrow)),
            self.drainer,
        );
        Marketplace::new(
            self.owner,
            Address::derive("test/marketplace"),
            CHAIN,
            MarketplaceConfig::default(),
            collaborators,
        )
        .unwrap()
        .with_factory(self.factory)
        .with_tracker(Arc::new(native))
        .with_tracker(Arc::new(token))
    }

    pub fn owner_ctx(&self) -> CallContext {
        CallContext::new(self.owner, T0, CHAIN)
    }

    pub fn requester_ctx(&self) -> CallContext {
        CallContext::new(self.requester, T0, CHAIN)
    }

    pub fn mech_ctx(&self, mech: Address, timestamp: u64) -> CallContext {
        CallContext::new(mech, timestamp, CHAIN)
    }

    /// Posts one paid native request to the priority mech.
    pub fn post(&self, m: &mut Marketplace, payload: &[u8]) -> crate::request_id::RequestId {
        m.request(
            &self.requester_ctx().with_value(RATE),
            payload,
            self.priority_service,
            0,
            TIMEOUT,
            &[],
        )
        .unwrap()
    }

    /// A signed batch from the requester for the next nonces.
    pub fn signed_batch(&self, m: &Marketplace, payloads: &[&str], rates: &[u64]) -> SignedDeliveryBatch {
        let nonce = m.nonce(&self.requester);
        let payloads: Vec<Vec<u8>> = payloads.iter().map(|p| p.as_bytes().to_vec()).collect();
        let auth_proofs = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let id = m.request_id_for(&self.requester, p, nonce + i as u64, CHAIN);
                signature_proof(&self.requester_keys, id.as_bytes())
            })
            .collect();
        SignedDeliveryBatch {
            requester: self.requester,
            requester_service_id: 0,
            results: payloads.iter().map(|_| b"result".to_vec()).collect(),
            payloads,
            auth_proofs,
            delivery_rates: rates.to_vec(),
            payment_data: Vec::new(),
        }
    }
}
