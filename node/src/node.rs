//! # Marketplace Node Runtime
//!
//! Owns the devnet [`Deployment`] and its sled database. Signed calls are
//! verified, screened for expiry and replay, executed, and then committed:
//! the deployment snapshot is rewritten, the emitted events are appended to
//! the event log, folded into metrics and broadcast to WebSocket clients.
//!
//! Writes are serialized by one lock held from replay screening through
//! commit, so snapshots land on disk in call order. The snapshot and the
//! events of a call are stored in one transaction; if that fails the
//! in-memory deployment is rewound to its state before the call.

use mech_contracts::devnet::{AccountView, Deployment, DeploymentSnapshot, Genesis};
use mech_contracts::escrow::PaymentSplit;
use mech_contracts::marketplace::{Counters, RequestRecord};
use mech_contracts::{CallContext, MarketplaceError, MarketplaceEvent, RequestId, RequestStatus};
use mech_protocol::config::CALL_EXPIRY_WINDOW_SECS;
use mech_protocol::crypto::sha256_array;
use mech_protocol::identity::Address;
use mech_protocol::storage::{DbError, MarketDb};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::NodeConfig;
use crate::envelope::{EnvelopeError, MarketCall, SignedCall};
use crate::metrics::SharedMetrics;

/// Snapshot name of the deployment state.
pub const SNAPSHOT_KEY: &str = "deployment";

/// Metadata key holding the hex digest of the genesis the db was built from.
const GENESIS_DIGEST_KEY: &str = "genesis_digest";

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("call submitted as {method} but signed as {signed}")]
    MethodMismatch {
        method: String,
        signed: &'static str,
    },

    #[error("call expired: issued at {issued_at}, now {now}")]
    Expired { issued_at: u64, now: u64 },

    #[error("call issued in the future: issued at {issued_at}, now {now}")]
    NotYetValid { issued_at: u64, now: u64 },

    #[error("call already submitted")]
    Replayed,

    #[error("{signer} is not the operator of mech {mech}")]
    NotOperator { signer: Address, mech: Address },

    #[error(transparent)]
    Marketplace(#[from] MarketplaceError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl NodeError {
    /// Short name used in metrics labels and RPC error data.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Envelope(_) => "bad_envelope",
            NodeError::MethodMismatch { .. } => "method_mismatch",
            NodeError::Expired { .. } => "expired",
            NodeError::NotYetValid { .. } => "not_yet_valid",
            NodeError::Replayed => "replayed",
            NodeError::NotOperator { .. } => "not_operator",
            NodeError::Marketplace(e) => e.kind(),
            NodeError::Storage(_) => "storage",
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    RequestIds(Vec<RequestId>),
    Delivered(Vec<bool>),
    Balance(u64),
    Payment(PaymentSplit),
    Drained(u64),
}

/// Summary served by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub network: String,
    pub chain_id: u64,
    pub marketplace: Address,
    pub owner: Address,
    pub fee_bps: u16,
    pub counters: Counters,
    pub event_count: u64,
}

/// Durable side of a commit.
pub trait CommitStore: Send + Sync {
    /// Stores the snapshot and appends the events, all or nothing.
    fn commit(
        &self,
        snapshot: &DeploymentSnapshot,
        events: &[MarketplaceEvent],
    ) -> Result<(), DbError>;

    fn flush(&self) -> Result<(), DbError>;
}

impl CommitStore for MarketDb {
    fn commit(
        &self,
        snapshot: &DeploymentSnapshot,
        events: &[MarketplaceEvent],
    ) -> Result<(), DbError> {
        MarketDb::commit(self, SNAPSHOT_KEY, snapshot, events)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), DbError> {
        MarketDb::flush(self)
    }
}

/// Digests of recently accepted calls, forgotten once they expire.
#[derive(Debug, Default)]
struct SeenCalls {
    entries: HashMap<[u8; 32], u64>,
}

impl SeenCalls {
    fn admit(&mut self, digest: [u8; 32], issued_at: u64, now: u64) -> Result<(), NodeError> {
        if issued_at.saturating_add(CALL_EXPIRY_WINDOW_SECS) < now {
            return Err(NodeError::Expired { issued_at, now });
        }
        if issued_at > now.saturating_add(CALL_EXPIRY_WINDOW_SECS) {
            return Err(NodeError::NotYetValid { issued_at, now });
        }
        self.entries
            .retain(|_, at| at.saturating_add(CALL_EXPIRY_WINDOW_SECS) >= now);
        if self.entries.contains_key(&digest) {
            return Err(NodeError::Replayed);
        }
        self.entries.insert(digest, issued_at);
        Ok(())
    }
}

pub struct MarketNode {
    network: String,
    chain_id: u64,
    deployment: Deployment,
    db: MarketDb,
    store: Arc<dyn CommitStore>,
    metrics: SharedMetrics,
    events: broadcast::Sender<MarketplaceEvent>,
    writes: Mutex<SeenCalls>,
}

impl MarketNode {
    /// Restores the deployment from `db`, or deploys genesis into an empty
    /// db. A db built from a different genesis is refused.
    pub fn open(
        config: &NodeConfig,
        db: MarketDb,
        metrics: SharedMetrics,
        events: broadcast::Sender<MarketplaceEvent>,
    ) -> anyhow::Result<Self> {
        let genesis = &config.genesis;
        let digest = genesis_digest(genesis)?;

        let deployment = match db.get_snapshot::<DeploymentSnapshot>(SNAPSHOT_KEY)? {
            Some(snapshot) => {
                match db.get_meta(GENESIS_DIGEST_KEY)? {
                    Some(stored) if stored == digest => {}
                    Some(stored) => anyhow::bail!(
                        "database was built from genesis {stored}, config has {digest}"
                    ),
                    None => anyhow::bail!("database snapshot has no genesis digest"),
                }
                let deployment = Deployment::restore(genesis, snapshot)?;
                tracing::info!(events = db.event_count(), "marketplace restored from snapshot");
                deployment
            }
            None => {
                let deployment = Deployment::from_genesis(genesis)?;
                db.put_snapshot(SNAPSHOT_KEY, &deployment.snapshot()?)?;
                db.put_meta(GENESIS_DIGEST_KEY, &digest)?;
                db.flush()?;
                tracing::info!(genesis = %digest, "marketplace deployed from genesis");
                deployment
            }
        };

        let node = Self {
            network: config.network.clone(),
            chain_id: genesis.chain_id,
            deployment,
            store: Arc::new(db.clone()),
            db,
            metrics,
            events,
            writes: Mutex::new(SeenCalls::default()),
        };
        let counters = node.summary()?.counters;
        node.metrics
            .undelivered_requests
            .set(counters.undelivered as i64);
        Ok(node)
    }

    #[cfg(test)]
    pub(crate) fn with_store(mut self, store: Arc<dyn CommitStore>) -> Self {
        self.store = store;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketplaceEvent> {
        self.events.subscribe()
    }

    // -- Writes -------------------------------------------------------------

    /// Verifies, executes and commits one signed call submitted under
    /// `method` at time `now`.
    pub fn execute(
        &self,
        method: &str,
        envelope: &SignedCall,
        now: u64,
    ) -> Result<CallOutcome, NodeError> {
        let _timer = self.metrics.call_latency_seconds.start_timer();
        let result = self.execute_inner(method, envelope, now);
        if let Err(e) = &result {
            self.metrics
                .failed_calls_total
                .with_label_values(&[e.kind()])
                .inc();
            tracing::debug!(method, error = %e, "call rejected");
        }
        result
    }

    fn execute_inner(
        &self,
        method: &str,
        envelope: &SignedCall,
        now: u64,
    ) -> Result<CallOutcome, NodeError> {
        let signed = envelope.call.method();
        if signed != method {
            return Err(NodeError::MethodMismatch {
                method: method.to_string(),
                signed,
            });
        }
        let verified = envelope.verify(self.chain_id)?;

        let mut seen = self.writes.lock();
        seen.admit(verified.digest, envelope.issued_at, now)?;
        let before = self.deployment.snapshot()?;
        let outcome = self.dispatch(verified.signer, &envelope.call, now)?;
        if let Err(e) = self.commit() {
            tracing::error!(method, error = %e, "commit failed, rewinding call");
            self.deployment.rewind(before)?;
            return Err(e);
        }
        tracing::info!(method, signer = %verified.signer, "call executed");
        Ok(outcome)
    }

    fn dispatch(
        &self,
        signer: Address,
        call: &MarketCall,
        now: u64,
    ) -> Result<CallOutcome, NodeError> {
        let service = &self.deployment.service;
        let ctx = CallContext::new(signer, now, self.chain_id);

        let outcome = match call {
            MarketCall::Request {
                payloads,
                priority_mech_service_id,
                requester_service_id,
                response_timeout,
                value,
                payment_data,
            } => {
                let ctx = ctx.with_value(*value);
                let ids = match payloads.as_slice() {
                    [payload] => vec![service.request(
                        &ctx,
                        payload,
                        *priority_mech_service_id,
                        *requester_service_id,
                        *response_timeout,
                        payment_data,
                    )?],
                    _ => service.request_batch(
                        &ctx,
                        payloads,
                        *priority_mech_service_id,
                        *requester_service_id,
                        *response_timeout,
                        payment_data,
                    )?,
                };
                CallOutcome::RequestIds(ids)
            }
            MarketCall::Deliver {
                mech,
                request_ids,
                delivery_rates,
                results,
            } => {
                let ctx = self.as_mech(signer, mech, now)?;
                CallOutcome::Delivered(service.deliver_marketplace(
                    &ctx,
                    request_ids,
                    delivery_rates,
                    results,
                )?)
            }
            MarketCall::DeliverWithSignatures { mech, batch } => {
                let ctx = self.as_mech(signer, mech, now)?;
                CallOutcome::RequestIds(service.deliver_marketplace_with_signatures(&ctx, batch)?)
            }
            MarketCall::Deposit {
                payment_type,
                amount,
                value,
                payment_data,
            } => CallOutcome::Balance(service.deposit(
                &ctx.with_value(*value),
                *payment_type,
                *amount,
                payment_data,
            )?),
            MarketCall::ProcessPayment { mech } => {
                CallOutcome::Payment(service.process_payment(&ctx, mech)?)
            }
            MarketCall::Drain { payment_type } => {
                CallOutcome::Drained(service.drain(&ctx, *payment_type)?)
            }
        };
        Ok(outcome)
    }

    /// Mechs hold no keys on the devnet; their service operator signs for
    /// them.
    fn as_mech(&self, signer: Address, mech: &Address, now: u64) -> Result<CallContext, NodeError> {
        if self.deployment.operator_of(mech) != Some(signer) {
            return Err(NodeError::NotOperator {
                signer,
                mech: *mech,
            });
        }
        Ok(CallContext::new(*mech, now, self.chain_id))
    }

    /// Persists the call's snapshot and events, then publishes the events.
    /// Events stay buffered in the marketplace until the store accepts them.
    fn commit(&self) -> Result<(), NodeError> {
        let events = self
            .deployment
            .service
            .view(|m| m.pending_events().to_vec())?;
        let snapshot = self.deployment.snapshot()?;
        self.store.commit(&snapshot, &events)?;
        self.deployment.service.take_events()?;

        // The transaction is applied; sled retries the flush in the background.
        if let Err(e) = self.store.flush() {
            tracing::warn!(error = %e, "flush after commit failed");
        }

        self.metrics.observe_events(&events);
        self.metrics
            .undelivered_requests
            .set(snapshot.marketplace.counters.undelivered as i64);
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    pub fn summary(&self) -> Result<NodeSummary, NodeError> {
        let summary = self.deployment.service.view(|m| NodeSummary {
            network: self.network.clone(),
            chain_id: self.chain_id,
            marketplace: m.address(),
            owner: m.owner(),
            fee_bps: m.config().fee_bps,
            counters: m.counters(),
            event_count: self.db.event_count() as u64,
        })?;
        Ok(summary)
    }

    pub fn request(&self, id: &RequestId) -> Result<Option<RequestRecord>, NodeError> {
        Ok(self
            .deployment
            .service
            .view(|m| m.request_record(id).cloned())?)
    }

    pub fn request_status(&self, id: &RequestId, now: u64) -> Result<RequestStatus, NodeError> {
        Ok(self.deployment.service.request_status(id, now)?)
    }

    pub fn nonce(&self, account: &Address) -> Result<u64, NodeError> {
        Ok(self.deployment.service.nonce(account)?)
    }

    pub fn undelivered(&self, offset: usize, limit: usize) -> Result<Vec<RequestId>, NodeError> {
        Ok(self
            .deployment
            .service
            .view(|m| m.undelivered_requests(offset, limit))?)
    }

    pub fn account(&self, address: &Address) -> Result<AccountView, NodeError> {
        Ok(self.deployment.account(address)?)
    }

    pub fn events_from(
        &self,
        from: u64,
        limit: usize,
    ) -> Result<Vec<(u64, MarketplaceEvent)>, NodeError> {
        Ok(self.db.events_from(from, limit)?)
    }
}

impl std::fmt::Debug for MarketNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketNode")
            .field("network", &self.network)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

fn genesis_digest(genesis: &Genesis) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(genesis)?;
    Ok(hex::encode(sha256_array(&bytes)))
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use crate::metrics::NodeMetrics;
    use mech_contracts::devnet::{GenesisBalance, GenesisService};
    use mech_contracts::registry::{MechProfile, ServiceState};
    use mech_contracts::{MarketplaceConfig, PaymentType};
    use mech_protocol::config::{CHAIN_ID_DEVNET, CREDIT_RATIO_SCALE};
    use mech_protocol::crypto::MechKeypair;
    use std::sync::Arc;

    pub const RATE: u64 = 10;
    pub const SERVICE: u64 = 1;

    pub struct Actors {
        pub requester: MechKeypair,
        pub operator: MechKeypair,
        pub mech: Address,
    }

    impl Actors {
        pub fn new() -> Self {
            Self {
                requester: MechKeypair::from_seed(&[1; 32]),
                operator: MechKeypair::from_seed(&[2; 32]),
                mech: Address::derive("mech"),
            }
        }

        pub fn requester_address(&self) -> Address {
            Address::from_public_key(&self.requester.public_key())
        }

        pub fn operator_address(&self) -> Address {
            Address::from_public_key(&self.operator.public_key())
        }

        pub fn config(&self) -> NodeConfig {
            let factory = Address::derive("factory");
            NodeConfig {
                network: "devnet".into(),
                genesis: Genesis {
                    chain_id: CHAIN_ID_DEVNET,
                    owner: Address::derive("owner"),
                    drainer: Address::derive("drainer"),
                    config: MarketplaceConfig::default(),
                    factories: vec![factory],
                    services: vec![GenesisService {
                        service_id: SERVICE,
                        operator: self.operator_address(),
                        state: ServiceState::Deployed,
                    }],
                    mechs: vec![MechProfile {
                        mech: self.mech,
                        service_id: SERVICE,
                        payment_type: PaymentType::Native,
                        max_delivery_rate: RATE,
                        factory,
                    }],
                    balances: vec![GenesisBalance {
                        account: self.requester_address(),
                        native: 1_000,
                        ..Default::default()
                    }],
                    token_credit_ratio: CREDIT_RATIO_SCALE,
                    subscription_reserve: 0,
                },
            }
        }

        pub fn request_call(&self, payload: &[u8], issued_at: u64) -> SignedCall {
            SignedCall::sign(
                &self.requester,
                CHAIN_ID_DEVNET,
                issued_at,
                MarketCall::Request {
                    payloads: vec![payload.to_vec()],
                    priority_mech_service_id: SERVICE,
                    requester_service_id: 0,
                    response_timeout: 600,
                    value: RATE,
                    payment_data: Vec::new(),
                },
            )
            .unwrap()
        }

        pub fn deliver_call(
            &self,
            signer: &MechKeypair,
            ids: Vec<RequestId>,
            issued_at: u64,
        ) -> SignedCall {
            let n = ids.len();
            SignedCall::sign(
                signer,
                CHAIN_ID_DEVNET,
                issued_at,
                MarketCall::Deliver {
                    mech: self.mech,
                    request_ids: ids,
                    delivery_rates: vec![RATE; n],
                    results: vec![b"result".to_vec(); n],
                },
            )
            .unwrap()
        }
    }

    pub fn open_node(config: &NodeConfig, db: MarketDb) -> MarketNode {
        let (tx, _) = broadcast::channel(16);
        MarketNode::open(config, db, Arc::new(NodeMetrics::new()), tx).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use mech_contracts::PaymentType;

    const NOW: u64 = 1_700_000_000;

    fn request_ids(outcome: CallOutcome) -> Vec<RequestId> {
        match outcome {
            CallOutcome::RequestIds(ids) => ids,
            other => panic!("expected request ids, got {other:?}"),
        }
    }

    #[test]
    fn request_then_deliver_by_operator() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());

        let ids = request_ids(
            node.execute("mech_request", &actors.request_call(b"job", NOW), NOW)
                .unwrap(),
        );
        assert_eq!(ids.len(), 1);
        assert_eq!(
            node.request_status(&ids[0], NOW).unwrap(),
            RequestStatus::RequestedPriority
        );
        assert_eq!(node.undelivered(0, 10).unwrap(), ids);

        let deliver = actors.deliver_call(&actors.operator, ids.clone(), NOW + 1);
        let outcome = node.execute("mech_deliver", &deliver, NOW + 1).unwrap();
        assert_eq!(outcome, CallOutcome::Delivered(vec![true]));

        let account = node.account(&actors.mech).unwrap();
        assert_eq!(account.mech_balances[&PaymentType::Native], RATE);
        assert_eq!(node.summary().unwrap().counters.undelivered, 0);
        assert_eq!(node.events_from(0, 10).unwrap().len(), 2);
    }

    #[test]
    fn deliver_signed_by_stranger_is_refused() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());
        let ids = request_ids(
            node.execute("mech_request", &actors.request_call(b"job", NOW), NOW)
                .unwrap(),
        );

        let deliver = actors.deliver_call(&actors.requester, ids, NOW);
        let err = node.execute("mech_deliver", &deliver, NOW).unwrap_err();
        assert!(matches!(err, NodeError::NotOperator { .. }), "{err}");
        assert_eq!(err.kind(), "not_operator");
    }

    #[test]
    fn replayed_and_stale_calls_are_refused() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());
        let call = actors.request_call(b"job", NOW);

        node.execute("mech_request", &call, NOW).unwrap();
        assert!(matches!(
            node.execute("mech_request", &call, NOW + 1),
            Err(NodeError::Replayed)
        ));

        let stale = actors.request_call(b"old", NOW - CALL_EXPIRY_WINDOW_SECS - 1);
        assert!(matches!(
            node.execute("mech_request", &stale, NOW),
            Err(NodeError::Expired { .. })
        ));

        let early = actors.request_call(b"early", NOW + CALL_EXPIRY_WINDOW_SECS + 1);
        assert!(matches!(
            node.execute("mech_request", &early, NOW),
            Err(NodeError::NotYetValid { .. })
        ));
        assert_eq!(node.nonce(&actors.requester_address()).unwrap(), 1);
    }

    #[test]
    fn method_must_match_signed_call() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());
        let err = node
            .execute("mech_deposit", &actors.request_call(b"job", NOW), NOW)
            .unwrap_err();
        assert!(matches!(err, NodeError::MethodMismatch { .. }));
    }

    #[test]
    fn failed_call_leaves_no_trace() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());
        let call = SignedCall::sign(
            &actors.requester,
            node.chain_id(),
            NOW,
            MarketCall::Request {
                payloads: vec![b"job".to_vec()],
                priority_mech_service_id: 42,
                requester_service_id: 0,
                response_timeout: 600,
                value: RATE,
                payment_data: Vec::new(),
            },
        )
        .unwrap();

        let err = node.execute("mech_request", &call, NOW).unwrap_err();
        assert!(matches!(err, NodeError::Marketplace(_)));
        assert_eq!(node.events_from(0, 10).unwrap().len(), 0);
        let account = node.account(&actors.requester_address()).unwrap();
        assert_eq!(account.native, 1_000);
    }

    #[test]
    fn reopening_restores_state() {
        let actors = Actors::new();
        let config = actors.config();
        let db = MarketDb::open_temporary().unwrap();

        let ids = {
            let node = open_node(&config, db.clone());
            request_ids(
                node.execute("mech_request", &actors.request_call(b"job", NOW), NOW)
                    .unwrap(),
            )
        };

        let node = open_node(&config, db);
        assert!(node.request(&ids[0]).unwrap().is_some());
        assert_eq!(node.nonce(&actors.requester_address()).unwrap(), 1);
        assert_eq!(node.account(&actors.requester_address()).unwrap().native, 1_000 - RATE);
        assert_eq!(node.summary().unwrap().event_count, 1);
    }

    #[test]
    fn reopening_with_other_genesis_fails() {
        let actors = Actors::new();
        let db = MarketDb::open_temporary().unwrap();
        drop(open_node(&actors.config(), db.clone()));

        let mut other = actors.config();
        other.genesis.subscription_reserve = 5;
        let (tx, _) = broadcast::channel(1);
        let metrics = std::sync::Arc::new(crate::metrics::NodeMetrics::new());
        assert!(MarketNode::open(&other, db, metrics, tx).is_err());
    }

    /// Store that refuses commits while `fail` is set.
    struct FlakyStore {
        db: MarketDb,
        fail: std::sync::atomic::AtomicBool,
    }

    impl CommitStore for FlakyStore {
        fn commit(
            &self,
            snapshot: &DeploymentSnapshot,
            events: &[MarketplaceEvent],
        ) -> Result<(), DbError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DbError::Serialization("disk full".into()));
            }
            CommitStore::commit(&self.db, snapshot, events)
        }

        fn flush(&self) -> Result<(), DbError> {
            self.db.flush()
        }
    }

    #[test]
    fn failed_commit_rewinds_the_call() {
        let actors = Actors::new();
        let config = actors.config();
        let db = MarketDb::open_temporary().unwrap();
        let store = std::sync::Arc::new(FlakyStore {
            db: db.clone(),
            fail: std::sync::atomic::AtomicBool::new(true),
        });
        let node = open_node(&config, db.clone()).with_store(store.clone());
        let mut rx = node.subscribe();

        let err = node
            .execute("mech_request", &actors.request_call(b"job", NOW), NOW)
            .unwrap_err();
        assert!(matches!(err, NodeError::Storage(_)), "{err}");
        assert_eq!(err.kind(), "storage");

        let requester = actors.requester_address();
        assert_eq!(node.nonce(&requester).unwrap(), 0);
        assert_eq!(node.account(&requester).unwrap().native, 1_000);
        assert_eq!(node.summary().unwrap().counters.total_requests, 0);
        assert!(node.undelivered(0, 10).unwrap().is_empty());
        assert!(node.events_from(0, 10).unwrap().is_empty());
        assert!(rx.try_recv().is_err());

        store.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        node.execute("mech_request", &actors.request_call(b"again", NOW + 1), NOW + 1)
            .unwrap();
        let logged = node.events_from(0, 10).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].1.kind(), "request");
        assert_eq!(rx.try_recv().unwrap().kind(), "request");
        assert!(rx.try_recv().is_err());

        // Disk and memory agree.
        let reopened = open_node(&config, db);
        assert_eq!(reopened.nonce(&requester).unwrap(), 1);
        assert_eq!(reopened.account(&requester).unwrap().native, 1_000 - RATE);
    }

    #[test]
    fn committed_events_are_broadcast() {
        let actors = Actors::new();
        let node = open_node(&actors.config(), MarketDb::open_temporary().unwrap());
        let mut rx = node.subscribe();
        node.execute("mech_request", &actors.request_call(b"job", NOW), NOW)
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "request");
    }
}
