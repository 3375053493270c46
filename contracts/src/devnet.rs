//! # Devnet Deployment
//!
//! Wires a complete marketplace from a genesis description: three in-memory
//! ledgers (native value, an ERC20-style token, subscription credits), the
//! registry, karma, requester authorization, one tracker per payment type,
//! and the shared [`MarketplaceService`].
//!
//! Subscription mechs are paid in the token ledger, out of a reserve minted
//! to the subscription escrow at genesis.
//!
//! A deployment can be snapshotted and restored; the registry is static and
//! always comes from genesis.

use mech_protocol::config::CREDIT_RATIO_SCALE;
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::escrow::{
    EscrowError, NativeStrategy, PaymentStrategy, PaymentTracker, PaymentType,
    SubscriptionStrategy, TokenStrategy, TrackerBalances,
};
use crate::karma::{Karma, KarmaSnapshot, ReputationLedger};
use crate::marketplace::{
    Collaborators, Marketplace, MarketplaceConfig, MarketplaceError, MarketplaceState,
};
use crate::registry::{FulfillerRegistry, InMemoryRegistry, MechProfile, ServiceState};
use crate::service::MarketplaceService;
use crate::token::{InMemoryTokenLedger, TokenLedger};
use crate::verifier::RequesterAuthorization;

/// Label the marketplace address is derived from.
pub const MARKETPLACE_LABEL: &str = "marketplace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisService {
    pub service_id: u64,
    pub operator: Address,
    #[serde(default = "deployed")]
    pub state: ServiceState,
}

fn deployed() -> ServiceState {
    ServiceState::Deployed
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub account: Address,
    #[serde(default)]
    pub native: u64,
    #[serde(default)]
    pub token: u64,
    #[serde(default)]
    pub credits: u64,
}

/// Initial world state of a devnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: u64,
    pub owner: Address,
    /// Receives drained fees of every tracker.
    pub drainer: Address,
    #[serde(default)]
    pub config: MarketplaceConfig,
    #[serde(default)]
    pub factories: Vec<Address>,
    #[serde(default)]
    pub services: Vec<GenesisService>,
    #[serde(default)]
    pub mechs: Vec<MechProfile>,
    #[serde(default)]
    pub balances: Vec<GenesisBalance>,
    /// Tokens paid per credit, scaled by `CREDIT_RATIO_SCALE`.
    #[serde(default = "unit_ratio")]
    pub token_credit_ratio: u128,
    /// Tokens minted to the subscription escrow for mech payouts.
    #[serde(default)]
    pub subscription_reserve: u64,
}

fn unit_ratio() -> u128 {
    CREDIT_RATIO_SCALE
}

/// Escrow account of the tracker for `payment_type`.
pub fn escrow_account(payment_type: PaymentType) -> Address {
    Address::derive(&format!("escrow/{payment_type}"))
}

/// Everything mutable in a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    pub marketplace: MarketplaceState,
    pub trackers: Vec<(PaymentType, TrackerBalances)>,
    pub native: BTreeMap<Address, u64>,
    pub token: BTreeMap<Address, u64>,
    pub credits: BTreeMap<Address, u64>,
    pub karma: KarmaSnapshot,
}

/// Balances and scores of one account, across every ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    pub native: u64,
    pub token: u64,
    pub credits: u64,
    pub nonce: u64,
    /// Prefunded escrow balance per payment type.
    pub requester_balances: BTreeMap<PaymentType, u64>,
    /// Unpaid mech earnings per payment type.
    pub mech_balances: BTreeMap<PaymentType, u64>,
    pub mech_karma: i64,
}

pub struct Deployment {
    pub chain_id: u64,
    pub native: Arc<InMemoryTokenLedger>,
    pub token: Arc<InMemoryTokenLedger>,
    pub credits: Arc<InMemoryTokenLedger>,
    pub registry: Arc<InMemoryRegistry>,
    pub karma: Arc<Karma>,
    pub authorization: Arc<RequesterAuthorization>,
    pub service: Arc<MarketplaceService>,
}

impl Deployment {
    pub fn from_genesis(genesis: &Genesis) -> Result<Self, MarketplaceError> {
        let parts = Parts::build(genesis)?;
        for b in &genesis.balances {
            mint(&parts.native, &b.account, b.native)?;
            mint(&parts.token, &b.account, b.token)?;
            mint(&parts.credits, &b.account, b.credits)?;
        }
        mint(
            &parts.token,
            &escrow_account(PaymentType::Subscription),
            genesis.subscription_reserve,
        )?;

        let mut marketplace = Marketplace::new(
            genesis.owner,
            Address::derive(MARKETPLACE_LABEL),
            genesis.chain_id,
            genesis.config,
            parts.collaborators(),
        )?;
        for factory in &genesis.factories {
            marketplace = marketplace.with_factory(*factory);
        }
        let deployment = parts.finish(genesis, marketplace)?;
        info!(
            chain_id = genesis.chain_id,
            mechs = genesis.mechs.len(),
            accounts = genesis.balances.len(),
            "devnet deployed from genesis"
        );
        Ok(deployment)
    }

    /// Rebuilds a deployment from genesis plus a snapshot of its mutable
    /// state.
    pub fn restore(
        genesis: &Genesis,
        snapshot: DeploymentSnapshot,
    ) -> Result<Self, MarketplaceError> {
        let parts = Parts::build(genesis)?;
        parts.native.restore(snapshot.native);
        parts.token.restore(snapshot.token);
        parts.credits.restore(snapshot.credits);
        parts.karma.restore(snapshot.karma);

        let marketplace = Marketplace::restore(snapshot.marketplace, parts.collaborators())?;
        let deployment = parts.finish(genesis, marketplace)?;
        deployment.service.view(|m| -> Result<(), MarketplaceError> {
            for (payment_type, balances) in snapshot.trackers {
                if let Some(tracker) = m.tracker(payment_type) {
                    tracker.restore(balances)?;
                }
            }
            Ok(())
        })??;
        Ok(deployment)
    }

    /// Rewinds every ledger, tracker and the marketplace to `snapshot` in
    /// place, dropping events not yet taken.
    pub fn rewind(&self, snapshot: DeploymentSnapshot) -> Result<(), MarketplaceError> {
        self.native.restore(snapshot.native);
        self.token.restore(snapshot.token);
        self.credits.restore(snapshot.credits);
        self.karma.restore(snapshot.karma);
        self.service.call(|m| {
            for (payment_type, balances) in snapshot.trackers {
                if let Some(tracker) = m.tracker(payment_type) {
                    tracker.restore(balances)?;
                }
            }
            m.rewind(snapshot.marketplace)
        })
    }

    pub fn snapshot(&self) -> Result<DeploymentSnapshot, MarketplaceError> {
        self.service.view(|m| -> Result<DeploymentSnapshot, MarketplaceError> {
            let mut trackers = Vec::new();
            for tracker in m.trackers() {
                trackers.push((tracker.payment_type(), tracker.balances()?));
            }
            Ok(DeploymentSnapshot {
                marketplace: m.state().clone(),
                trackers,
                native: self.native.balances(),
                token: self.token.balances(),
                credits: self.credits.balances(),
                karma: self.karma.snapshot(),
            })
        })?
    }

    pub fn account(&self, address: &Address) -> Result<AccountView, MarketplaceError> {
        self.service.view(|m| -> Result<AccountView, MarketplaceError> {
            let mut requester_balances = BTreeMap::new();
            let mut mech_balances = BTreeMap::new();
            for tracker in m.trackers() {
                requester_balances.insert(tracker.payment_type(), tracker.requester_balance(address)?);
                mech_balances.insert(tracker.payment_type(), tracker.mech_balance(address)?);
            }
            Ok(AccountView {
                address: *address,
                native: self.native.balance_of(address),
                token: self.token.balance_of(address),
                credits: self.credits.balance_of(address),
                nonce: m.nonce(address),
                requester_balances,
                mech_balances,
                mech_karma: self.karma.mech_karma(address),
            })
        })?
    }

    /// Operator of the service `mech` belongs to.
    pub fn operator_of(&self, mech: &Address) -> Option<Address> {
        let profile = self.registry.mech_profile(mech)?;
        self.registry
            .service(profile.service_id)
            .map(|s| s.operator)
    }
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

/// Stateless pieces shared by fresh and restored deployments.
struct Parts {
    chain_id: u64,
    native: Arc<InMemoryTokenLedger>,
    token: Arc<InMemoryTokenLedger>,
    credits: Arc<InMemoryTokenLedger>,
    registry: Arc<InMemoryRegistry>,
    karma: Arc<Karma>,
    authorization: Arc<RequesterAuthorization>,
}

impl Parts {
    fn build(genesis: &Genesis) -> Result<Self, MarketplaceError> {
        let registry = Arc::new(InMemoryRegistry::new());
        for s in &genesis.services {
            registry.register_service(s.service_id, s.operator, s.state);
        }
        for profile in &genesis.mechs {
            if profile.mech.is_zero() {
                return Err(MarketplaceError::ZeroAddress);
            }
            registry.register_mech(profile.clone());
        }
        Ok(Self {
            chain_id: genesis.chain_id,
            native: Arc::new(InMemoryTokenLedger::new("native")),
            token: Arc::new(InMemoryTokenLedger::new("token")),
            credits: Arc::new(InMemoryTokenLedger::new("credits")),
            registry,
            karma: Arc::new(Karma::new()),
            authorization: Arc::new(RequesterAuthorization::new()),
        })
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            registry: self.registry.clone(),
            karma: self.karma.clone(),
            verifier: self.authorization.clone(),
        }
    }

    fn finish(self, genesis: &Genesis, mut marketplace: Marketplace) -> Result<Deployment, MarketplaceError> {
        let strategies: [Box<dyn PaymentStrategy>; 3] = [
            Box::new(NativeStrategy::new(
                self.native.clone(),
                escrow_account(PaymentType::Native),
            )),
            Box::new(TokenStrategy::new(
                self.token.clone(),
                escrow_account(PaymentType::Token),
            )),
            Box::new(SubscriptionStrategy::new(
                self.credits.clone(),
                self.token.clone(),
                escrow_account(PaymentType::Subscription),
                genesis.token_credit_ratio,
            )?),
        ];
        for strategy in strategies {
            marketplace =
                marketplace.with_tracker(Arc::new(PaymentTracker::new(strategy, genesis.drainer)));
        }
        Ok(Deployment {
            chain_id: self.chain_id,
            native: self.native,
            token: self.token,
            credits: self.credits,
            registry: self.registry,
            karma: self.karma,
            authorization: self.authorization,
            service: Arc::new(MarketplaceService::new(marketplace)),
        })
    }
}

fn mint(ledger: &InMemoryTokenLedger, to: &Address, amount: u64) -> Result<(), MarketplaceError> {
    if amount == 0 {
        return Ok(());
    }
    ledger.mint(to, amount).map_err(EscrowError::from)?;
    Ok(())
}
