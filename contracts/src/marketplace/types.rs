use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::MarketplaceConfig;
use crate::escrow::PaymentType;
use crate::pending::PendingRequests;
use crate::request_id::{DomainSeparator, RequestId};

/// Ambient environment of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Account making the call.
    pub caller: Address,
    /// Native value attached to the call.
    pub value: u64,
    /// Current time, seconds.
    pub timestamp: u64,
    /// Chain the call executes on.
    pub chain_id: u64,
}

impl CallContext {
    pub fn new(caller: Address, timestamp: u64, chain_id: u64) -> Self {
        Self {
            caller,
            value: 0,
            timestamp,
            chain_id,
        }
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }
}

/// Stored state of one request. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub priority_mech: Address,
    /// Zero until delivered, then written once.
    pub delivery_mech: Address,
    pub requester: Address,
    pub response_deadline: u64,
    pub agreed_rate: u64,
    pub payment_type: PaymentType,
    pub requested_at: u64,
    pub delivered_at: Option<u64>,
}

impl RequestRecord {
    pub fn is_delivered(&self) -> bool {
        !self.delivery_mech.is_zero()
    }

    pub fn status(&self, now: u64) -> RequestStatus {
        if self.is_delivered() {
            RequestStatus::Delivered
        } else if now > self.response_deadline {
            RequestStatus::RequestedExpired
        } else {
            RequestStatus::RequestedPriority
        }
    }
}

/// Derived lifecycle state. `RequestedExpired` is not stored: it is an
/// undelivered request read after its deadline, still open to any mech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    DoesNotExist,
    RequestedPriority,
    RequestedExpired,
    Delivered,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::DoesNotExist => "does_not_exist",
            RequestStatus::RequestedPriority => "requested_priority",
            RequestStatus::RequestedExpired => "requested_expired",
            RequestStatus::Delivered => "delivered",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_requests: u64,
    pub total_deliveries: u64,
    pub undelivered: u64,
}

/// Everything the marketplace owns. Serializable for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceState {
    pub owner: Address,
    pub address: Address,
    pub domain: DomainSeparator,
    pub config: MarketplaceConfig,
    pub factories: BTreeSet<Address>,
    pub requests: BTreeMap<RequestId, RequestRecord>,
    pub nonces: BTreeMap<Address, u64>,
    pub counters: Counters,
    pub requester_requests: BTreeMap<Address, u64>,
    pub requester_deliveries: BTreeMap<Address, u64>,
    pub mech_deliveries: BTreeMap<Address, u64>,
    pub pending: PendingRequests,
}

impl MarketplaceState {
    pub(crate) fn new(owner: Address, address: Address, chain_id: u64, config: MarketplaceConfig) -> Self {
        Self {
            owner,
            address,
            domain: DomainSeparator::new(chain_id, address),
            config,
            factories: BTreeSet::new(),
            requests: BTreeMap::new(),
            nonces: BTreeMap::new(),
            counters: Counters::default(),
            requester_requests: BTreeMap::new(),
            requester_deliveries: BTreeMap::new(),
            mech_deliveries: BTreeMap::new(),
            pending: PendingRequests::new(),
        }
    }

    pub fn nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }
}

pub(crate) fn bump(map: &mut BTreeMap<Address, u64>, account: &Address, by: u64) {
    let entry = map.entry(*account).or_insert(0);
    *entry = entry.saturating_add(by);
}
