//! # Fulfiller Registry
//!
//! Who is allowed to act for whom. A *service* is a registered unit with an
//! operator account and a lifecycle state; a *mech* is the fulfiller a
//! service runs, created by a mech factory with a fixed payment type and a
//! maximum delivery rate.
//!
//! The marketplace only reads from the registry.

use mech_protocol::identity::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::escrow::PaymentType;

/// Lifecycle state of a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    PreRegistration,
    ActiveRegistration,
    FinishedRegistration,
    Deployed,
    TerminatedBonded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_id: u64,
    /// Account empowered to act for the service.
    pub operator: Address,
    pub state: ServiceState,
}

impl ServiceRecord {
    pub fn is_deployed(&self) -> bool {
        self.state == ServiceState::Deployed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechProfile {
    pub mech: Address,
    pub service_id: u64,
    pub payment_type: PaymentType,
    /// Price per delivery. Becomes the agreed rate of every request that
    /// names this mech as priority mech.
    pub max_delivery_rate: u64,
    /// Factory that created the mech. The marketplace only accepts mechs
    /// from factories it has enabled.
    pub factory: Address,
}

/// Read-only view of services and mechs.
pub trait FulfillerRegistry: Send + Sync {
    fn service(&self, service_id: u64) -> Option<ServiceRecord>;

    fn mech_for_service(&self, service_id: u64) -> Option<Address>;

    fn mech_profile(&self, mech: &Address) -> Option<MechProfile>;

    /// Whether `account` operates `service_id`.
    fn is_operator(&self, account: &Address, service_id: u64) -> bool {
        self.service(service_id)
            .map(|s| s.operator == *account)
            .unwrap_or(false)
    }
}

/// Registry kept in memory. Used by the devnet node and tests.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    services: RwLock<HashMap<u64, ServiceRecord>>,
    mechs: RwLock<HashMap<Address, MechProfile>>,
    service_mechs: RwLock<HashMap<u64, Address>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(&self, service_id: u64, operator: Address, state: ServiceState) {
        self.services.write().insert(
            service_id,
            ServiceRecord {
                service_id,
                operator,
                state,
            },
        );
    }

    /// Returns `false` if the service is unknown.
    pub fn set_service_state(&self, service_id: u64, state: ServiceState) -> bool {
        match self.services.write().get_mut(&service_id) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    /// Registers a mech and binds it to its service.
    pub fn register_mech(&self, profile: MechProfile) {
        self.service_mechs
            .write()
            .insert(profile.service_id, profile.mech);
        self.mechs.write().insert(profile.mech, profile);
    }

    /// Returns `false` if the mech is unknown.
    pub fn set_max_delivery_rate(&self, mech: &Address, rate: u64) -> bool {
        match self.mechs.write().get_mut(mech) {
            Some(profile) => {
                profile.max_delivery_rate = rate;
                true
            }
            None => false,
        }
    }

    pub fn mechs(&self) -> Vec<MechProfile> {
        let mut all: Vec<_> = self.mechs.read().values().cloned().collect();
        all.sort_by_key(|p| p.service_id);
        all
    }
}

impl FulfillerRegistry for InMemoryRegistry {
    fn service(&self, service_id: u64) -> Option<ServiceRecord> {
        self.services.read().get(&service_id).cloned()
    }

    fn mech_for_service(&self, service_id: u64) -> Option<Address> {
        self.service_mechs.read().get(&service_id).copied()
    }

    fn mech_profile(&self, mech: &Address) -> Option<MechProfile> {
        self.mechs.read().get(mech).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(service_id: u64) -> MechProfile {
        MechProfile {
            mech: Address::derive(&format!("mech-{service_id}")),
            service_id,
            payment_type: PaymentType::Native,
            max_delivery_rate: 10,
            factory: Address::derive("factory/native"),
        }
    }

    #[test]
    fn service_lookup_and_operator_check() {
        let reg = InMemoryRegistry::new();
        let op = Address::derive("operator");
        reg.register_service(7, op, ServiceState::Deployed);

        assert!(reg.service(7).unwrap().is_deployed());
        assert!(reg.is_operator(&op, 7));
        assert!(!reg.is_operator(&Address::derive("stranger"), 7));
        assert!(!reg.is_operator(&op, 8));
    }

    #[test]
    fn mech_is_bound_to_service() {
        let reg = InMemoryRegistry::new();
        let p = profile(3);
        reg.register_mech(p.clone());
        assert_eq!(reg.mech_for_service(3), Some(p.mech));
        assert_eq!(reg.mech_profile(&p.mech), Some(p));
        assert_eq!(reg.mech_for_service(4), None);
    }

    #[test]
    fn updates_report_unknown_entries() {
        let reg = InMemoryRegistry::new();
        assert!(!reg.set_service_state(1, ServiceState::TerminatedBonded));
        assert!(!reg.set_max_delivery_rate(&Address::derive("ghost"), 5));

        let p = profile(1);
        reg.register_mech(p.clone());
        assert!(reg.set_max_delivery_rate(&p.mech, 42));
        assert_eq!(reg.mech_profile(&p.mech).unwrap().max_delivery_rate, 42);
    }
}
