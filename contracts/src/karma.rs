//! # Karma
//!
//! Reputation scores. Each mech has a global score, and each
//! (requester, mech) pair has its own. Scores are signed and saturate
//! instead of wrapping.

use mech_protocol::identity::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Score keeping capability used by the marketplace.
pub trait ReputationLedger: Send + Sync {
    fn change_mech_karma(&self, mech: &Address, delta: i64);

    fn change_requester_mech_karma(&self, requester: &Address, mech: &Address, delta: i64);

    fn mech_karma(&self, mech: &Address) -> i64;

    fn requester_mech_karma(&self, requester: &Address, mech: &Address) -> i64;
}

/// In-memory karma ledger.
#[derive(Debug, Default)]
pub struct Karma {
    mech: RwLock<HashMap<Address, i64>>,
    requester_mech: RwLock<HashMap<(Address, Address), i64>>,
}

/// Serializable copy of every score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KarmaSnapshot {
    pub mech: Vec<(Address, i64)>,
    pub requester_mech: Vec<(Address, Address, i64)>,
}

impl Karma {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> KarmaSnapshot {
        let mut mech: Vec<_> = self.mech.read().iter().map(|(m, k)| (*m, *k)).collect();
        mech.sort();
        let mut requester_mech: Vec<_> = self
            .requester_mech
            .read()
            .iter()
            .map(|((r, m), k)| (*r, *m, *k))
            .collect();
        requester_mech.sort();
        KarmaSnapshot {
            mech,
            requester_mech,
        }
    }

    pub fn restore(&self, snapshot: KarmaSnapshot) {
        *self.mech.write() = snapshot.mech.into_iter().collect();
        *self.requester_mech.write() = snapshot
            .requester_mech
            .into_iter()
            .map(|(r, m, k)| ((r, m), k))
            .collect();
    }
}

impl ReputationLedger for Karma {
    fn change_mech_karma(&self, mech: &Address, delta: i64) {
        let mut scores = self.mech.write();
        let score = scores.entry(*mech).or_insert(0);
        *score = score.saturating_add(delta);
    }

    fn change_requester_mech_karma(&self, requester: &Address, mech: &Address, delta: i64) {
        let mut scores = self.requester_mech.write();
        let score = scores.entry((*requester, *mech)).or_insert(0);
        *score = score.saturating_add(delta);
    }

    fn mech_karma(&self, mech: &Address) -> i64 {
        self.mech.read().get(mech).copied().unwrap_or(0)
    }

    fn requester_mech_karma(&self, requester: &Address, mech: &Address) -> i64 {
        self.requester_mech
            .read()
            .get(&(*requester, *mech))
            .copied()
            .unwrap_or(0)
    }
}
