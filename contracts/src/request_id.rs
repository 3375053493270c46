//! # Request Ids
//!
//! A request id is a pure function of four inputs: the domain separator of
//! the marketplace instance, the requester's address, the payload bytes and
//! the requester's current nonce. There is no randomness, so a requester
//! signing off-chain and the marketplace derive the same id.
//!
//! ```text
//! domain     = SHA-256( H(DOMAIN_TYPE) ‖ H(name) ‖ H(version) ‖ chain_id ‖ marketplace )
//! struct     = SHA-256( H(REQUEST_TYPE) ‖ requester ‖ H(payload) ‖ nonce )
//! request_id = SHA-256( 0x19 ‖ 0x01 ‖ domain ‖ struct )
//! ```
//!
//! Integers are 8-byte big-endian, `H` is SHA-256.

use mech_protocol::config::{DOMAIN_NAME, DOMAIN_TYPE_TAG, DOMAIN_VERSION, REQUEST_TYPE_TAG};
use mech_protocol::crypto::Transcript;
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a hex request id.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid request id: expected 64 hex characters")]
pub struct RequestIdParseError;

/// Content-derived request identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RequestId([u8; 32]);

impl RequestId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, RequestIdParseError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| RequestIdParseError)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| RequestIdParseError)?;
        Ok(Self(arr))
    }
}

impl FromStr for RequestId {
    type Err = RequestIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({}..)", &self.to_hex()[..12])
    }
}

impl Serialize for RequestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            RequestId::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                serde::de::Error::custom(format!("expected 32-byte request id, got {}", bytes.len()))
            })?;
            Ok(RequestId(arr))
        }
    }
}

/// Binds request ids to one marketplace instance on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSeparator {
    chain_id: u64,
    marketplace: Address,
    separator: [u8; 32],
}

impl DomainSeparator {
    pub fn new(chain_id: u64, marketplace: Address) -> Self {
        Self {
            chain_id,
            marketplace,
            separator: Self::compute(chain_id, &marketplace),
        }
    }

    pub fn compute(chain_id: u64, marketplace: &Address) -> [u8; 32] {
        Transcript::new()
            .text(DOMAIN_TYPE_TAG)
            .text(DOMAIN_NAME)
            .text(DOMAIN_VERSION)
            .u64(chain_id)
            .word(marketplace.as_bytes())
            .finish()
    }

    /// Separator for the chain a call is executing on. Recomputed when the
    /// chain differs from the one recorded at construction (fork, migration).
    pub fn for_chain(&self, chain_id: u64) -> [u8; 32] {
        if chain_id == self.chain_id {
            self.separator
        } else {
            Self::compute(chain_id, &self.marketplace)
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn marketplace(&self) -> &Address {
        &self.marketplace
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.separator
    }
}

/// Derives the id of a request.
pub fn request_id(domain: &[u8; 32], requester: &Address, payload: &[u8], nonce: u64) -> RequestId {
    let struct_hash = Transcript::new()
        .text(REQUEST_TYPE_TAG)
        .word(requester.as_bytes())
        .bytes(payload)
        .u64(nonce)
        .finish();
    RequestId(
        Transcript::new()
            .raw(&[0x19, 0x01])
            .word(domain)
            .word(&struct_hash)
            .finish(),
    )
}
