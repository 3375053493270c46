//! # Account Addresses
//!
//! Every participant (requester, mech, operator, marketplace owner, escrow
//! account) is identified by a 32-byte [`Address`]. Key-backed accounts
//! derive theirs from an Ed25519 public key:
//!
//! ```text
//! public_key (32 bytes)
//!     -> BLAKE3(public_key) -> 32 bytes
//!     -> Bech32("mech", hash) -> mech1qw508d6qe...
//! ```
//!
//! Contract-style accounts (escrow trackers, the marketplace itself) have no
//! key; they get an address from [`Address::derive`], a BLAKE3 hash over a
//! label. The all-zero address is reserved and means "no account".

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ADDRESS_HRP;
use crate::crypto::hash::blake3_hash;
use crate::crypto::keys::PublicKey;

/// Errors that can occur while parsing an address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The Bech32 string could not be decoded.
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    /// The decoded address has an unexpected human-readable prefix.
    #[error("invalid HRP: expected '{expected}', got '{got}'")]
    InvalidHrp { expected: String, got: String },

    /// The decoded data has an unexpected length.
    #[error("invalid address data length: expected {expected} bytes, got {got}")]
    InvalidDataLength { expected: usize, got: usize },
}

/// A 32-byte account address.
///
/// Ordered so it can key a `BTreeMap`, which keeps snapshots deterministic.
///
/// ```
/// use mech_protocol::crypto::MechKeypair;
/// use mech_protocol::identity::Address;
///
/// let kp = MechKeypair::generate();
/// let addr = Address::from_public_key(&kp.public_key());
/// let text = addr.to_string();
/// assert!(text.starts_with("mech1"));
/// assert_eq!(text.parse::<Address>().unwrap(), addr);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// The reserved "no account" address.
    pub const ZERO: Address = Address([0u8; 32]);

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the address owned by an Ed25519 public key.
    pub fn from_public_key(pk: &PublicKey) -> Self {
        Self(blake3_hash(pk.as_bytes()))
    }

    /// Derives a keyless address from a label, e.g. `"escrow/native"`.
    ///
    /// Labels are domain-separated from public keys by BLAKE3's key
    /// derivation mode, so a label can never collide with a key-backed
    /// address.
    pub fn derive(label: &str) -> Self {
        Self(blake3::derive_key("mech-marketplace address v1", label.as_bytes()))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Bech32 form, `mech1...`.
    pub fn to_bech32(&self) -> String {
        self.to_string()
    }

    /// Parses a Bech32 `mech1...` string.
    pub fn from_bech32(s: &str) -> Result<Self, AddressError> {
        let (hrp, data) =
            bech32::decode(s.trim()).map_err(|e| AddressError::Bech32Decode(e.to_string()))?;

        if hrp.as_str() != ADDRESS_HRP {
            return Err(AddressError::InvalidHrp {
                expected: ADDRESS_HRP.to_string(),
                got: hrp.to_string(),
            });
        }

        let bytes: [u8; 32] =
            data.as_slice()
                .try_into()
                .map_err(|_| AddressError::InvalidDataLength {
                    expected: 32,
                    got: data.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Hex form, used as sled keys and in logs where bech32 is too long.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bech32(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hrp = Hrp::parse_unchecked(ADDRESS_HRP);
        bech32::encode_to_fmt::<Bech32, _>(f, hrp, &self.0).map_err(|_| fmt::Error)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &self.to_hex()[..12])
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_bech32(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                serde::de::Error::custom(format!("expected 32-byte address, got {}", bytes.len()))
            })?;
            Ok(Address(arr))
        }
    }
}
