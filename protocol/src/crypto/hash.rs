//! # Hashing Utilities
//!
//! Two hash functions, and we refuse to support more without a very good
//! reason:
//!
//! - **SHA-256**: used for every structured digest that an outside party
//!   has to reproduce: domain separators and request ids. Off-chain signers
//!   in any language can compute it.
//! - **BLAKE3**: used for address derivation from public keys.
//!
//! ## Structured hashing
//!
//! [`Transcript`] builds a SHA-256 digest over a sequence of typed fields.
//! Fixed-width fields (`u64`, 32-byte words) are absorbed as-is; variable
//! length fields are absorbed as their own SHA-256 digest, so two different
//! field splits can never produce the same preimage.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// ```
/// use mech_protocol::crypto::sha256_array;
///
/// let hash = sha256_array(b"mech marketplace");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use mech_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"mech marketplace");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental SHA-256 digest over typed fields.
///
/// ```
/// use mech_protocol::crypto::Transcript;
///
/// let a = Transcript::new().bytes(b"ab").bytes(b"c").finish();
/// let b = Transcript::new().bytes(b"a").bytes(b"bc").finish();
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Default)]
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    /// Starts an empty transcript.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Absorbs raw bytes verbatim. Only use for fixed-width prefixes.
    pub fn raw(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Absorbs a 32-byte word.
    pub fn word(mut self, word: &[u8; 32]) -> Self {
        self.hasher.update(word);
        self
    }

    /// Absorbs a `u64` as 8 big-endian bytes.
    pub fn u64(mut self, value: u64) -> Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    /// Absorbs a variable-length byte string as its SHA-256 digest.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.hasher.update(sha256_array(data));
        self
    }

    /// Absorbs a string as the SHA-256 digest of its UTF-8 bytes.
    pub fn text(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    /// Finalizes the transcript into a 32-byte digest.
    pub fn finish(self) -> [u8; 32] {
        let result = self.hasher.finalize();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }
}
