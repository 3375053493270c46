//! # Cryptographic Primitives
//!
//! Every request id, every domain separator and every signed delivery flows
//! through here.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **Ed25519** for signatures: fast and deterministic.
//! - **SHA-256** for structured hashing: request ids must be reproducible
//!   by any off-chain signer, and SHA-256 is available everywhere.
//! - **BLAKE3** for address derivation: fast and already what our
//!   addresses are built from.
//!
//! Everything here is a thin, type-safe wrapper around audited
//! implementations. We don't roll our own.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{blake3_hash, sha256_array, Transcript};
pub use keys::{MechKeypair, PublicKey, Signature};
pub use signatures::{sign, verify};
