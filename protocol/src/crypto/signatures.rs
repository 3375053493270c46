//! # Digital Signatures
//!
//! Ed25519 signing and verification. Requesters sign request ids for the
//! direct-delivery fast path; node clients sign call envelopes.
//!
//! ## Strictness
//!
//! We use `ed25519-dalek`'s strict verification. Some edge-case signatures
//! that lenient implementations accept are rejected here.

use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use thiserror::Error;

use super::keys::{MechKeypair, PublicKey, Signature};

/// Errors during signature operations.
///
/// Intentionally vague: we don't tell attackers why verification failed.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message.
///
/// # Example
///
/// ```
/// use mech_protocol::crypto::{MechKeypair, sign, verify};
///
/// let keypair = MechKeypair::generate();
/// let signature = sign(&keypair, b"request id");
/// assert!(verify(&keypair.public_key(), b"request id", &signature));
/// ```
pub fn sign(keypair: &MechKeypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify a signature against a public key and message.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Verify a signature from raw byte components, as they arrive off the wire.
pub fn verify_raw(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8; 64],
) -> Result<(), SignatureError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;
    let signature = DalekSignature::from_bytes(signature_bytes);
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}
