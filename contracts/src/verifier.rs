//! # Authorization Verification
//!
//! Answers one question: did `account` authorize `digest`? Two ways to say
//! yes:
//!
//! - **Signature**: the proof is `public_key (32) ‖ signature (64)`. The key
//!   must hash to the account address and the Ed25519 signature over the
//!   digest must verify.
//! - **Account validator**: accounts without a key (multisigs, smart
//!   accounts) register a predicate that decides for them.
//!
//! [`RequesterAuthorization`] picks the validator when the account has one
//! and falls back to signatures otherwise.

use mech_protocol::crypto::signatures::verify_raw;
use mech_protocol::crypto::{MechKeypair, PublicKey};
use mech_protocol::identity::Address;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Length of a signature proof: public key plus signature.
pub const SIGNATURE_PROOF_LEN: usize = 32 + 64;

pub trait AuthorizationVerifier: Send + Sync {
    fn verify(&self, account: &Address, digest: &[u8; 32], proof: &[u8]) -> bool;
}

/// The "is this valid" callback of a keyless account.
pub trait AccountValidator: Send + Sync {
    fn is_valid_signature(&self, digest: &[u8; 32], proof: &[u8]) -> bool;
}

/// Builds a signature proof for `digest`.
pub fn signature_proof(keypair: &MechKeypair, digest: &[u8; 32]) -> Vec<u8> {
    let mut proof = Vec::with_capacity(SIGNATURE_PROOF_LEN);
    proof.extend_from_slice(keypair.public_key().as_bytes());
    proof.extend_from_slice(keypair.sign(digest).as_bytes());
    proof
}

/// Ed25519 signature recovery.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureVerifier;

impl AuthorizationVerifier for SignatureVerifier {
    fn verify(&self, account: &Address, digest: &[u8; 32], proof: &[u8]) -> bool {
        if proof.len() != SIGNATURE_PROOF_LEN {
            return false;
        }
        let (key, sig) = proof.split_at(32);
        let Ok(key) = <[u8; 32]>::try_from(key) else {
            return false;
        };
        let Ok(sig) = <[u8; 64]>::try_from(sig) else {
            return false;
        };
        if Address::from_public_key(&PublicKey::from_bytes(key)) != *account {
            return false;
        }
        verify_raw(&key, digest, &sig).is_ok()
    }
}

/// Per-account validator callbacks.
#[derive(Default)]
pub struct AccountValidatorVerifier {
    validators: RwLock<HashMap<Address, Arc<dyn AccountValidator>>>,
}

impl AccountValidatorVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account: Address, validator: Arc<dyn AccountValidator>) {
        self.validators.write().insert(account, validator);
    }

    pub fn has_validator(&self, account: &Address) -> bool {
        self.validators.read().contains_key(account)
    }
}

impl AuthorizationVerifier for AccountValidatorVerifier {
    fn verify(&self, account: &Address, digest: &[u8; 32], proof: &[u8]) -> bool {
        // Clone out of the lock: the validator is foreign code and may call
        // back into us.
        let validator = self.validators.read().get(account).cloned();
        match validator {
            Some(v) => v.is_valid_signature(digest, proof),
            None => false,
        }
    }
}

/// Validator when registered, signature otherwise.
#[derive(Default)]
pub struct RequesterAuthorization {
    signatures: SignatureVerifier,
    validators: AccountValidatorVerifier,
}

impl RequesterAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_validator(&self, account: Address, validator: Arc<dyn AccountValidator>) {
        self.validators.register(account, validator);
    }
}

impl AuthorizationVerifier for RequesterAuthorization {
    fn verify(&self, account: &Address, digest: &[u8; 32], proof: &[u8]) -> bool {
        if self.validators.has_validator(account) {
            self.validators.verify(account, digest, proof)
        } else {
            self.signatures.verify(account, digest, proof)
        }
    }
}
