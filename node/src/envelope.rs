//! # Signed Calls
//!
//! Every state-changing RPC carries a [`SignedCall`]: the typed call, the
//! time it was issued, and an Ed25519 signature by the caller. The node
//! derives the caller's address from the public key, so a call can only
//! ever act on behalf of whoever signed it.
//!
//! ## Signing digest
//!
//! ```text
//! SHA-256( H("mech-node/call") || chain_id || issued_at || H(bincode(call)) )
//! ```
//!
//! `H` is SHA-256 and integers are 8-byte big-endian, as in
//! [`Transcript`]. Binding the chain id keeps a devnet call from being
//! replayed on another network.

use mech_contracts::events::{hex_bytes, hex_vecs};
use mech_contracts::{PaymentType, RequestId, SignedDeliveryBatch};
use mech_protocol::crypto::{MechKeypair, PublicKey, Signature, Transcript};
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};

/// Domain tag of the signing digest.
const CALL_DOMAIN_TAG: &str = "mech-node/call";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed public key")]
    MalformedPublicKey,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signature does not match the call")]
    InvalidSignature,

    #[error("call encoding failed: {0}")]
    Encoding(String),
}

/// A state-changing marketplace call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCall {
    /// Posts one request per payload to the mech of `priority_mech_service_id`.
    Request {
        #[serde(with = "hex_vecs")]
        payloads: Vec<Vec<u8>>,
        priority_mech_service_id: u64,
        #[serde(default)]
        requester_service_id: u64,
        response_timeout: u64,
        /// Native value attached to the call.
        #[serde(default)]
        value: u64,
        #[serde(default, with = "hex_bytes")]
        payment_data: Vec<u8>,
    },
    /// Delivers results on behalf of `mech`. Signed by its service operator.
    Deliver {
        mech: Address,
        request_ids: Vec<RequestId>,
        delivery_rates: Vec<u64>,
        #[serde(with = "hex_vecs")]
        results: Vec<Vec<u8>>,
    },
    /// Signed fast path on behalf of `mech`. Signed by its service operator.
    DeliverWithSignatures {
        mech: Address,
        batch: SignedDeliveryBatch,
    },
    Deposit {
        payment_type: PaymentType,
        #[serde(default)]
        amount: u64,
        #[serde(default)]
        value: u64,
        #[serde(default, with = "hex_bytes")]
        payment_data: Vec<u8>,
    },
    ProcessPayment {
        mech: Address,
    },
    Drain {
        payment_type: PaymentType,
    },
}

impl MarketCall {
    /// JSON-RPC method this call is submitted under.
    pub fn method(&self) -> &'static str {
        match self {
            MarketCall::Request { .. } => "mech_request",
            MarketCall::Deliver { .. } => "mech_deliver",
            MarketCall::DeliverWithSignatures { .. } => "mech_deliverWithSignatures",
            MarketCall::Deposit { .. } => "mech_deposit",
            MarketCall::ProcessPayment { .. } => "mech_processPayment",
            MarketCall::Drain { .. } => "mech_drain",
        }
    }
}

/// JSON-RPC methods that take a [`SignedCall`].
pub const WRITE_METHODS: [&str; 6] = [
    "mech_request",
    "mech_deliver",
    "mech_deliverWithSignatures",
    "mech_deposit",
    "mech_processPayment",
    "mech_drain",
];

/// A call plus its caller's signature. Keys and signatures are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCall {
    pub public_key: String,
    pub signature: String,
    /// Unix seconds.
    pub issued_at: u64,
    pub call: MarketCall,
}

/// Outcome of a successful signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedCall {
    pub signer: Address,
    /// Signing digest; doubles as the replay key.
    pub digest: [u8; 32],
}

pub fn signing_digest(
    chain_id: u64,
    issued_at: u64,
    call: &MarketCall,
) -> Result<[u8; 32], EnvelopeError> {
    let encoded = bincode::serialize(call).map_err(|e| EnvelopeError::Encoding(e.to_string()))?;
    Ok(Transcript::new()
        .text(CALL_DOMAIN_TAG)
        .u64(chain_id)
        .u64(issued_at)
        .bytes(&encoded)
        .finish())
}

impl SignedCall {
    pub fn sign(
        keypair: &MechKeypair,
        chain_id: u64,
        issued_at: u64,
        call: MarketCall,
    ) -> Result<Self, EnvelopeError> {
        let digest = signing_digest(chain_id, issued_at, &call)?;
        Ok(Self {
            public_key: keypair.public_key().to_hex(),
            signature: keypair.sign(&digest).to_hex(),
            issued_at,
            call,
        })
    }

    pub fn verify(&self, chain_id: u64) -> Result<VerifiedCall, EnvelopeError> {
        let public_key =
            PublicKey::from_hex(&self.public_key).map_err(|_| EnvelopeError::MalformedPublicKey)?;
        let signature =
            Signature::from_hex(&self.signature).map_err(|_| EnvelopeError::MalformedSignature)?;
        let digest = signing_digest(chain_id, self.issued_at, &self.call)?;
        if !public_key.verify(&digest, &signature) {
            return Err(EnvelopeError::InvalidSignature);
        }
        Ok(VerifiedCall {
            signer: Address::from_public_key(&public_key),
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> MarketCall {
        MarketCall::Deposit {
            payment_type: PaymentType::Native,
            amount: 0,
            value: 25,
            payment_data: Vec::new(),
        }
    }

    #[test]
    fn signer_is_derived_from_public_key() {
        let keys = MechKeypair::from_seed(&[3; 32]);
        let call = SignedCall::sign(&keys, 1, 100, deposit()).unwrap();
        let verified = call.verify(1).unwrap();
        assert_eq!(verified.signer, Address::from_public_key(&keys.public_key()));
    }

    #[test]
    fn tampered_call_fails() {
        let keys = MechKeypair::generate();
        let mut call = SignedCall::sign(&keys, 1, 100, deposit()).unwrap();
        call.call = MarketCall::Deposit {
            payment_type: PaymentType::Native,
            amount: 0,
            value: 2_500,
            payment_data: Vec::new(),
        };
        assert!(matches!(call.verify(1), Err(EnvelopeError::InvalidSignature)));
    }

    #[test]
    fn other_chain_fails() {
        let keys = MechKeypair::generate();
        let call = SignedCall::sign(&keys, 1, 100, deposit()).unwrap();
        assert!(matches!(call.verify(2), Err(EnvelopeError::InvalidSignature)));
    }

    #[test]
    fn issued_at_is_signed() {
        let keys = MechKeypair::generate();
        let mut call = SignedCall::sign(&keys, 1, 100, deposit()).unwrap();
        call.issued_at = 101;
        assert!(call.verify(1).is_err());
    }

    #[test]
    fn garbage_key_is_malformed() {
        let keys = MechKeypair::generate();
        let mut call = SignedCall::sign(&keys, 1, 100, deposit()).unwrap();
        call.public_key = "zz".into();
        assert!(matches!(call.verify(1), Err(EnvelopeError::MalformedPublicKey)));
    }

    #[test]
    fn json_shape_is_tagged_and_hex() {
        let call = MarketCall::Request {
            payloads: vec![b"hi".to_vec()],
            priority_mech_service_id: 1,
            requester_service_id: 0,
            response_timeout: 600,
            value: 10,
            payment_data: Vec::new(),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["request"]["payloads"][0], "6869");
        assert_eq!(call.method(), "mech_request");
        assert!(WRITE_METHODS.contains(&call.method()));

        let parsed: MarketCall = serde_json::from_value(serde_json::json!({
            "request": {
                "payloads": ["6869"],
                "priority_mech_service_id": 1,
                "response_timeout": 600
            }
        }))
        .unwrap();
        assert!(matches!(parsed, MarketCall::Request { value: 0, .. }));
    }
}
