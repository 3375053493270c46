//! Typed events emitted by marketplace entry points, in call order.

use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};

use crate::escrow::PaymentType;
use crate::request_id::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceEvent {
    Request {
        request_id: RequestId,
        requester: Address,
        priority_mech: Address,
        response_deadline: u64,
        agreed_rate: u64,
        payment_type: PaymentType,
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
    },
    Deliver {
        request_id: RequestId,
        requester: Address,
        mech: Address,
        delivery_rate: u64,
        #[serde(with = "hex_bytes")]
        result: Vec<u8>,
    },
    /// A non-priority mech delivered after the response deadline.
    Failover {
        request_id: RequestId,
        priority_mech: Address,
        delivery_mech: Address,
    },
    /// Request and delivery in one step, authorized by the requester.
    DeliverWithSignature {
        request_id: RequestId,
        requester: Address,
        mech: Address,
        delivery_rate: u64,
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
        #[serde(with = "hex_bytes")]
        result: Vec<u8>,
    },
    Deposit {
        account: Address,
        payment_type: PaymentType,
        amount: u64,
    },
    Withdraw {
        mech: Address,
        payment_type: PaymentType,
        payout: u64,
        fee: u64,
    },
    Drained {
        payment_type: PaymentType,
        drainer: Address,
        amount: u64,
    },
    OwnerUpdated {
        owner: Address,
    },
    FeeUpdated {
        fee_bps: u16,
    },
    ResponseTimeoutsUpdated {
        min: u64,
        max: u64,
    },
    FactoryStatusUpdated {
        factory: Address,
        enabled: bool,
    },
    PaymentTrackerUpdated {
        payment_type: PaymentType,
        escrow_account: Address,
    },
}

impl MarketplaceEvent {
    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketplaceEvent::Request { .. } => "request",
            MarketplaceEvent::Deliver { .. } => "deliver",
            MarketplaceEvent::Failover { .. } => "failover",
            MarketplaceEvent::DeliverWithSignature { .. } => "deliver_with_signature",
            MarketplaceEvent::Deposit { .. } => "deposit",
            MarketplaceEvent::Withdraw { .. } => "withdraw",
            MarketplaceEvent::Drained { .. } => "drained",
            MarketplaceEvent::OwnerUpdated { .. } => "owner_updated",
            MarketplaceEvent::FeeUpdated { .. } => "fee_updated",
            MarketplaceEvent::ResponseTimeoutsUpdated { .. } => "response_timeouts_updated",
            MarketplaceEvent::FactoryStatusUpdated { .. } => "factory_status_updated",
            MarketplaceEvent::PaymentTrackerUpdated { .. } => "payment_tracker_updated",
        }
    }
}

/// Hex strings in JSON, raw bytes in bincode.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
        } else {
            <Vec<u8>>::deserialize(deserializer)
        }
    }
}

/// A list of byte strings: hex strings in JSON, raw bytes in bincode.
pub mod hex_vecs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            items
                .iter()
                .map(hex::encode)
                .collect::<Vec<_>>()
                .serialize(serializer)
        } else {
            items.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        if deserializer.is_human_readable() {
            <Vec<String>>::deserialize(deserializer)?
                .iter()
                .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom))
                .collect()
        } else {
            <Vec<Vec<u8>>>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_keyed_by_kind_and_hex_encoded() {
        let ev = MarketplaceEvent::Deliver {
            request_id: RequestId::from_bytes([1; 32]),
            requester: Address::derive("r"),
            mech: Address::derive("m"),
            delivery_rate: 5,
            result: b"ok".to_vec(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["deliver"]["result"], "6f6b");
        assert_eq!(json["deliver"]["delivery_rate"], 5);
        let back: MarketplaceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
        assert_eq!(back.kind(), "deliver");
    }

    #[test]
    fn bincode_roundtrip() {
        let ev = MarketplaceEvent::Request {
            request_id: RequestId::from_bytes([2; 32]),
            requester: Address::derive("r"),
            priority_mech: Address::derive("m"),
            response_deadline: 1_000,
            agreed_rate: 10,
            payment_type: PaymentType::Token,
            payload: vec![1, 2, 3],
        };
        let bytes = bincode::serialize(&ev).unwrap();
        assert_eq!(bincode::deserialize::<MarketplaceEvent>(&bytes).unwrap(), ev);
    }
}
