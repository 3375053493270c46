// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Mech Marketplace Contracts
//!
//! Requesters post paid work items to a priority mech; the mech delivers a
//! result and is paid out of escrow. If the priority mech misses its
//! response window, any other authorized mech may deliver instead, and the
//! priority mech loses karma.
//!
//! - **Marketplace**: request lifecycle, delivery routing, signed fast path.
//! - **Escrow**: one balance tracker per payment type (native, token,
//!   subscription), each backed by a pluggable payment strategy.
//! - **Karma**: reputation of mechs and requester/mech pairs.
//! - **Registry / Verifier**: read-only views of who may act and whether a
//!   requester authorized a request.
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic is checked. Overflow is an error, never a wrap.
//! 2. Calls are atomic: checks first, one escrow call, then writes.
//! 3. Foreign code is called from behind a reentrancy guard.
//! 4. Every stored type is serializable (serde) for snapshots and the RPC.

pub mod devnet;
pub mod escrow;
pub mod events;
pub mod guard;
pub mod karma;
pub mod marketplace;
pub mod pending;
pub mod registry;
pub mod request_id;
pub mod service;
pub mod token;
pub mod verifier;

pub use escrow::{EscrowError, PaymentTracker, PaymentType};
pub use events::MarketplaceEvent;
pub use marketplace::{
    CallContext, Marketplace, MarketplaceConfig, MarketplaceError, RequestStatus,
    SignedDeliveryBatch,
};
pub use request_id::RequestId;
pub use service::MarketplaceService;
