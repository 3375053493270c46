// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Mech Protocol: Core Primitives
//!
//! The foundation the marketplace contracts and the node are built on.
//! Nothing in here knows what a request or a mech is; it only knows how to
//! name accounts, hash things deterministically, check signatures, and put
//! bytes on disk.
//!
//! ## Modules
//!
//! - **config**: Protocol constants: fee basis, timeout bounds, domain tags.
//! - **crypto**: SHA-256/BLAKE3 hashing and Ed25519 keys and signatures.
//! - **identity**: 32-byte account addresses with Bech32 (`mech1...`) encoding.
//! - **storage**: sled-backed persistence for snapshots and event logs.
//!
//! ## Design Philosophy
//!
//! 1. Deterministic everything. Two observers hashing the same inputs must
//!    get the same bytes, forever.
//! 2. No unsafe code.
//! 3. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod storage;
