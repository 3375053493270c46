//! # Storage Module
//!
//! Persistence for node state. The marketplace itself is an in-memory state
//! machine; the node snapshots it after every accepted call and appends the
//! events each call emitted.
//!
//! ## Design Decisions
//!
//! 1. **sled trees per concern.** Snapshots, the event log and metadata each
//!    get their own keyspace.
//! 2. **Bincode for on-disk serialization.** Compact, fast, deterministic.
//!    JSON is for APIs and debugging; bincode is for storage.
//! 3. **Generic over payload types.** This crate doesn't know what a
//!    marketplace snapshot looks like, so the db stores any `Serialize` type.

pub mod db;

pub use db::{DbError, DbResult, MarketDb};
