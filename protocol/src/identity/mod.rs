//! # Identity
//!
//! Account addresses. Keys live in [`crate::crypto`]; this module turns them
//! into the 32-byte identifiers the marketplace keys all of its state by.

pub mod address;

pub use address::{Address, AddressError};
