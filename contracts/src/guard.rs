//! # Reentrancy Guard
//!
//! Every component that calls into foreign code (token ledgers, account
//! validators) keeps its state inside a [`Guarded`] cell.
//!
//! - Calls from *different* threads are serialized by the mutex: the second
//!   caller waits for the first call to return.
//! - A call from the *same* thread while a call is in flight (a collaborator
//!   calling back into us) finds the `RefCell` already borrowed and fails
//!   with [`ReentrancyError`] instead of observing half-written state.
//!
//! The lock is held for the whole call, including every external call made
//! from inside it, and released only when the closure returns.

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use thiserror::Error;

/// A call tried to enter a component that is already mid-call on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reentrant call rejected")]
pub struct ReentrancyError;

/// State behind a held-until-return reentrancy lock.
pub struct Guarded<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Runs a mutating call.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ReentrancyError> {
        let lock = self.inner.lock();
        let mut state = lock.try_borrow_mut().map_err(|_| ReentrancyError)?;
        Ok(f(&mut state))
    }

    /// Runs a read-only call. Reads are rejected while a mutating call is in
    /// flight on this thread, since the state may be half-updated.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReentrancyError> {
        let lock = self.inner.lock();
        let state = lock.try_borrow().map_err(|_| ReentrancyError)?;
        Ok(f(&state))
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().into_inner()
    }
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Guarded(..)")
    }
}
