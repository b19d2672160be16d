//! Execution-context capabilities.
//!
//! Catalog lookups may block and may take arbitrary locks, so they are only
//! legal at safe points with no store guard held. Every [`Catalog`] method
//! takes a [`MayBlock`] token. I/O completion callbacks run in a restricted
//! context and only ever receive a [`NoBlock`] token, which cannot be turned
//! into a `MayBlock`, so the lookup path is unreachable from them.
//!
//! [`Catalog`]: crate::catalog::Catalog

use std::marker::PhantomData;

/// Proof that the caller may block and perform catalog lookups
#[derive(Debug)]
pub struct MayBlock {
    // !Send: a token stays on the thread that asserted the safe point
    _not_send: PhantomData<*const ()>,
}

impl MayBlock {
    /// Assert that the current thread is at a safe point: no store guard
    /// held and not inside an I/O completion callback.
    pub fn assert_safe_point() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }

    /// A blocking context may always do non-blocking work
    pub fn restrict(&self) -> NoBlock {
        NoBlock { _private: () }
    }
}

/// Restricted context: completion callbacks, critical sections
#[derive(Debug)]
pub struct NoBlock {
    _private: (),
}

impl NoBlock {
    /// Token handed to I/O completion callbacks
    pub fn completion() -> Self {
        Self { _private: () }
    }
}
