//! The loaded-module collaborator
//!
//! Symbols point back at the module that defined them so that a lookup can
//! trigger that module's deferred ("partial") linking. The module itself is
//! owned by the patching pipeline; symbols only keep a weak reference.

use alloc::sync::{Arc, Weak};
use core::fmt::Debug;

/// A loaded object module as seen by the symbol layer.
pub trait Binary: Send + Sync {
    /// Applies the deferred relocations of section `section`.
    ///
    /// Called every time a symbol of that section is found while the table
    /// is in partial-link mode, so implementations should make repeated calls
    /// cheap. Returns whether the section is linked.
    fn partial_link(&self, section: usize) -> bool;

    /// Load base of the module, used to place code near it.
    fn base_address(&self) -> usize;
}

/// A non-owning reference from a symbol to its owning [`Binary`].
///
/// Modules may be unloaded while symbols describing them are still briefly
/// reachable; upgrading then fails instead of touching freed memory.
#[derive(Clone)]
pub struct BinaryRef {
    inner: Weak<dyn Binary>,
}

impl BinaryRef {
    /// Creates a weak reference to `binary`.
    #[inline]
    pub fn new(binary: &Arc<dyn Binary>) -> Self {
        Self {
            inner: Arc::downgrade(binary),
        }
    }

    /// Attempts to get the module back. Fails once it has been dropped.
    #[inline]
    pub fn upgrade(&self) -> Option<Arc<dyn Binary>> {
        self.inner.upgrade()
    }

    /// Whether the referenced module is still alive.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() != 0
    }
}

impl From<&Arc<dyn Binary>> for BinaryRef {
    fn from(binary: &Arc<dyn Binary>) -> Self {
        Self::new(binary)
    }
}

impl Debug for BinaryRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BinaryRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}
