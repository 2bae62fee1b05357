//! Shared "current version" slot for [`PersistentIntTree`].
//!
//! [`SharedIntTree`] publishes new tree versions to concurrent readers.
//! Readers take an O(1) snapshot and keep observing it, unaffected by later
//! publications; writers build a new version outside any lock and publish it
//! with [`compare_and_swap`](SharedIntTree::compare_and_swap) or the
//! retrying [`update`](SharedIntTree::update).
//!
//! The slot is a read-write lock, not a lock-free atomic pointer. The lock
//! guards only the root pointer: the critical section is a pointer clone or a
//! pointer replacement, never tree construction. Concurrent
//! `compare_and_swap` calls run one at a time.
//!
//! # Examples
//!
//! ```rust
//! use inttree::persistent::SharedIntTree;
//!
//! let registry = SharedIntTree::default();
//! let before = registry.load();
//!
//! registry.add_or_update(1, "logger", 10);
//!
//! assert!(before.is_empty()); // Snapshots never change
//! assert_eq!(registry.load().try_find(1, "logger"), Some(&10));
//! ```

use super::PersistentIntTree;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::fmt;

macro_rules! trace_event {
    ($level:ident, $($arguments:tt)*) => {
        #[cfg(feature = "tracing")]
        tracing::$level!($($arguments)*);
    };
}

// =============================================================================
// Error Definition
// =============================================================================

/// Error returned by [`SharedIntTree::compare_and_swap`] when the slot no
/// longer holds the expected version.
///
/// Carries both the rejected tree, so the caller can inspect or retry it, and
/// the version actually found in the slot.
pub struct VersionConflictError<K, V> {
    rejected: PersistentIntTree<K, V>,
    current: PersistentIntTree<K, V>,
}

impl<K, V> VersionConflictError<K, V> {
    /// Returns the tree that was not published.
    #[must_use]
    pub const fn rejected(&self) -> &PersistentIntTree<K, V> {
        &self.rejected
    }

    /// Returns the version held by the slot when the swap was attempted.
    #[must_use]
    pub const fn current(&self) -> &PersistentIntTree<K, V> {
        &self.current
    }

    /// Consumes the error, returning the tree that was not published.
    #[must_use]
    pub fn into_rejected(self) -> PersistentIntTree<K, V> {
        self.rejected
    }

    /// Consumes the error, returning the version held by the slot.
    #[must_use]
    pub fn into_current(self) -> PersistentIntTree<K, V> {
        self.current
    }
}

impl<K, V> fmt::Debug for VersionConflictError<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("VersionConflictError")
            .field("rejected_len", &self.rejected.len())
            .field("current_len", &self.current.len())
            .finish()
    }
}

impl<K, V> fmt::Display for VersionConflictError<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "SharedIntTree: expected version was replaced (current version holds {} entries)",
            self.current.len()
        )
    }
}

impl<K, V> std::error::Error for VersionConflictError<K, V> {}

// =============================================================================
// SharedIntTree Definition
// =============================================================================

/// A slot holding the current version of a [`PersistentIntTree`].
///
/// With the `arc` feature the slot is `Send + Sync` (for `Send + Sync` keys
/// and values) and can be shared between threads, e.g. behind an `Arc`.
pub struct SharedIntTree<K, V> {
    current: RwLock<PersistentIntTree<K, V>>,
}

impl<K, V> SharedIntTree<K, V> {
    /// Creates a slot holding `tree`.
    #[must_use]
    pub fn new(tree: PersistentIntTree<K, V>) -> Self {
        Self {
            current: RwLock::new(tree),
        }
    }

    /// Returns a snapshot of the current version.
    #[must_use]
    pub fn load(&self) -> PersistentIntTree<K, V> {
        self.current.read().clone()
    }

    /// Publishes `tree` unconditionally.
    pub fn store(&self, tree: PersistentIntTree<K, V>) {
        drop(self.swap(tree));
    }

    /// Publishes `tree` unconditionally, returning the previous version.
    pub fn swap(&self, tree: PersistentIntTree<K, V>) -> PersistentIntTree<K, V> {
        let mut guard = self.current.write();
        let previous = std::mem::replace(&mut *guard, tree);
        trace_event!(trace, length = guard.len(), "published tree version");
        previous
    }

    /// Publishes `new` only if the slot still holds `expected`.
    ///
    /// Versions are compared by identity ([`PersistentIntTree::ptr_eq`]), so
    /// `expected` should be a snapshot obtained from [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Returns [`VersionConflictError`] carrying `new` and the current version
    /// if another writer published in the meantime.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::SharedIntTree;
    ///
    /// let slot = SharedIntTree::default();
    /// let snapshot = slot.load();
    ///
    /// slot.add_or_update(1, "a", 1); // Concurrent writer
    ///
    /// let result = slot.compare_and_swap(&snapshot, snapshot.add_or_update(2, "b", 2));
    /// let conflict = result.unwrap_err();
    /// assert_eq!(conflict.current().len(), 1);
    /// assert_eq!(conflict.rejected().len(), 1);
    /// ```
    pub fn compare_and_swap(
        &self,
        expected: &PersistentIntTree<K, V>,
        new: PersistentIntTree<K, V>,
    ) -> Result<PersistentIntTree<K, V>, VersionConflictError<K, V>> {
        let guard = self.current.upgradable_read();
        if !guard.ptr_eq(expected) {
            trace_event!(trace, current_length = guard.len(), "version conflict");
            return Err(VersionConflictError {
                rejected: new,
                current: guard.clone(),
            });
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let previous = std::mem::replace(&mut *guard, new);
        trace_event!(trace, length = guard.len(), "published tree version");
        Ok(previous)
    }

    /// Publishes `build(&current)` with an optimistic retry loop.
    ///
    /// `build` runs outside the lock and may be called several times if other
    /// writers publish concurrently; it should be free of side effects.
    /// Returns the published version.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::SharedIntTree;
    ///
    /// let counters = SharedIntTree::default();
    /// for _ in 0..3 {
    ///     counters.update(|tree| tree.add_or_update_with(7, "hits", 1, |old, new| old + new));
    /// }
    /// assert_eq!(counters.load().try_find(7, "hits"), Some(&3));
    /// ```
    #[cfg_attr(not(feature = "tracing"), allow(unused_assignments, unused_variables))]
    pub fn update<F>(&self, mut build: F) -> PersistentIntTree<K, V>
    where
        F: FnMut(&PersistentIntTree<K, V>) -> PersistentIntTree<K, V>,
    {
        let mut snapshot = self.load();
        let mut attempts: usize = 1;
        loop {
            let candidate = build(&snapshot);
            match self.compare_and_swap(&snapshot, candidate.clone()) {
                Ok(_) => {
                    trace_event!(
                        debug,
                        attempts,
                        length = candidate.len(),
                        height = candidate.height(),
                        "tree update published"
                    );
                    return candidate;
                }
                Err(conflict) => {
                    snapshot = conflict.into_current();
                    attempts += 1;
                }
            }
        }
    }
}

impl<K: Clone + PartialEq, V: Clone> SharedIntTree<K, V> {
    /// Adds or replaces an entry in the current version and publishes it.
    pub fn add_or_update(&self, hash: i32, key: K, value: V) -> PersistentIntTree<K, V> {
        self.update(|tree| tree.add_or_update(hash, key.clone(), value.clone()))
    }
}

impl<K, V> Default for SharedIntTree<K, V> {
    fn default() -> Self {
        Self::new(PersistentIntTree::new())
    }
}

impl<K, V> From<PersistentIntTree<K, V>> for SharedIntTree<K, V> {
    fn from(tree: PersistentIntTree<K, V>) -> Self {
        Self::new(tree)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for SharedIntTree<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("SharedIntTree")
            .field(&*self.current.read())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
