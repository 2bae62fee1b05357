//! Persistent (immutable) integer-keyed trees.
//!
//! This module provides an immutable AVL tree keyed by 32-bit integer hashes,
//! plus the pieces built on top of it:
//!
//! - [`PersistentIntTree`]: AVL tree keyed by `i32` hashes, chaining entries
//!   whose hashes collide
//! - [`PersistentHashTree`]: Map front-end that derives the hash from the key
//!   with a [`BuildHasher`](std::hash::BuildHasher)
//! - [`SharedIntTree`]: Slot publishing the current tree version to concurrent
//!   readers
//!
//! # Structural Sharing
//!
//! Every update copies only the nodes on the path from the root to the
//! affected node. All other subtrees are shared between the old and the new
//! version, so an update costs O(log n) allocations and previous versions
//! stay valid for as long as anyone holds them.
//!
//! # Examples
//!
//! ## `PersistentIntTree`
//!
//! ```rust
//! use inttree::persistent::PersistentIntTree;
//!
//! let tree = PersistentIntTree::new()
//!     .add_or_update(30, "thirty", 3)
//!     .add_or_update(10, "ten", 1)
//!     .add_or_update(20, "twenty", 2);
//!
//! // Entries are visited in ascending hash order
//! let keys: Vec<&&str> = tree.keys().collect();
//! assert_eq!(keys, vec![&"ten", &"twenty", &"thirty"]);
//!
//! // Structural sharing: the original tree is preserved
//! let updated = tree.add_or_update(10, "ten", 100);
//! assert_eq!(tree.try_find(10, "ten"), Some(&1));     // Original unchanged
//! assert_eq!(updated.try_find(10, "ten"), Some(&100)); // New version
//! ```
//!
//! ## `PersistentHashTree`
//!
//! ```rust
//! use inttree::persistent::PersistentHashTree;
//!
//! let map = PersistentHashTree::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2);
//! assert_eq!(map.get("one"), Some(&1));
//!
//! let updated = map.remove("one");
//! assert_eq!(map.len(), 2);     // Original unchanged
//! assert_eq!(updated.len(), 1); // New version
//! ```
//!
//! ## `SharedIntTree`
//!
//! ```rust
//! use inttree::persistent::SharedIntTree;
//!
//! let slot = SharedIntTree::default();
//! slot.add_or_update(1, "one", 1);
//!
//! let snapshot = slot.load();
//! slot.add_or_update(2, "two", 2);
//!
//! assert_eq!(snapshot.len(), 1);    // Readers keep their version
//! assert_eq!(slot.load().len(), 2); // New readers see the update
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod hash_tree;
mod int_tree;
mod shared;

pub use hash_tree::PersistentHashTree;
pub use int_tree::PersistentIntTree;
pub use int_tree::PersistentIntTreeEntries;
pub use int_tree::PersistentIntTreeIntoIterator;
pub use int_tree::PersistentIntTreeIterator;
pub use shared::SharedIntTree;
pub use shared::VersionConflictError;

#[cfg(feature = "ahash")]
pub use hash_tree::AHashTree;
#[cfg(feature = "fxhash")]
pub use hash_tree::FxHashTree;

// =============================================================================
// Thread Safety
// =============================================================================

#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(PersistentIntTree<String, i32>: Send, Sync);
#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(PersistentHashTree<String, i32>: Send, Sync);
#[cfg(feature = "arc")]
static_assertions::assert_impl_all!(SharedIntTree<String, i32>: Send, Sync);

#[cfg(not(feature = "arc"))]
static_assertions::assert_not_impl_any!(PersistentIntTree<String, i32>: Send, Sync);
#[cfg(not(feature = "arc"))]
static_assertions::assert_not_impl_any!(SharedIntTree<String, i32>: Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert!(ReferenceCounter::ptr_eq(
            &reference_counter,
            &reference_counter_clone
        ));
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }

    #[rstest]
    fn test_unwrap_or_clone_reuses_unique_allocation() {
        let unique: ReferenceCounter<Vec<i32>> = ReferenceCounter::new(vec![1, 2]);
        assert_eq!(ReferenceCounter::unwrap_or_clone(unique), vec![1, 2]);

        let shared: ReferenceCounter<Vec<i32>> = ReferenceCounter::new(vec![3]);
        let other = shared.clone();
        assert_eq!(ReferenceCounter::unwrap_or_clone(shared), vec![3]);
        assert_eq!(ReferenceCounter::strong_count(&other), 1);
    }
}
