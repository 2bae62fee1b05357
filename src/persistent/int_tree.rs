//! Persistent (immutable) integer-keyed AVL tree with hash-collision chaining.
//!
//! This module provides [`PersistentIntTree`], an immutable balanced search
//! tree keyed by a 32-bit integer (usually the hash code of a logical key).
//!
//! # Overview
//!
//! Every node holds one primary entry `(key, value)` for its integer hash, plus
//! an optional list of *conflicts*: entries whose logical key differs from the
//! primary one but whose hash is the same.
//!
//! - O(log N) lookup
//! - O(log N) insert / update
//! - O(log N) remove
//! - O(1) len, `is_empty` and clone
//!
//! Lookup cost grows with the length of a conflict list, which stays short as
//! long as the hash function distributes well.
//!
//! All operations return new trees without modifying the original, and
//! structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use inttree::persistent::PersistentIntTree;
//!
//! let tree = PersistentIntTree::new()
//!     .add_or_update(10, "a", 1)
//!     .add_or_update(10, "b", 2) // same hash, different logical key
//!     .add_or_update(3, "c", 3);
//!
//! assert_eq!(tree.get_value_or_default(10, "a", -1), 1);
//! assert_eq!(tree.get_value_or_default(10, "b", -1), 2);
//! assert_eq!(tree.get_value_or_default(10, "z", -1), -1);
//!
//! // In-order traversal is sorted by hash
//! let keys: Vec<&&str> = tree.keys().collect();
//! assert_eq!(keys, vec![&"c", &"a", &"b"]);
//! ```
//!
//! # Internal Structure
//!
//! The tree maintains the following invariants:
//! 1. Hashes in the left subtree are smaller, hashes in the right subtree larger
//! 2. For every node, the heights of its subtrees differ by at most one
//! 3. Every cached height equals the real height of its subtree
//! 4. Conflict entries share their node's hash and have pairwise-distinct keys
//!    that differ from the primary key

use super::ReferenceCounter;
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::{FromIterator, FusedIterator};

/// Inline capacity of the traversal stack.
///
/// An AVL tree of height `h` holds at least `fib(h + 2) - 1` nodes; with at
/// most 2^32 distinct hashes the height never exceeds 46.
const TRAVERSAL_STACK_SIZE: usize = 48;

type Link<K, V> = Option<ReferenceCounter<Node<K, V>>>;

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node structure for the AVL tree.
#[derive(Clone)]
struct Node<K, V> {
    hash: i32,
    key: K,
    value: V,
    conflicts: Option<ReferenceCounter<[(K, V)]>>,
    left: Link<K, V>,
    right: Link<K, V>,
    height: u8,
}

/// Height of an optional subtree; the empty tree has height 0.
fn height<K, V>(link: Option<&ReferenceCounter<Node<K, V>>>) -> u8 {
    link.map_or(0, |node| node.height)
}

impl<K, V> Node<K, V> {
    fn new(
        hash: i32,
        key: K,
        value: V,
        conflicts: Option<ReferenceCounter<[(K, V)]>>,
        left: Link<K, V>,
        right: Link<K, V>,
    ) -> Self {
        let height = height(left.as_ref()).max(height(right.as_ref())) + 1;
        Self {
            hash,
            key,
            value,
            conflicts,
            left,
            right,
            height,
        }
    }

    const fn leaf(hash: i32, key: K, value: V) -> Self {
        Self {
            hash,
            key,
            value,
            conflicts: None,
            left: None,
            right: None,
            height: 1,
        }
    }

    fn conflicts(&self) -> &[(K, V)] {
        self.conflicts.as_deref().unwrap_or_default()
    }

    /// Finds the value stored for `key` among the entries of this node.
    fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        // Plain `PartialEq`; key types with cheap identity checks get them through their own impl
        if self.key.borrow() == key {
            return Some(&self.value);
        }
        self.conflicts()
            .iter()
            .find(|(conflict_key, _)| conflict_key.borrow() == key)
            .map(|(_, value)| value)
    }
}

impl<K: Clone, V: Clone> Node<K, V> {
    /// Creates a copy of this node with new children.
    ///
    /// Hash, entries and conflicts are preserved; the height is recomputed.
    fn with_children(&self, left: Link<K, V>, right: Link<K, V>) -> Self {
        Self::new(
            self.hash,
            self.key.clone(),
            self.value.clone(),
            self.conflicts.clone(),
            left,
            right,
        )
    }

    /// Creates a copy of this node with a new primary entry.
    fn with_entry(&self, key: K, value: V) -> Self {
        Self {
            hash: self.hash,
            key,
            value,
            conflicts: self.conflicts.clone(),
            left: self.left.clone(),
            right: self.right.clone(),
            height: self.height,
        }
    }

    /// Creates a copy of this node with a new conflict list.
    ///
    /// An empty list is stored as `None`.
    fn with_conflicts(&self, conflicts: Vec<(K, V)>) -> Self {
        Self {
            hash: self.hash,
            key: self.key.clone(),
            value: self.value.clone(),
            conflicts: to_conflicts(conflicts),
            left: self.left.clone(),
            right: self.right.clone(),
            height: self.height,
        }
    }
}

fn to_conflicts<K, V>(entries: Vec<(K, V)>) -> Option<ReferenceCounter<[(K, V)]>> {
    if entries.is_empty() {
        None
    } else {
        Some(ReferenceCounter::from(entries))
    }
}

// =============================================================================
// Update Outcomes
// =============================================================================

/// Result of a recursive upsert on a subtree.
enum Upsert<K, V> {
    /// Nothing changed; the caller keeps sharing the old subtree.
    Unchanged,
    /// An existing entry got a new value; the shape of the tree is unchanged.
    Replaced(ReferenceCounter<Node<K, V>>),
    /// A new logical entry was added.
    Added(ReferenceCounter<Node<K, V>>),
}

impl<K, V> Upsert<K, V> {
    fn map<F>(self, rebuild: F) -> Self
    where
        F: FnOnce(ReferenceCounter<Node<K, V>>) -> ReferenceCounter<Node<K, V>>,
    {
        match self {
            Self::Unchanged => Self::Unchanged,
            Self::Replaced(node) => Self::Replaced(rebuild(node)),
            Self::Added(node) => Self::Added(rebuild(node)),
        }
    }
}

/// Result of a recursive removal on a subtree.
enum Removal<K, V> {
    NotFound,
    Removed(Link<K, V>),
}

// =============================================================================
// PersistentIntTree Definition
// =============================================================================

/// A persistent (immutable) AVL tree keyed by a 32-bit hash.
///
/// Each entry is addressed by the pair `(hash, key)`: the tree is ordered by
/// `hash`, and `key` (compared with [`PartialEq`]) tells apart entries whose
/// hashes collide. The caller computes the hash; see
/// [`PersistentHashTree`](super::PersistentHashTree) for a front-end that does
/// it through a [`BuildHasher`](std::hash::BuildHasher).
///
/// # Time Complexity
///
/// | Operation              | Complexity        |
/// |------------------------|-------------------|
/// | `new`                  | O(1)              |
/// | `try_find`             | O(log N + C)      |
/// | `add_or_update`        | O(log N + C)      |
/// | `remove`               | O(log N + C)      |
/// | `len` / `height`       | O(1)              |
/// | `clone`                | O(1)              |
///
/// where C is the number of entries sharing the hash.
///
/// # Examples
///
/// ```rust
/// use inttree::persistent::PersistentIntTree;
///
/// let first = PersistentIntTree::new().add_or_update(1, "x", 100);
/// let second = first.add_or_update_with(1, "x", 10, |old, new| old + new);
///
/// assert_eq!(first.get_value_or_default(1, "x", 0), 100); // Original unchanged
/// assert_eq!(second.get_value_or_default(1, "x", 0), 110); // Combined
/// ```
pub struct PersistentIntTree<K, V> {
    /// Root node of the tree
    root: Link<K, V>,
    /// Number of logical entries, conflicts included
    length: usize,
}

impl<K, V> PersistentIntTree<K, V> {
    /// Creates a new empty tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree: PersistentIntTree<String, i32> = PersistentIntTree::new();
    /// assert!(tree.is_empty());
    /// assert_eq!(tree.height(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: None,
            length: 0,
        }
    }

    /// Returns the number of logical entries in the tree.
    ///
    /// Entries that share a hash are counted individually.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the tree contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the height of the tree (0 for the empty tree).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree: PersistentIntTree<i32, i32> =
    ///     (0..7).map(|index| (index, index, index)).collect();
    /// assert_eq!(tree.height(), 3);
    /// ```
    #[must_use]
    pub fn height(&self) -> usize {
        usize::from(height(self.root.as_ref()))
    }

    /// Returns `true` if both trees are the same version (share the same root).
    ///
    /// This is an O(1) identity check, not a structural comparison.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new().add_or_update(1, "one", 1);
    /// let unchanged = tree.update(2, "two", 2); // "two" is absent
    /// let changed = tree.add_or_update(2, "two", 2);
    ///
    /// assert!(tree.ptr_eq(&unchanged));
    /// assert!(!tree.ptr_eq(&changed));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(left), Some(right)) => ReferenceCounter::ptr_eq(left, right),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns a reference to the value stored for `(hash, key)`.
    ///
    /// The descent is iterative; on a hash match the primary key is compared
    /// first, then the conflict list is scanned.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new()
    ///     .add_or_update(7, "seven".to_string(), 7);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(tree.try_find(7, "seven"), Some(&7));
    /// assert_eq!(tree.try_find(7, "other"), None);
    /// assert_eq!(tree.try_find(8, "seven"), None);
    /// ```
    #[must_use]
    pub fn try_find<Q>(&self, hash: i32, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match hash.cmp(&node.hash) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return node.find(key),
            };
        }
        None
    }

    /// Returns the value stored for `(hash, key)`, or `default` if absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new()
    ///     .add_or_update(10, "a", 1)
    ///     .add_or_update(10, "b", 2);
    ///
    /// assert_eq!(tree.get_value_or_default(10, "a", -1), 1);
    /// assert_eq!(tree.get_value_or_default(10, "b", -1), 2);
    /// assert_eq!(tree.get_value_or_default(10, "c", -1), -1);
    /// ```
    #[must_use]
    pub fn get_value_or_default<Q>(&self, hash: i32, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
        V: Clone,
    {
        self.try_find(hash, key).cloned().unwrap_or(default)
    }

    /// Borrowing form of [`get_value_or_default`](Self::get_value_or_default).
    #[must_use]
    pub fn get_or<'a, Q>(&'a self, hash: i32, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.try_find(hash, key).unwrap_or(default)
    }

    /// Returns `true` if the tree contains an entry for `(hash, key)`.
    #[must_use]
    pub fn contains<Q>(&self, hash: i32, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.try_find(hash, key).is_some()
    }

    /// Returns an iterator over `(key, value)` pairs in ascending hash order.
    ///
    /// Within one hash the primary entry comes first, followed by its
    /// conflicts in insertion order. The traversal uses an explicit stack and
    /// reads only the snapshot it was created from.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree: PersistentIntTree<i32, i32> = [5, 3, 8, 1, 4, 7, 9]
    ///     .into_iter()
    ///     .map(|key| (key, key, key * 10))
    ///     .collect();
    ///
    /// let keys: Vec<i32> = tree.iter().map(|(key, _)| *key).collect();
    /// assert_eq!(keys, vec![1, 3, 4, 5, 7, 8, 9]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentIntTreeIterator<'_, K, V> {
        PersistentIntTreeIterator {
            entries: self.entries(),
        }
    }

    /// Returns an iterator over `(hash, key, value)` triples in traversal order.
    #[must_use]
    pub fn entries(&self) -> PersistentIntTreeEntries<'_, K, V> {
        PersistentIntTreeEntries::new(self.root.as_deref(), self.length)
    }

    /// Returns an iterator over logical keys in traversal order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values in traversal order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

impl<K: Clone + PartialEq, V: Clone> PersistentIntTree<K, V> {
    /// Creates a tree containing a single entry.
    #[inline]
    #[must_use]
    pub fn singleton(hash: i32, key: K, value: V) -> Self {
        Self::new().add_or_update(hash, key, value)
    }

    /// Adds an entry, or replaces the value of an existing one.
    ///
    /// # Complexity
    ///
    /// O(log N + C)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree1 = PersistentIntTree::new().add_or_update(1, "x", 100);
    /// let tree2 = tree1.add_or_update(1, "x", 200);
    ///
    /// assert_eq!(tree1.try_find(1, "x"), Some(&100)); // Original unchanged
    /// assert_eq!(tree2.try_find(1, "x"), Some(&200)); // New version
    /// assert_eq!(tree2.len(), 1);
    /// ```
    #[must_use]
    pub fn add_or_update(&self, hash: i32, key: K, value: V) -> Self {
        self.upsert(hash, key, value, |_, new_value| Some(new_value), true)
    }

    /// Adds an entry, or combines its value with the existing one.
    ///
    /// When `(hash, key)` is already present, the stored value becomes
    /// `combine(&old, value)`. A panic in `combine` propagates to the caller
    /// and leaves `self` untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new()
    ///     .add_or_update(1, "x", 1)
    ///     .add_or_update_with(1, "x", 10, |old, new| old + new);
    ///
    /// assert_eq!(tree.get_value_or_default(1, "x", 0), 11);
    /// ```
    #[must_use]
    pub fn add_or_update_with<F>(&self, hash: i32, key: K, value: V, combine: F) -> Self
    where
        F: FnOnce(&V, V) -> V,
    {
        self.upsert(
            hash,
            key,
            value,
            |old_value, new_value| Some(combine(old_value, new_value)),
            true,
        )
    }

    /// Adds an entry only if `(hash, key)` is absent.
    ///
    /// If the entry exists the original tree is returned (sharing its root).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new().add_or_keep(1, "x", "first");
    /// let kept = tree.add_or_keep(1, "x", "second");
    ///
    /// assert_eq!(kept.try_find(1, "x"), Some(&"first"));
    /// assert!(kept.ptr_eq(&tree));
    /// ```
    #[must_use]
    pub fn add_or_keep(&self, hash: i32, key: K, value: V) -> Self {
        self.upsert(hash, key, value, |_, _| None, true)
    }

    /// Replaces the value of an existing entry.
    ///
    /// If `(hash, key)` is absent the original tree is returned (sharing its root).
    #[must_use]
    pub fn update(&self, hash: i32, key: K, value: V) -> Self {
        self.upsert(hash, key, value, |_, new_value| Some(new_value), false)
    }

    fn upsert<F>(&self, hash: i32, key: K, value: V, on_existing: F, add_missing: bool) -> Self
    where
        F: FnOnce(&V, V) -> Option<V>,
    {
        match Self::upsert_into_node(
            self.root.as_ref(),
            hash,
            key,
            value,
            on_existing,
            add_missing,
        ) {
            Upsert::Unchanged => self.clone(),
            Upsert::Replaced(root) => Self {
                root: Some(root),
                length: self.length,
            },
            Upsert::Added(root) => Self {
                root: Some(root),
                length: self.length + 1,
            },
        }
    }

    /// Recursive helper for the upsert family.
    fn upsert_into_node<F>(
        node: Option<&ReferenceCounter<Node<K, V>>>,
        hash: i32,
        key: K,
        value: V,
        on_existing: F,
        add_missing: bool,
    ) -> Upsert<K, V>
    where
        F: FnOnce(&V, V) -> Option<V>,
    {
        let Some(node_ref) = node else {
            return if add_missing {
                Upsert::Added(ReferenceCounter::new(Node::leaf(hash, key, value)))
            } else {
                Upsert::Unchanged
            };
        };

        match hash.cmp(&node_ref.hash) {
            Ordering::Less => Self::upsert_into_node(
                node_ref.left.as_ref(),
                hash,
                key,
                value,
                on_existing,
                add_missing,
            )
            .map(|new_left| {
                let new_node = node_ref.with_children(Some(new_left), node_ref.right.clone());
                ReferenceCounter::new(Self::balance(new_node))
            }),
            Ordering::Greater => Self::upsert_into_node(
                node_ref.right.as_ref(),
                hash,
                key,
                value,
                on_existing,
                add_missing,
            )
            .map(|new_right| {
                let new_node = node_ref.with_children(node_ref.left.clone(), Some(new_right));
                ReferenceCounter::new(Self::balance(new_node))
            }),
            Ordering::Equal => {
                Self::upsert_into_entries(node_ref, key, value, on_existing, add_missing)
            }
        }
    }

    /// Upsert on a node whose hash matches: primary entry first, then conflicts.
    fn upsert_into_entries<F>(
        node_ref: &Node<K, V>,
        key: K,
        value: V,
        on_existing: F,
        add_missing: bool,
    ) -> Upsert<K, V>
    where
        F: FnOnce(&V, V) -> Option<V>,
    {
        if node_ref.key == key {
            return on_existing(&node_ref.value, value).map_or(Upsert::Unchanged, |new_value| {
                Upsert::Replaced(ReferenceCounter::new(node_ref.with_entry(key, new_value)))
            });
        }

        let conflicts = node_ref.conflicts();
        if let Some(position) = conflicts
            .iter()
            .position(|(conflict_key, _)| *conflict_key == key)
        {
            return on_existing(&conflicts[position].1, value).map_or(
                Upsert::Unchanged,
                |new_value| {
                    let mut new_conflicts = conflicts.to_vec();
                    new_conflicts[position] = (key, new_value);
                    Upsert::Replaced(ReferenceCounter::new(
                        node_ref.with_conflicts(new_conflicts),
                    ))
                },
            );
        }

        if !add_missing {
            return Upsert::Unchanged;
        }

        // Genuine collision: append after the existing conflicts
        let mut new_conflicts = Vec::with_capacity(conflicts.len() + 1);
        new_conflicts.extend_from_slice(conflicts);
        new_conflicts.push((key, value));
        Upsert::Added(ReferenceCounter::new(node_ref.with_conflicts(new_conflicts)))
    }

    /// Removes the entry for `(hash, key)`.
    ///
    /// - Removing a conflict entry shortens the conflict list.
    /// - Removing the primary entry of a node with conflicts promotes the
    ///   first conflict to primary.
    /// - Removing the last entry of a node unlinks the node and rebalances.
    ///
    /// If the entry is absent the original tree is returned (sharing its root).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentIntTree;
    ///
    /// let tree = PersistentIntTree::new()
    ///     .add_or_update(1, "one", 1)
    ///     .add_or_update(2, "two", 2);
    /// let removed = tree.remove(1, "one");
    ///
    /// assert_eq!(tree.len(), 2);    // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// assert_eq!(removed.try_find(1, "one"), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, hash: i32, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let Some(root) = self.root.as_ref() else {
            return self.clone();
        };
        match Self::remove_from_node(root, hash, key) {
            Removal::NotFound => self.clone(),
            Removal::Removed(new_root) => Self {
                root: new_root,
                length: self.length.saturating_sub(1),
            },
        }
    }

    /// Recursive helper for remove.
    fn remove_from_node<Q>(
        node_ref: &ReferenceCounter<Node<K, V>>,
        hash: i32,
        key: &Q,
    ) -> Removal<K, V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        match hash.cmp(&node_ref.hash) {
            Ordering::Less => {
                let Some(left) = node_ref.left.as_ref() else {
                    return Removal::NotFound;
                };
                match Self::remove_from_node(left, hash, key) {
                    Removal::NotFound => Removal::NotFound,
                    Removal::Removed(new_left) => {
                        let new_node = node_ref.with_children(new_left, node_ref.right.clone());
                        Removal::Removed(Some(ReferenceCounter::new(Self::balance(new_node))))
                    }
                }
            }
            Ordering::Greater => {
                let Some(right) = node_ref.right.as_ref() else {
                    return Removal::NotFound;
                };
                match Self::remove_from_node(right, hash, key) {
                    Removal::NotFound => Removal::NotFound,
                    Removal::Removed(new_right) => {
                        let new_node = node_ref.with_children(node_ref.left.clone(), new_right);
                        Removal::Removed(Some(ReferenceCounter::new(Self::balance(new_node))))
                    }
                }
            }
            Ordering::Equal => Self::remove_from_entries(node_ref, key),
        }
    }

    /// Removal on a node whose hash matches.
    fn remove_from_entries<Q>(node_ref: &Node<K, V>, key: &Q) -> Removal<K, V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        let conflicts = node_ref.conflicts();

        if node_ref.key.borrow() == key {
            return match conflicts.split_first() {
                Some(((promoted_key, promoted_value), rest)) => {
                    let promoted = Node {
                        hash: node_ref.hash,
                        key: promoted_key.clone(),
                        value: promoted_value.clone(),
                        conflicts: to_conflicts(rest.to_vec()),
                        left: node_ref.left.clone(),
                        right: node_ref.right.clone(),
                        height: node_ref.height,
                    };
                    Removal::Removed(Some(ReferenceCounter::new(promoted)))
                }
                None => Removal::Removed(Self::unlink(node_ref)),
            };
        }

        conflicts
            .iter()
            .position(|(conflict_key, _)| conflict_key.borrow() == key)
            .map_or(Removal::NotFound, |position| {
                let mut new_conflicts = conflicts.to_vec();
                new_conflicts.remove(position);
                Removal::Removed(Some(ReferenceCounter::new(
                    node_ref.with_conflicts(new_conflicts),
                )))
            })
    }

    /// Joins the children of a node that is being removed.
    fn unlink(node_ref: &Node<K, V>) -> Link<K, V> {
        match (&node_ref.left, &node_ref.right) {
            (None, None) => None,
            (Some(left), None) => Some(left.clone()),
            (None, Some(right)) => Some(right.clone()),
            (Some(left), Some(right)) => {
                // Replace with the in-order successor
                let (successor, new_right) = Self::remove_min(right);
                let new_node = Node::new(
                    successor.hash,
                    successor.key.clone(),
                    successor.value.clone(),
                    successor.conflicts.clone(),
                    Some(left.clone()),
                    new_right,
                );
                Some(ReferenceCounter::new(Self::balance(new_node)))
            }
        }
    }

    /// Detaches the minimum node of a subtree.
    ///
    /// Returns the detached node and the rebalanced remainder.
    fn remove_min(
        node_ref: &ReferenceCounter<Node<K, V>>,
    ) -> (ReferenceCounter<Node<K, V>>, Link<K, V>) {
        match node_ref.left.as_ref() {
            None => (node_ref.clone(), node_ref.right.clone()),
            Some(left) => {
                let (minimum, new_left) = Self::remove_min(left);
                let new_node = node_ref.with_children(new_left, node_ref.right.clone());
                (
                    minimum,
                    Some(ReferenceCounter::new(Self::balance(new_node))),
                )
            }
        }
    }

    // =========================================================================
    // Rebalancing
    // =========================================================================

    /// Restores the AVL invariant at `node`, whose children are balanced and
    /// differ in height by at most two.
    fn balance(node: Node<K, V>) -> Node<K, V> {
        let delta = i16::from(height(node.left.as_ref())) - i16::from(height(node.right.as_ref()));

        if delta >= 2 {
            let left_is_right_heavy = node
                .left
                .as_ref()
                .is_some_and(|left| height(left.right.as_ref()) > height(left.left.as_ref()));
            if left_is_right_heavy {
                // Left-Right: rotate the left child left first
                let Node {
                    hash,
                    key,
                    value,
                    conflicts,
                    left,
                    right,
                    ..
                } = node;
                let new_left = left.map(|left| {
                    ReferenceCounter::new(Self::rotate_left(ReferenceCounter::unwrap_or_clone(left)))
                });
                return Self::rotate_right(Node::new(hash, key, value, conflicts, new_left, right));
            }
            return Self::rotate_right(node);
        }

        if delta <= -2 {
            let right_is_left_heavy = node
                .right
                .as_ref()
                .is_some_and(|right| height(right.left.as_ref()) > height(right.right.as_ref()));
            if right_is_left_heavy {
                // Right-Left: rotate the right child right first
                let Node {
                    hash,
                    key,
                    value,
                    conflicts,
                    left,
                    right,
                    ..
                } = node;
                let new_right = right.map(|right| {
                    ReferenceCounter::new(Self::rotate_right(ReferenceCounter::unwrap_or_clone(
                        right,
                    )))
                });
                return Self::rotate_left(Node::new(hash, key, value, conflicts, left, new_right));
            }
            return Self::rotate_left(node);
        }

        node
    }

    /// Rotates the tree to the right around the given node.
    fn rotate_right(node: Node<K, V>) -> Node<K, V> {
        let Node {
            hash,
            key,
            value,
            conflicts,
            left,
            right,
            ..
        } = node;
        match left {
            Some(pivot) => {
                let lowered = Node::new(hash, key, value, conflicts, pivot.right.clone(), right);
                pivot.with_children(pivot.left.clone(), Some(ReferenceCounter::new(lowered)))
            }
            None => Node::new(hash, key, value, conflicts, None, right),
        }
    }

    /// Rotates the tree to the left around the given node.
    fn rotate_left(node: Node<K, V>) -> Node<K, V> {
        let Node {
            hash,
            key,
            value,
            conflicts,
            left,
            right,
            ..
        } = node;
        match right {
            Some(pivot) => {
                let lowered = Node::new(hash, key, value, conflicts, left, pivot.left.clone());
                pivot.with_children(Some(ReferenceCounter::new(lowered)), pivot.right.clone())
            }
            None => Node::new(hash, key, value, conflicts, left, None),
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over `(hash, key, value)` triples of a [`PersistentIntTree`].
pub struct PersistentIntTreeEntries<'a, K, V> {
    /// Nodes whose primary entry has not been yielded yet; the top is next
    stack: SmallVec<[&'a Node<K, V>; TRAVERSAL_STACK_SIZE]>,
    /// Hash and remaining conflicts of the node yielded last
    conflicts: (i32, std::slice::Iter<'a, (K, V)>),
    remaining: usize,
}

impl<'a, K, V> PersistentIntTreeEntries<'a, K, V> {
    fn new(root: Option<&'a Node<K, V>>, length: usize) -> Self {
        let mut entries = Self {
            stack: SmallVec::new(),
            conflicts: (0, std::slice::Iter::default()),
            remaining: length,
        };
        entries.push_left_spine(root);
        entries
    }

    fn push_left_spine(&mut self, mut node: Option<&'a Node<K, V>>) {
        while let Some(node_ref) = node {
            self.stack.push(node_ref);
            node = node_ref.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for PersistentIntTreeEntries<'a, K, V> {
    type Item = (i32, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let (hash, conflicts) = &mut self.conflicts;
        if let Some((key, value)) = conflicts.next() {
            self.remaining = self.remaining.saturating_sub(1);
            return Some((*hash, key, value));
        }

        let node = self.stack.pop()?;
        self.push_left_spine(node.right.as_deref());
        self.conflicts = (node.hash, node.conflicts().iter());
        self.remaining = self.remaining.saturating_sub(1);
        Some((node.hash, &node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentIntTreeEntries<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V> FusedIterator for PersistentIntTreeEntries<'_, K, V> {}

/// An iterator over `(key, value)` pairs of a [`PersistentIntTree`].
pub struct PersistentIntTreeIterator<'a, K, V> {
    entries: PersistentIntTreeEntries<'a, K, V>,
}

impl<'a, K, V> Iterator for PersistentIntTreeIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|(_, key, value)| (key, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentIntTreeIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K, V> FusedIterator for PersistentIntTreeIterator<'_, K, V> {}

/// An owning iterator over `(hash, key, value)` triples of a [`PersistentIntTree`].
///
/// Entries are cloned out of the (possibly shared) nodes.
pub struct PersistentIntTreeIntoIterator<K, V> {
    entries: std::vec::IntoIter<(i32, K, V)>,
}

impl<K, V> Iterator for PersistentIntTreeIntoIterator<K, V> {
    type Item = (i32, K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentIntTreeIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Clone for PersistentIntTree<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            length: self.length,
        }
    }
}

impl<K, V> Default for PersistentIntTree<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + PartialEq, V: Clone> FromIterator<(i32, K, V)> for PersistentIntTree<K, V> {
    fn from_iter<I: IntoIterator<Item = (i32, K, V)>>(iter: I) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

impl<K: Clone + PartialEq, V: Clone> Extend<(i32, K, V)> for PersistentIntTree<K, V> {
    fn extend<I: IntoIterator<Item = (i32, K, V)>>(&mut self, iter: I) {
        for (hash, key, value) in iter {
            *self = self.add_or_update(hash, key, value);
        }
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentIntTree<K, V> {
    type Item = (i32, K, V);
    type IntoIter = PersistentIntTreeIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(i32, K, V)> = self
            .entries()
            .map(|(hash, key, value)| (hash, key.clone(), value.clone()))
            .collect();
        PersistentIntTreeIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentIntTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentIntTreeIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for PersistentIntTree<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.length != other.length {
            return false;
        }
        self.entries()
            .all(|(hash, key, value)| other.try_find(hash, key) == Some(value))
    }
}

impl<K: Eq, V: Eq> Eq for PersistentIntTree<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentIntTree<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentIntTree<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for entry in self.entries() {
            sequence.serialize_element(&entry)?;
        }
        sequence.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentIntTreeVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<K, V> PersistentIntTreeVisitor<K, V> {
    const fn new() -> Self {
        Self {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentIntTreeVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + PartialEq,
    V: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentIntTree<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a sequence of [hash, key, value] entries")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut tree = PersistentIntTree::new();
        while let Some((hash, key, value)) = access.next_element::<(i32, K, V)>()? {
            tree = tree.add_or_update(hash, key, value);
        }
        Ok(tree)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentIntTree<K, V>
where
    K: serde::Deserialize<'de> + Clone + PartialEq,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentIntTreeVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
impl<K: PartialEq, V> PersistentIntTree<K, V> {
    /// Panics unless every structural invariant holds.
    fn assert_invariants(&self) {
        fn check<K: PartialEq, V>(
            node: Option<&Node<K, V>>,
            lower: Option<i32>,
            upper: Option<i32>,
        ) -> (u8, usize) {
            let Some(node) = node else {
                return (0, 0);
            };
            assert!(lower.is_none_or(|lower| node.hash > lower), "BST order violated");
            assert!(upper.is_none_or(|upper| node.hash < upper), "BST order violated");

            let (left_height, left_count) = check(node.left.as_deref(), lower, Some(node.hash));
            let (right_height, right_count) = check(node.right.as_deref(), Some(node.hash), upper);
            assert!(left_height.abs_diff(right_height) <= 1, "AVL balance violated");
            assert_eq!(node.height, left_height.max(right_height) + 1, "stale height");

            if let Some(conflicts) = &node.conflicts {
                assert!(!conflicts.is_empty(), "empty conflict list stored");
            }
            let conflicts = node.conflicts();
            for (index, (key, _)) in conflicts.iter().enumerate() {
                assert!(*key != node.key, "conflict duplicates primary key");
                assert!(
                    conflicts[index + 1..].iter().all(|(other, _)| other != key),
                    "duplicate conflict key"
                );
            }
            (node.height, left_count + right_count + 1 + conflicts.len())
        }

        let (_, count) = check(self.root.as_deref(), None, None);
        assert_eq!(count, self.length, "length out of sync");
    }
}
