//! Persistent hash map front-end over [`PersistentIntTree`].
//!
//! [`PersistentHashTree`] computes the 32-bit search hash of each key with a
//! [`BuildHasher`] and delegates storage to a [`PersistentIntTree`], whose
//! conflict lists absorb keys that fold to the same 32-bit hash.
//!
//! # Examples
//!
//! ```rust
//! use inttree::persistent::PersistentHashTree;
//!
//! let services = PersistentHashTree::new()
//!     .insert("logger".to_string(), 1)
//!     .insert("database".to_string(), 2);
//!
//! assert_eq!(services.get("logger"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = services.insert("logger".to_string(), 10);
//! assert_eq!(services.get("logger"), Some(&1));
//! assert_eq!(updated.get("logger"), Some(&10));
//! ```

use super::{PersistentIntTree, PersistentIntTreeIterator, ReferenceCounter};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash, RandomState};
use std::iter::FromIterator;

/// Folds a 64-bit hash into the 32-bit search hash of the tree.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn fold_hash(hash: u64) -> i32 {
    (hash ^ (hash >> 32)) as u32 as i32
}

/// A persistent (immutable) hash map backed by a [`PersistentIntTree`].
///
/// The hasher state is shared by every version derived from the same map, so
/// all versions agree on the hash of a key.
///
/// # Examples
///
/// ```rust
/// use inttree::persistent::PersistentHashTree;
///
/// let map: PersistentHashTree<&str, i32> =
///     [("a", 1), ("b", 2)].into_iter().collect();
/// let removed = map.remove("a");
///
/// assert_eq!(map.len(), 2);     // Original unchanged
/// assert_eq!(removed.len(), 1); // New version
/// ```
pub struct PersistentHashTree<K, V, S = RandomState> {
    tree: PersistentIntTree<K, V>,
    hasher: ReferenceCounter<S>,
}

/// A [`PersistentHashTree`] using `rustc-hash`'s `FxHasher`.
#[cfg(feature = "fxhash")]
pub type FxHashTree<K, V> = PersistentHashTree<K, V, rustc_hash::FxBuildHasher>;

/// A [`PersistentHashTree`] using `ahash`.
#[cfg(feature = "ahash")]
pub type AHashTree<K, V> = PersistentHashTree<K, V, ahash::RandomState>;

impl<K, V> PersistentHashTree<K, V, RandomState> {
    /// Creates a new empty map with a randomly seeded hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, S> PersistentHashTree<K, V, S> {
    /// Creates a new empty map that hashes keys with `hasher`.
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            tree: PersistentIntTree::new(),
            hasher: ReferenceCounter::new(hasher),
        }
    }

    /// Returns the number of entries in the map.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns the hasher used by this map.
    #[must_use]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns the underlying integer-keyed tree.
    #[must_use]
    pub const fn as_int_tree(&self) -> &PersistentIntTree<K, V> {
        &self.tree
    }

    /// Returns an iterator over `(key, value)` pairs in ascending hash order.
    #[must_use]
    pub fn iter(&self) -> PersistentIntTreeIterator<'_, K, V> {
        self.tree.iter()
    }

    /// Returns an iterator over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.tree.keys()
    }

    /// Returns an iterator over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.tree.values()
    }

    /// Returns `true` if both maps are the same version.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.tree.ptr_eq(&other.tree)
    }

    /// Wraps a new tree version, keeping the hasher shared.
    fn with_tree(&self, tree: PersistentIntTree<K, V>) -> Self {
        Self {
            tree,
            hasher: ReferenceCounter::clone(&self.hasher),
        }
    }
}

impl<K, V, S: BuildHasher> PersistentHashTree<K, V, S> {
    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> i32 {
        fold_hash(self.hasher.hash_one(key))
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentHashTree;
    ///
    /// let map = PersistentHashTree::new().insert("hello".to_string(), 42);
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
    {
        self.tree.try_find(self.hash_of(key), key)
    }

    /// Returns the value corresponding to the key, or `default` if absent.
    #[must_use]
    pub fn get_or<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
    {
        self.tree.get_or(self.hash_of(key), key, default)
    }

    /// Returns `true` if the map contains a value for the key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K, V, S> PersistentHashTree<K, V, S>
where
    K: Hash + Clone + PartialEq,
    V: Clone,
    S: BuildHasher,
{
    /// Inserts a key-value pair, replacing the value of an existing key.
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = self.hash_of(&key);
        self.with_tree(self.tree.add_or_update(hash, key, value))
    }

    /// Inserts a key-value pair, combining with the existing value if present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use inttree::persistent::PersistentHashTree;
    ///
    /// let counts = PersistentHashTree::new()
    ///     .insert_with("word", 1, |old, new| old + new)
    ///     .insert_with("word", 1, |old, new| old + new);
    /// assert_eq!(counts.get("word"), Some(&2));
    /// ```
    #[must_use]
    pub fn insert_with<F>(&self, key: K, value: V, combine: F) -> Self
    where
        F: FnOnce(&V, V) -> V,
    {
        let hash = self.hash_of(&key);
        self.with_tree(self.tree.add_or_update_with(hash, key, value, combine))
    }

    /// Inserts a key-value pair only if the key is absent.
    #[must_use]
    pub fn insert_if_absent(&self, key: K, value: V) -> Self {
        let hash = self.hash_of(&key);
        self.with_tree(self.tree.add_or_keep(hash, key, value))
    }

    /// Replaces the value of an existing key; absent keys leave the map unchanged.
    #[must_use]
    pub fn update(&self, key: K, value: V) -> Self {
        let hash = self.hash_of(&key);
        self.with_tree(self.tree.update(hash, key, value))
    }

    /// Removes a key from the map.
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
    {
        let hash = self.hash_of(key);
        self.with_tree(self.tree.remove(hash, key))
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, S> Clone for PersistentHashTree<K, V, S> {
    fn clone(&self) -> Self {
        self.with_tree(self.tree.clone())
    }
}

impl<K, V, S: Default> Default for PersistentHashTree<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, V)> for PersistentHashTree<K, V, S>
where
    K: Hash + Clone + PartialEq,
    V: Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for PersistentHashTree<K, V, S>
where
    K: Hash + Clone + PartialEq,
    V: Clone,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            *self = self.insert(key, value);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a PersistentHashTree<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentIntTreeIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> PartialEq for PersistentHashTree<K, V, S>
where
    K: Hash + PartialEq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        // The two maps may hash with different seeds
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K: Hash + Eq, V: Eq, S: BuildHasher> Eq for PersistentHashTree<K, V, S> {}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for PersistentHashTree<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V, S> serde::Serialize for PersistentHashTree<K, V, S>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentHashTreeVisitor<K, V, S> {
    marker: std::marker::PhantomData<fn() -> PersistentHashTree<K, V, S>>,
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::de::Visitor<'de> for PersistentHashTreeVisitor<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Clone + PartialEq,
    V: serde::Deserialize<'de> + Clone,
    S: BuildHasher + Default,
{
    type Value = PersistentHashTree<K, V, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = PersistentHashTree::default();
        while let Some((key, value)) = access.next_entry()? {
            map = map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::Deserialize<'de> for PersistentHashTree<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Clone + PartialEq,
    V: serde::Deserialize<'de> + Clone,
    S: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentHashTreeVisitor {
            marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
