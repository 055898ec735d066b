//! Persistent (immutable) hash map based on HAMT.
//!
//! This module provides [`PersistentHashMap`], an immutable hash map
//! that uses structural sharing for efficient operations.
//!
//! # Overview
//!
//! `PersistentHashMap` is a Hash Array Mapped Trie (HAMT). Each level of the
//! trie consumes 5 bits of the key's 64-bit hash, so a node has up to 32
//! slots; only occupied slots are stored, indexed through a presence bitmap
//! and a population count.
//!
//! - O(log32 N) get, bounded by the 13 levels of a 64-bit hash
//! - O(log32 N) insert and remove, copying one node per level
//! - O(1) len and `is_empty`
//!
//! All operations return new maps without modifying the original,
//! and structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use lambars_hamt::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2)
//!     .insert("three".to_string(), 3);
//!
//! assert_eq!(map.get("one"), Some(&1));
//! assert_eq!(map.get("two"), Some(&2));
//! assert_eq!(map.get("three"), Some(&3));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```
//!
//! # Internal Structure
//!
//! - 32-way branching (5 bits per level), bitmap-compacted slot arrays
//! - Collision lists for keys whose full hashes are equal
//! - Structural sharing via `Arc`, so versions can cross threads

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Index;

#[cfg(feature = "rayon")]
use rayon::iter::IntoParallelIterator;
use static_assertions::assert_impl_all;

use super::ReferenceCounter;
use super::error::{InvariantViolation, ViolationKind};
use super::hasher::{DefaultHashBuilder, hash_key};
use super::iter::{PersistentHashMapIntoIterator, PersistentHashMapIterator};
use super::node::{CompactNode, Leaf, Slot, fragment};
use super::trie;

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on HAMT.
///
/// `PersistentHashMap` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns.
///
/// The hash function is the `S` type parameter, supplied as a
/// [`BuildHasher`] when the map is created. Every map derived from it by
/// `insert` or `remove` keeps the same hasher.
///
/// # Time Complexity
///
/// | Operation      | Complexity        |
/// |----------------|-------------------|
/// | `new`          | O(1)              |
/// | `get`          | O(log32 N)        |
/// | `insert`       | O(log32 N)        |
/// | `remove`       | O(log32 N)        |
/// | `contains_key` | O(log32 N)        |
/// | `len`          | O(1)              |
/// | `is_empty`     | O(1)              |
/// | `clone`        | O(1)              |
///
/// # Examples
///
/// ```rust
/// use lambars_hamt::persistent::PersistentHashMap;
///
/// let map = PersistentHashMap::singleton("key".to_string(), 42);
/// assert_eq!(map.get("key"), Some(&42));
/// ```
pub struct PersistentHashMap<K, V, S = DefaultHashBuilder> {
    /// Root node of the trie; `None` for the empty map
    root: Option<ReferenceCounter<CompactNode<K, V>>>,
    /// Number of entries
    length: usize,
    /// Hash function shared by every version of this lineage
    hasher: ReferenceCounter<S>,
}

/// The name used for [`PersistentHashMap`] in descriptions of the structure.
pub type PersistentMap<K, V, S = DefaultHashBuilder> = PersistentHashMap<K, V, S>;

assert_impl_all!(PersistentHashMap<String, i32>: Send, Sync, Clone);

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map using [`DefaultHashBuilder`].
    ///
    /// No node is allocated until the first insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates a map containing a single key-value pair.
    ///
    /// # Arguments
    ///
    /// * `key` - The key
    /// * `value` - The value
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::singleton("key".to_string(), 42);
    /// assert_eq!(map.len(), 1);
    /// assert_eq!(map.get("key"), Some(&42));
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self
    where
        K: Clone + Hash + Eq,
        V: Clone,
    {
        Self::new().insert(key, value)
    }
}

impl<K, V, S> PersistentHashMap<K, V, S> {
    /// Creates a new empty map that hashes keys with `hasher`.
    ///
    /// The hasher must be deterministic: equal keys must always produce equal
    /// hashes. All maps derived from this one share it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let map = PersistentHashMap::with_hasher(RandomState::new()).insert(1, "one");
    /// assert_eq!(map.get(&1), Some(&"one"));
    /// ```
    #[inline]
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            root: None,
            length: 0,
            hasher: ReferenceCounter::new(hasher),
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// assert_eq!(map.len(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let empty: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(empty.is_empty());
    ///
    /// let non_empty = empty.insert("key".to_string(), 42);
    /// assert!(!non_empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the hasher this map was built with.
    #[inline]
    #[must_use]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns `true` if both maps are the same version, i.e. share their root.
    ///
    /// Two empty maps are always the same version. A `false` result says
    /// nothing about whether the contents differ.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert(1, "one");
    /// assert!(map.ptr_eq(&map.remove(&2)));
    /// assert!(!map.ptr_eq(&map.insert(2, "two")));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(left), Some(right)) => ReferenceCounter::ptr_eq(left, right),
            _ => false,
        }
    }

    /// Returns an iterator over key-value pairs.
    ///
    /// Entries come in hash order (a pre-order walk of the trie), not
    /// insertion order. Calling `iter` again restarts the walk over the same,
    /// unchanging entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// for (key, value) in map.iter() {
    ///     println!("{}: {}", key, value);
    /// }
    /// assert_eq!(map.iter().count(), 2);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentHashMapIterator<'_, K, V> {
        PersistentHashMapIterator::new(self.root.as_deref(), self.length)
    }

    /// Returns an iterator over keys.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// for key in map.keys() {
    ///     println!("{}", key);
    /// }
    /// ```
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// let sum: i32 = map.values().sum();
    /// assert_eq!(sum, 3);
    /// ```
    pub fn values(&self) -> impl ExactSizeIterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Audits the trie against every structural invariant.
    ///
    /// Meant for tests and debugging: it walks the whole map. Any error
    /// indicates a bug in this crate or a hasher that is not deterministic.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..1000).map(|n| (n, n)).collect();
    /// assert_eq!(map.check_invariants(), Ok(()));
    /// ```
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let found = match &self.root {
            Some(root) => {
                if root.is_empty() {
                    return Err(InvariantViolation::new(ViolationKind::EmptyNode, 0));
                }
                trie::audit(root)?
            }
            None => 0,
        };
        if found == self.length {
            Ok(())
        } else {
            Err(InvariantViolation::new(ViolationKind::LengthMismatch, 0))
        }
    }
}

impl<K, V, S> PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    /// Builds a map from `entries`, hashing keys with `hasher`.
    ///
    /// Later entries overwrite earlier ones with an equal key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::{DefaultHashBuilder, PersistentHashMap};
    ///
    /// let map = PersistentHashMap::from_entries_with_hasher(
    ///     [("a", 1), ("b", 2), ("a", 3)],
    ///     DefaultHashBuilder::default(),
    /// );
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(map.get("a"), Some(&3));
    /// ```
    #[must_use]
    pub fn from_entries_with_hasher<I>(entries: I, hasher: S) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        entries
            .into_iter()
            .fold(Self::with_hasher(hasher), |map, (key, value)| {
                map.insert(key, value)
            })
    }
}

impl<K, V, S> PersistentHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash` and
    /// `Eq` on the borrowed form must match those for the key type.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to look up
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).map(|(_, value)| value)
    }

    /// Returns the stored key and its value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("key".to_string(), 42);
    /// assert_eq!(map.get_key_value("key"), Some((&"key".to_string(), &42)));
    /// ```
    #[must_use]
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let root = self.root.as_deref()?;
        trie::get(root, hash_key(&*self.hasher, key), key)
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to check
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("key".to_string(), 42);
    ///
    /// assert!(map.contains_key("key"));
    /// assert!(!map.contains_key("other"));
    /// ```
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_key_value(key).is_some()
    }
}

impl<K, V, S> PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher,
{

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already contains the key, the value is replaced.
    /// Only the nodes on the path to the key are copied; everything else is
    /// shared with `self`.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to insert
    /// * `value` - The value to insert
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
    /// let map2 = map1.insert("key".to_string(), 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1)); // Original unchanged
    /// assert_eq!(map2.get("key"), Some(&2)); // New version
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = hash_key(&*self.hasher, &key);
        let leaf = Leaf { hash, key, value };

        let (root, added) = match &self.root {
            Some(root) => trie::insert(root, leaf, 0),
            None => (CompactNode::single(fragment(hash, 0), Slot::Leaf(leaf)), true),
        };

        Self {
            root: Some(ReferenceCounter::new(root)),
            length: if added { self.length + 1 } else { self.length },
            hasher: ReferenceCounter::clone(&self.hasher),
        }
    }

    /// Removes a key from the map.
    ///
    /// Returns a new map without the key. If the key doesn't exist,
    /// returns the original map: the result shares its root with `self`.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to remove
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let removed = map.remove("a");
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// assert_eq!(removed.get("a"), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(root) = &self.root else {
            return self.clone();
        };
        let hash = hash_key(&*self.hasher, key);
        match trie::remove(root, hash, key, 0) {
            Some(reduced) => Self {
                root: trie::reroot(reduced).map(ReferenceCounter::new),
                length: self.length - 1,
                hasher: ReferenceCounter::clone(&self.hasher),
            },
            None => self.clone(),
        }
    }

    /// Updates the value for a key using a function.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update
    /// * `function` - The function to apply to the value
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    /// let updated = map.update("count", |value| value + 1);
    ///
    /// assert_eq!(updated.unwrap().get("count"), Some(&11));
    /// assert!(map.update("missing", |value| value + 1).is_none());
    /// ```
    #[must_use]
    pub fn update<Q, F>(&self, key: &Q, function: F) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> V,
    {
        let (stored_key, value) = self.get_key_value(key)?;
        Some(self.insert(stored_key.clone(), function(value)))
    }

    /// Updates or removes a value for a key using an updater function.
    ///
    /// The updater function receives `Some(&V)` if the key exists, or `None` if it doesn't.
    /// If the updater returns `Some(V)`, the value is inserted or updated.
    /// If the updater returns `None`, the key is removed (if it exists).
    ///
    /// # Arguments
    ///
    /// * `key` - The key to update
    /// * `updater` - A function that receives the current value (or None) and returns
    ///   the new value (or None to remove)
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("count".to_string(), 10);
    ///
    /// // Increment existing value
    /// let updated = map.update_with("count", |maybe_value| {
    ///     maybe_value.map(|value| value + 1)
    /// });
    /// assert_eq!(updated.get("count"), Some(&11));
    ///
    /// // Insert if not exists
    /// let inserted = map.update_with("new_key", |maybe_value| {
    ///     match maybe_value {
    ///         Some(value) => Some(*value),
    ///         None => Some(100),
    ///     }
    /// });
    /// assert_eq!(inserted.get("new_key"), Some(&100));
    ///
    /// // Remove by returning None
    /// let removed = map.update_with("count", |_| None);
    /// assert_eq!(removed.get("count"), None);
    /// ```
    #[must_use]
    pub fn update_with<Q, F>(&self, key: &Q, updater: F) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let current = self.get_key_value(key);
        match (current, updater(current.map(|(_, value)| value))) {
            (Some((stored_key, _)), Some(value)) => self.insert(stored_key.clone(), value),
            (Some(_), None) => self.remove(key),
            (None, Some(value)) => self.insert(key.to_owned(), value),
            (None, None) => self.clone(),
        }
    }

    /// Merges two maps, with values from `other` taking precedence on key conflicts.
    ///
    /// The result keeps the hasher of `self`.
    ///
    /// # Arguments
    ///
    /// * `other` - The map to merge with
    ///
    /// # Complexity
    ///
    /// O(m log32 (n + m)) where m is the size of `other`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let map2 = PersistentHashMap::new()
    ///     .insert("b".to_string(), 20)
    ///     .insert("c".to_string(), 3);
    ///
    /// let merged = map1.merge(&map2);
    ///
    /// assert_eq!(merged.get("a"), Some(&1));
    /// assert_eq!(merged.get("b"), Some(&20)); // From map2
    /// assert_eq!(merged.get("c"), Some(&3));
    /// ```
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        other.iter().fold(self.clone(), |merged, (key, value)| {
            merged.insert(key.clone(), value.clone())
        })
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, S> Clone for PersistentHashMap<K, V, S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            length: self.length,
            hasher: ReferenceCounter::clone(&self.hasher),
        }
    }
}

impl<K, V, S: Default> Default for PersistentHashMap<K, V, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, V)> for PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries_with_hasher(iter, S::default())
    }
}

impl<K: Clone, V: Clone, S> IntoIterator for PersistentHashMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = PersistentHashMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        PersistentHashMapIntoIterator::new(entries)
    }
}

impl<'a, K, V, S> IntoIterator for &'a PersistentHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentHashMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> PartialEq for PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone + PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        if self.ptr_eq(other) {
            return true;
        }

        self.iter()
            .all(|(key, value)| other.get(key).is_some_and(|other_value| other_value == value))
    }
}

impl<K, V, S> Eq for PersistentHashMap<K, V, S>
where
    K: Clone + Hash + Eq,
    V: Clone + Eq,
    S: BuildHasher,
{
}

impl<Q, K, V, S> Index<&Q> for PersistentHashMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    /// Returns the value for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found in PersistentHashMap")
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for PersistentHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display, S> fmt::Display for PersistentHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for (key, value) in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Parallel Iteration
// =============================================================================

/// A parallel iterator over references to the entries of a [`PersistentHashMap`].
#[cfg(feature = "rayon")]
pub type PersistentHashMapParallelRefIterator<'a, K, V> = rayon::vec::IntoIter<(&'a K, &'a V)>;

/// A parallel iterator over owned entries of a [`PersistentHashMap`].
#[cfg(feature = "rayon")]
pub type PersistentHashMapParallelIterator<K, V> = rayon::vec::IntoIter<(K, V)>;

#[cfg(feature = "rayon")]
impl<K: Sync, V: Sync, S> PersistentHashMap<K, V, S> {
    /// Returns a parallel iterator over key-value pairs.
    ///
    /// The entry references are gathered first; the work done on them is
    /// spread over the rayon thread pool.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lambars_hamt::persistent::PersistentHashMap;
    /// use rayon::prelude::*;
    ///
    /// let map: PersistentHashMap<i32, i32> = (0..100).map(|n| (n, n)).collect();
    /// let sum: i32 = map.par_iter().map(|(_, value)| *value).sum();
    /// assert_eq!(sum, 4950);
    /// ```
    #[must_use]
    pub fn par_iter(&self) -> PersistentHashMapParallelRefIterator<'_, K, V> {
        self.iter().collect::<Vec<_>>().into_par_iter()
    }
}

#[cfg(feature = "rayon")]
impl<'a, K: Sync, V: Sync, S> IntoParallelIterator for &'a PersistentHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type Iter = PersistentHashMapParallelRefIterator<'a, K, V>;

    fn into_par_iter(self) -> Self::Iter {
        self.par_iter()
    }
}

#[cfg(feature = "rayon")]
impl<K, V, S> IntoParallelIterator for PersistentHashMap<K, V, S>
where
    K: Clone + Send,
    V: Clone + Send,
{
    type Item = (K, V);
    type Iter = PersistentHashMapParallelIterator<K, V>;

    fn into_par_iter(self) -> Self::Iter {
        self.into_iter().collect::<Vec<_>>().into_par_iter()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V, S> serde::Serialize for PersistentHashMap<K, V, S>
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
struct PersistentHashMapVisitor<K, V, S> {
    marker: std::marker::PhantomData<fn() -> PersistentHashMap<K, V, S>>,
}

#[cfg(feature = "serde")]
impl<K, V, S> PersistentHashMapVisitor<K, V, S> {
    const fn new() -> Self {
        Self {
            marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::de::Visitor<'de> for PersistentHashMapVisitor<K, V, S>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
    S: BuildHasher + Default,
{
    type Value = PersistentHashMap<K, V, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = PersistentHashMap::default();
        while let Some((key, value)) = access.next_entry()? {
            map = map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::Deserialize<'de> for PersistentHashMap<K, V, S>
where
    K: serde::Deserialize<'de> + Clone + Hash + Eq,
    V: serde::Deserialize<'de> + Clone,
    S: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentHashMapVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::hash::Hasher;

    /// Sends every key to the same hash.
    #[derive(Clone, Default)]
    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            0x5EED
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    impl BuildHasher for ConstantHasher {
        type Hasher = Self;

        fn build_hasher(&self) -> Self {
            Self
        }
    }

    #[rstest]
    fn test_new_creates_empty() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert!(map.root.is_none());
    }

    #[rstest]
    fn test_empty_map_baseline() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert_eq!(map.get("anything"), None);
        let removed = map.remove("anything");
        assert!(removed.is_empty());
        assert!(removed.ptr_eq(&map));
        assert_eq!(removed, map);
        assert_eq!(map.iter().next(), None);
    }

    #[rstest]
    fn test_singleton() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::singleton("key".to_string(), 42);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("key"), Some(&42));
    }

    #[rstest]
    fn test_insert_and_get() {
        let map = PersistentHashMap::new()
            .insert("one".to_string(), 1)
            .insert("two".to_string(), 2);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("one"), Some(&1));
        assert_eq!(map.get("two"), Some(&2));
        assert_eq!(map.get("three"), None);
    }

    #[rstest]
    fn test_insert_overwrite() {
        let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
        let map2 = map1.insert("key".to_string(), 2);

        assert_eq!(map1.get("key"), Some(&1));
        assert_eq!(map2.get("key"), Some(&2));
        assert_eq!(map1.len(), 1);
        assert_eq!(map2.len(), 1);
    }

    #[rstest]
    fn test_remove() {
        let map = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let removed = map.remove("a");

        assert_eq!(removed.len(), 1);
        assert_eq!(removed.get("a"), None);
        assert_eq!(removed.get("b"), Some(&2));
        assert_eq!(removed.check_invariants(), Ok(()));
    }

    #[rstest]
    fn test_remove_missing_shares_root() {
        let map: PersistentHashMap<i32, i32> = (0..64).map(|n| (n, n)).collect();
        let same = map.remove(&1_000);
        assert!(same.ptr_eq(&map));
        assert_eq!(same.len(), 64);
    }

    #[rstest]
    fn test_contains_key() {
        let map = PersistentHashMap::new().insert("key".to_string(), 42);

        assert!(map.contains_key("key"));
        assert!(!map.contains_key("other"));
    }

    #[rstest]
    fn test_forced_collision() {
        let map = PersistentHashMap::with_hasher(ConstantHasher)
            .insert("A", 1)
            .insert("B", 2);

        assert_eq!(map.get("A"), Some(&1));
        assert_eq!(map.get("B"), Some(&2));
        assert_eq!(map.get("C"), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.check_invariants(), Ok(()));

        let only_b = map.remove("A");
        assert_eq!(only_b.get("B"), Some(&2));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b.check_invariants(), Ok(()));
        assert!(only_b.remove("B").is_empty());
    }

    #[rstest]
    fn test_hasher_is_inherited() {
        let map = PersistentHashMap::with_hasher(ConstantHasher).insert(1, 1);
        let derived = map.insert(2, 2).remove(&1);
        assert!(ReferenceCounter::ptr_eq(&map.hasher, &derived.hasher));
    }

    #[rstest]
    fn test_iter() {
        let map = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);

        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by_key(|(k, _)| (*k).clone());

        assert_eq!(entries, vec![(&"a".to_string(), &1), (&"b".to_string(), &2)]);
        assert_eq!(map.iter().len(), 2);
    }

    #[rstest]
    fn test_iter_is_restartable() {
        let map: PersistentHashMap<i32, i32> = (0..200).map(|n| (n, n * 2)).collect();
        let first: Vec<_> = map.iter().collect();
        let second: Vec<_> = map.iter().collect();
        assert_eq!(first, second);
    }

    #[rstest]
    fn test_from_iter() {
        let entries = vec![("a".to_string(), 1), ("b".to_string(), 2)];
        let map: PersistentHashMap<String, i32> = entries.into_iter().collect();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));
    }

    #[rstest]
    fn test_into_iter_owned() {
        let map: PersistentHashMap<i32, String> = (0..10).map(|n| (n, n.to_string())).collect();
        let mut entries: Vec<(i32, String)> = map.clone().into_iter().collect();
        entries.sort();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[3], (3, "3".to_string()));
        assert_eq!(map.len(), 10);
    }

    #[rstest]
    fn test_eq() {
        let map1 = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let map2 = PersistentHashMap::new()
            .insert("b".to_string(), 2)
            .insert("a".to_string(), 1);

        assert_eq!(map1, map2);
        assert_ne!(map1, map2.insert("b".to_string(), 3));
    }

    #[rstest]
    fn test_update_keeps_stored_key() {
        let map = PersistentHashMap::new().insert("count".to_string(), 1);
        let updated = map.update("count", |value| value * 10).expect("key present");
        assert_eq!(updated.get("count"), Some(&10));
        assert_eq!(map.get("count"), Some(&1));
    }

    #[rstest]
    fn test_merge_prefers_other() {
        let left: PersistentHashMap<i32, &str> = [(1, "left"), (2, "left")].into_iter().collect();
        let right: PersistentHashMap<i32, &str> = [(2, "right"), (3, "right")].into_iter().collect();
        let merged = left.merge(&right);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[&1], "left");
        assert_eq!(merged[&2], "right");
        assert_eq!(merged[&3], "right");
    }

    #[rstest]
    #[should_panic(expected = "key not found")]
    fn test_index_missing_key_panics() {
        let map: PersistentHashMap<i32, i32> = PersistentHashMap::new();
        let _ = map[&1];
    }

    fn lookup<'a, K, V, S>(map: &'a PersistentHashMap<K, V, S>, key: &str) -> (&'a V, bool)
    where
        K: Hash + Eq + Borrow<str>,
        S: BuildHasher,
    {
        (&map[key], map.contains_key(key))
    }

    #[rstest]
    fn test_lookup_needs_no_clone_bounds() {
        let map = PersistentHashMap::new().insert("key".to_string(), 7);
        assert_eq!(lookup(&map, "key"), (&7, true));

        struct Opaque;
        let opaque: PersistentHashMap<String, Opaque> = PersistentHashMap::new();
        assert!(opaque.get("key").is_none());
        assert!(opaque.get_key_value("key").is_none());
        assert!(!opaque.contains_key("key"));
    }

    #[rstest]
    fn test_debug_and_display() {
        let map = PersistentHashMap::singleton(1, "one");
        assert_eq!(format!("{map:?}"), "{1: \"one\"}");
        assert_eq!(format!("{map}"), "{1: one}");

        let empty: PersistentHashMap<i32, i32> = PersistentHashMap::new();
        assert_eq!(format!("{empty}"), "{}");
    }

    #[rstest]
    fn test_check_invariants_after_churn() {
        let mut map: PersistentHashMap<u32, u32> = PersistentHashMap::new();
        for n in 0..3_000 {
            map = map.insert(n, n);
        }
        for n in (0..3_000).step_by(3) {
            map = map.remove(&n);
        }
        assert_eq!(map.len(), 2_000);
        assert_eq!(map.check_invariants(), Ok(()));
    }

    #[rstest]
    fn test_check_invariants_reports_length_mismatch() {
        let mut map = PersistentHashMap::singleton(1, 1);
        map.length = 5;
        assert_eq!(
            map.check_invariants(),
            Err(InvariantViolation::new(ViolationKind::LengthMismatch, 0))
        );
    }
}
