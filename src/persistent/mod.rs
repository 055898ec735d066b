//! Persistent (immutable) hash map.
//!
//! This module provides [`PersistentHashMap`], a Hash Array Mapped Trie whose
//! versions share structure:
//!
//! - compact nodes: a presence bitmap plus a dense array of the occupied
//!   slots, indexed by population count
//! - the trie: lookup, insertion and removal by path copying, with collision
//!   lists for keys whose full hashes are equal
//! - [`PersistentHashMap`]: the public map, generic over its
//!   [`BuildHasher`](std::hash::BuildHasher)
//!
//! # Structural Sharing
//!
//! An update copies only the nodes on the path from the root to the affected
//! key. Every other node is shared, by reference count, with the version the
//! update started from. Versions never change after construction, so any of
//! them may be read from several threads at once.
//!
//! # Examples
//!
//! ```rust
//! use lambars_hamt::persistent::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2);
//! assert_eq!(map.get("one"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//!
//! let removed = updated.remove("two");
//! assert_eq!(updated.len(), 2);
//! assert_eq!(removed.len(), 1);
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer used for every shared node.
///
/// This is `std::sync::Arc`, so map versions are `Send` and `Sync` whenever
/// their keys, values and hasher are.
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

mod error;
mod hasher;
mod hashmap;
mod iter;
mod node;
mod trie;

pub use error::InvariantViolation;
pub use error::ViolationKind;
pub use hasher::DefaultHashBuilder;
pub use hashmap::PersistentHashMap;
pub use hashmap::PersistentMap;
pub use iter::PersistentHashMapIntoIterator;
pub use iter::PersistentHashMapIterator;

// Rayon parallel iterator re-exports
#[cfg(feature = "rayon")]
pub use hashmap::PersistentHashMapParallelIterator;
#[cfg(feature = "rayon")]
pub use hashmap::PersistentHashMapParallelRefIterator;

// =============================================================================
// Tests
// =============================================================================
