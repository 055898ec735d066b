//! Hash functions for [`PersistentHashMap`](super::PersistentHashMap).
//!
//! The map takes any [`BuildHasher`] and derives a 64-bit hash per key from
//! it. The hasher is chosen when a map is constructed and is inherited by
//! every version derived from it, so all versions of one lineage agree on
//! where each key lives.
//!
//! # Precondition
//!
//! Equal keys must hash equally, and hashing the same key twice must give the
//! same result. A hasher that breaks this makes lookups meaningless; it is not
//! detected.
//!
//! # Feature Flags
//!
//! - default: [`std::collections::hash_map::DefaultHasher`] with fixed keys
//! - `fxhash`: `rustc_hash::FxBuildHasher`
//! - `ahash`: `ahash::RandomState` (takes precedence over `fxhash`)

use std::hash::{BuildHasher, Hash};

#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
use std::collections::hash_map::DefaultHasher;
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
use std::hash::BuildHasherDefault;

/// The hasher used by [`PersistentHashMap::new`](super::PersistentHashMap::new).
#[cfg(feature = "ahash")]
pub type DefaultHashBuilder = ahash::RandomState;

/// The hasher used by [`PersistentHashMap::new`](super::PersistentHashMap::new).
#[cfg(all(feature = "fxhash", not(feature = "ahash")))]
pub type DefaultHashBuilder = rustc_hash::FxBuildHasher;

/// The hasher used by [`PersistentHashMap::new`](super::PersistentHashMap::new).
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type DefaultHashBuilder = BuildHasherDefault<DefaultHasher>;

/// Computes the 64-bit trie hash of `key`.
#[inline]
pub(crate) fn hash_key<Q, S>(hasher: &S, key: &Q) -> u64
where
    Q: Hash + ?Sized,
    S: BuildHasher,
{
    hasher.hash_one(key)
}
