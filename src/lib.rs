//! # lambars-hamt
//!
//! A persistent hash map for Rust, built as a Hash Array Mapped Trie.
//!
//! ## Overview
//!
//! Every update returns a new map and leaves the previous one untouched.
//! Versions share all nodes off the updated path, so an insert or remove
//! costs one node copy per trie level rather than a copy of the whole map.
//!
//! - **Bitmap-compacted nodes**: only occupied slots are stored
//! - **Collision lists**: keys with equal 64-bit hashes share a bucket at the deepest level
//! - **Pluggable hashing**: any [`BuildHasher`](std::hash::BuildHasher) can be supplied
//! - **Thread-safe sharing**: nodes are reference counted with `Arc`
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` in map form
//! - `rayon`: parallel iteration
//! - `fxhash`: use `FxBuildHasher` as the default hasher
//! - `ahash`: use `ahash::RandomState` as the default hasher
//!
//! ## Example
//!
//! ```rust
//! use lambars_hamt::prelude::*;
//!
//! let map: PersistentHashMap<&str, i32> = [("a", 1), ("b", 2)].into_iter().collect();
//! let updated = map.insert("c", 3).remove("a");
//!
//! assert_eq!(map.len(), 2);
//! assert_eq!(updated.len(), 2);
//! assert_eq!(updated.get("c"), Some(&3));
//! assert!(!updated.contains_key("a"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use lambars_hamt::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
