//! Bitmap-compacted trie nodes.
//!
//! A [`CompactNode`] stores a presence bitmap plus a dense array holding only
//! the occupied slots. The slot for logical index `i` lives at compacted
//! position `popcount(bitmap & ((1 << i) - 1))`; absent slots cost nothing.
//!
//! Nodes are never mutated once built. Every update goes through one of the
//! copy-on-write helpers ([`CompactNode::with_inserted`],
//! [`CompactNode::with_replaced`], [`CompactNode::with_removed`]), which copy
//! the slot array and share every subtrie by reference.

use std::borrow::Borrow;

use smallvec::SmallVec;
use static_assertions::const_assert;

use super::ReferenceCounter;

// =============================================================================
// Constants
// =============================================================================

/// Presence bitmap of a node. One bit per logical slot.
pub(crate) type Bitmap = u32;

/// Number of hash bits consumed per trie level (the branching exponent).
///
/// Larger values make the trie shallower, so an update copies fewer nodes, but
/// every copied node carries a wider slot array when it is densely populated.
/// Smaller values do the opposite. Because only occupied slots are stored, a
/// sparse node costs the same whatever this value is. The exponent is fixed
/// for the whole crate: raising it to 6 means widening [`Bitmap`] to `u64`.
pub(crate) const BITS_PER_LEVEL: u32 = 5;

/// Width of the hash produced for every key.
pub(crate) const HASH_BITS: u32 = u64::BITS;

/// Deepest level of the trie. Level 12 consumes the last 4 bits of the hash.
pub(crate) const LAST_LEVEL: usize = ((HASH_BITS - 1) / BITS_PER_LEVEL) as usize;

/// Number of levels a root-to-leaf path can visit.
pub(crate) const LEVELS: usize = LAST_LEVEL + 1;

/// Mask selecting one hash fragment.
const FRAGMENT_MASK: u64 = (1 << BITS_PER_LEVEL) - 1;

const_assert!(1 << BITS_PER_LEVEL <= Bitmap::BITS);
const_assert!(LEVELS as u32 * BITS_PER_LEVEL >= HASH_BITS);

// =============================================================================
// Bitmap helpers
// =============================================================================

/// Extracts the logical slot index of `hash` at `depth`.
#[inline]
pub(crate) const fn fragment(hash: u64, depth: usize) -> u32 {
    ((hash >> (depth as u32 * BITS_PER_LEVEL)) & FRAGMENT_MASK) as u32
}

/// Returns the single-bit mask for a logical slot index.
#[inline]
pub(crate) const fn mask(fragment: u32) -> Bitmap {
    1 << fragment
}

/// Maps a logical slot (given as its bit) to its compacted array position.
#[inline]
pub(crate) const fn compacted_index(bitmap: Bitmap, bit: Bitmap) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

// =============================================================================
// Node Definition
// =============================================================================

/// A key-value pair together with the hash of its key.
#[derive(Clone)]
pub(crate) struct Leaf<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
}

/// Keys whose 64-bit hashes are identical.
///
/// Only found in nodes at [`LAST_LEVEL`], and always holds two or more entries.
#[derive(Clone)]
pub(crate) struct CollisionList<K, V> {
    pub(crate) hash: u64,
    pub(crate) entries: SmallVec<[(K, V); 2]>,
}

/// Content of an occupied slot.
#[derive(Clone)]
pub(crate) enum Slot<K, V> {
    /// A single entry stored inline.
    Leaf(Leaf<K, V>),
    /// A child node, possibly shared with other versions.
    Subtrie(ReferenceCounter<CompactNode<K, V>>),
    /// Entries whose hashes agree on every bit.
    Collision(ReferenceCounter<CollisionList<K, V>>),
}

/// Bitmap-indexed trie node.
pub(crate) struct CompactNode<K, V> {
    bitmap: Bitmap,
    slots: Box<[Slot<K, V>]>,
}

impl<K, V> CompactNode<K, V> {
    fn from_parts(bitmap: Bitmap, slots: Box<[Slot<K, V>]>) -> Self {
        debug_assert_eq!(
            bitmap.count_ones() as usize,
            slots.len(),
            "bitmap population must match the slot count"
        );
        Self { bitmap, slots }
    }

    /// Creates a node holding one slot at `fragment`.
    pub(crate) fn single(fragment: u32, slot: Slot<K, V>) -> Self {
        Self::from_parts(mask(fragment), Box::new([slot]))
    }

    /// Creates a node holding two slots at distinct fragments.
    pub(crate) fn pair(
        first_fragment: u32,
        first: Slot<K, V>,
        second_fragment: u32,
        second: Slot<K, V>,
    ) -> Self {
        debug_assert_ne!(first_fragment, second_fragment);
        let bitmap = mask(first_fragment) | mask(second_fragment);
        let slots: Box<[Slot<K, V>]> = if first_fragment < second_fragment {
            Box::new([first, second])
        } else {
            Box::new([second, first])
        };
        Self::from_parts(bitmap, slots)
    }

    #[inline]
    pub(crate) const fn bitmap(&self) -> Bitmap {
        self.bitmap
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[Slot<K, V>] {
        &self.slots
    }

    /// Returns the slot stored for `fragment`, if any.
    #[inline]
    pub(crate) fn slot(&self, fragment: u32) -> Option<&Slot<K, V>> {
        let bit = mask(fragment);
        if self.bitmap & bit == 0 {
            None
        } else {
            Some(&self.slots[compacted_index(self.bitmap, bit)])
        }
    }

    /// Returns the only slot if this node has exactly one.
    pub(crate) fn sole_slot(&self) -> Option<&Slot<K, V>> {
        match &*self.slots {
            [slot] => Some(slot),
            _ => None,
        }
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.bitmap == 0
    }
}

impl<K: Clone, V: Clone> CompactNode<K, V> {
    /// Returns a copy with `slot` added at the currently empty `fragment`.
    pub(crate) fn with_inserted(&self, fragment: u32, slot: Slot<K, V>) -> Self {
        let bit = mask(fragment);
        debug_assert_eq!(self.bitmap & bit, 0, "slot is already occupied");
        let position = compacted_index(self.bitmap, bit);

        let mut slots = Vec::with_capacity(self.slots.len() + 1);
        slots.extend_from_slice(&self.slots[..position]);
        slots.push(slot);
        slots.extend_from_slice(&self.slots[position..]);
        Self::from_parts(self.bitmap | bit, slots.into_boxed_slice())
    }

    /// Returns a copy with the occupied `fragment` holding `slot` instead.
    pub(crate) fn with_replaced(&self, fragment: u32, slot: Slot<K, V>) -> Self {
        let bit = mask(fragment);
        debug_assert_ne!(self.bitmap & bit, 0, "slot is not occupied");
        let position = compacted_index(self.bitmap, bit);

        let mut slots = self.slots.to_vec();
        slots[position] = slot;
        Self::from_parts(self.bitmap, slots.into_boxed_slice())
    }

    /// Returns a copy with the occupied `fragment` cleared.
    pub(crate) fn with_removed(&self, fragment: u32) -> Self {
        let bit = mask(fragment);
        debug_assert_ne!(self.bitmap & bit, 0, "slot is not occupied");
        let position = compacted_index(self.bitmap, bit);

        let mut slots = Vec::with_capacity(self.slots.len() - 1);
        slots.extend_from_slice(&self.slots[..position]);
        slots.extend_from_slice(&self.slots[position + 1..]);
        Self::from_parts(self.bitmap & !bit, slots.into_boxed_slice())
    }

    /// Unwraps the node into its leaf if that leaf is its only slot.
    pub(crate) fn into_sole_leaf(self) -> Result<Leaf<K, V>, Self> {
        let bitmap = self.bitmap;
        let mut slots = self.slots.into_vec();
        match slots.pop() {
            Some(Slot::Leaf(leaf)) if slots.is_empty() => Ok(leaf),
            last => {
                slots.extend(last);
                Err(Self::from_parts(bitmap, slots.into_boxed_slice()))
            }
        }
    }
}

// =============================================================================
// Collision lists
// =============================================================================

/// What is left of a collision list after one of its entries is dropped.
pub(crate) enum Shrunk<K, V> {
    List(CollisionList<K, V>),
    Leaf(Leaf<K, V>),
}

impl<K, V> CollisionList<K, V> {
    pub(crate) fn find<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key.borrow() == key)
            .map(|(entry_key, value)| (entry_key, value))
    }
}

impl<K: Clone, V: Clone> CollisionList<K, V> {
    pub(crate) fn pair(first: Leaf<K, V>, second: Leaf<K, V>) -> Self {
        assert_eq!(
            first.hash, second.hash,
            "collision list requires identical hashes"
        );
        let mut entries = SmallVec::new();
        entries.push((first.key, first.value));
        entries.push((second.key, second.value));
        Self {
            hash: first.hash,
            entries,
        }
    }

    /// Returns a copy holding `leaf`, replacing an entry with an equal key.
    ///
    /// The flag is `true` when the key was not present before.
    pub(crate) fn with_entry(&self, leaf: Leaf<K, V>) -> (Self, bool)
    where
        K: Eq,
    {
        assert_eq!(self.hash, leaf.hash, "collision list requires identical hashes");
        let mut entries = self.entries.clone();
        let added = match entries.iter_mut().find(|(key, _)| *key == leaf.key) {
            Some(entry) => {
                entry.1 = leaf.value;
                false
            }
            None => {
                entries.push((leaf.key, leaf.value));
                true
            }
        };
        (
            Self {
                hash: self.hash,
                entries,
            },
            added,
        )
    }

    /// Returns the list without `key`, or `None` if the key is not present.
    pub(crate) fn without<Q>(&self, key: &Q) -> Option<Shrunk<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let position = self
            .entries
            .iter()
            .position(|(entry_key, _)| entry_key.borrow() == key)?;

        let mut entries = self.entries.clone();
        entries.remove(position);
        if entries.len() == 1 {
            let (key, value) = entries.remove(0);
            Some(Shrunk::Leaf(Leaf {
                hash: self.hash,
                key,
                value,
            }))
        } else {
            Some(Shrunk::List(Self {
                hash: self.hash,
                entries,
            }))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
