//! Iterators over [`PersistentHashMap`](super::PersistentHashMap).
//!
//! Entries come out in pre-order: within a node, slots are visited in
//! ascending bit position and a subtrie is exhausted before the next slot.
//! The order therefore follows the key hashes, not insertion order. Because
//! no version is ever modified, a traversal can be restarted at any time and
//! yields the same sequence again.

use std::iter::FusedIterator;
use std::slice;

use arrayvec::ArrayVec;

use super::node::{CompactNode, LEVELS, Slot};

/// A lazy iterator over key-value pairs of a
/// [`PersistentHashMap`](super::PersistentHashMap).
///
/// Holds one cursor per trie level, so it never allocates.
pub struct PersistentHashMapIterator<'a, K, V> {
    stack: ArrayVec<slice::Iter<'a, Slot<K, V>>, LEVELS>,
    collision: slice::Iter<'a, (K, V)>,
    remaining: usize,
}

impl<'a, K, V> PersistentHashMapIterator<'a, K, V> {
    pub(crate) fn new(root: Option<&'a CompactNode<K, V>>, length: usize) -> Self {
        let mut stack = ArrayVec::new();
        if let Some(root) = root {
            stack.push(root.slots().iter());
        }
        Self {
            stack,
            collision: Default::default(),
            remaining: length,
        }
    }
}

impl<'a, K, V> Iterator for PersistentHashMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.collision.next() {
                self.remaining -= 1;
                return Some((key, value));
            }
            let cursor = self.stack.last_mut()?;
            match cursor.next() {
                None => {
                    self.stack.pop();
                }
                Some(Slot::Leaf(leaf)) => {
                    self.remaining -= 1;
                    return Some((&leaf.key, &leaf.value));
                }
                Some(Slot::Subtrie(child)) => self.stack.push(child.slots().iter()),
                Some(Slot::Collision(list)) => self.collision = list.entries.iter(),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V> FusedIterator for PersistentHashMapIterator<'_, K, V> {}

impl<K, V> Clone for PersistentHashMapIterator<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            collision: self.collision.clone(),
            remaining: self.remaining,
        }
    }
}

/// An owning iterator over key-value pairs of a
/// [`PersistentHashMap`](super::PersistentHashMap).
///
/// Entries are cloned out of the trie, since its nodes may still be shared
/// with other versions.
pub struct PersistentHashMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> PersistentHashMapIntoIterator<K, V> {
    pub(crate) fn new(entries: Vec<(K, V)>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl<K, V> Iterator for PersistentHashMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIntoIterator<K, V> {}

impl<K, V> FusedIterator for PersistentHashMapIntoIterator<K, V> {}

// =============================================================================
// Tests
// =============================================================================
