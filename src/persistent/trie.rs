//! Hash trie traversal and path copying.
//!
//! Every function here reads existing nodes and never writes them. Updates
//! rebuild the nodes along the root-to-target path and share everything off
//! that path with the previous version.

use std::borrow::Borrow;

use arrayvec::ArrayVec;

use super::ReferenceCounter;
use super::error::{InvariantViolation, ViolationKind};
use super::node::{
    CollisionList, CompactNode, LAST_LEVEL, LEVELS, Leaf, Shrunk, Slot, fragment, mask,
};

// =============================================================================
// Lookup
// =============================================================================

/// Finds the entry stored for `key` below `root`.
pub(crate) fn get<'a, K, V, Q>(
    root: &'a CompactNode<K, V>,
    hash: u64,
    key: &Q,
) -> Option<(&'a K, &'a V)>
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut node = root;
    for depth in 0..LEVELS {
        match node.slot(fragment(hash, depth))? {
            Slot::Leaf(leaf) => {
                return (leaf.hash == hash && leaf.key.borrow() == key)
                    .then_some((&leaf.key, &leaf.value));
            }
            Slot::Subtrie(child) => node = &**child,
            Slot::Collision(list) => {
                return if list.hash == hash {
                    list.find(key)
                } else {
                    None
                };
            }
        }
    }
    unreachable!("trie deeper than {LEVELS} levels")
}

// =============================================================================
// Insertion
// =============================================================================

/// Inserts `leaf` below `node`, returning the rebuilt node and whether the
/// key was new.
pub(crate) fn insert<K, V>(
    node: &CompactNode<K, V>,
    leaf: Leaf<K, V>,
    depth: usize,
) -> (CompactNode<K, V>, bool)
where
    K: Eq + Clone,
    V: Clone,
{
    assert!(depth <= LAST_LEVEL, "trie deeper than {LEVELS} levels");
    let fragment = fragment(leaf.hash, depth);

    match node.slot(fragment) {
        None => (node.with_inserted(fragment, Slot::Leaf(leaf)), true),
        Some(Slot::Leaf(existing)) if existing.hash == leaf.hash && existing.key == leaf.key => {
            (node.with_replaced(fragment, Slot::Leaf(leaf)), false)
        }
        Some(Slot::Leaf(existing)) => {
            let slot = separate(existing.clone(), leaf, depth);
            (node.with_replaced(fragment, slot), true)
        }
        Some(Slot::Subtrie(child)) => {
            let (child, added) = insert(child, leaf, depth + 1);
            (
                node.with_replaced(fragment, Slot::Subtrie(ReferenceCounter::new(child))),
                added,
            )
        }
        Some(Slot::Collision(list)) => {
            let (list, added) = list.with_entry(leaf);
            (
                node.with_replaced(fragment, Slot::Collision(ReferenceCounter::new(list))),
                added,
            )
        }
    }
}

/// Builds the slot for two leaves whose fragments agree up to `depth`.
fn separate<K: Clone, V: Clone>(
    existing: Leaf<K, V>,
    incoming: Leaf<K, V>,
    depth: usize,
) -> Slot<K, V> {
    if depth == LAST_LEVEL {
        Slot::Collision(ReferenceCounter::new(CollisionList::pair(existing, incoming)))
    } else {
        Slot::Subtrie(ReferenceCounter::new(split(existing, incoming, depth + 1)))
    }
}

/// Builds a node at `depth` that holds both leaves.
fn split<K: Clone, V: Clone>(
    existing: Leaf<K, V>,
    incoming: Leaf<K, V>,
    depth: usize,
) -> CompactNode<K, V> {
    let existing_fragment = fragment(existing.hash, depth);
    let incoming_fragment = fragment(incoming.hash, depth);

    if existing_fragment == incoming_fragment {
        CompactNode::single(existing_fragment, separate(existing, incoming, depth))
    } else {
        CompactNode::pair(
            existing_fragment,
            Slot::Leaf(existing),
            incoming_fragment,
            Slot::Leaf(incoming),
        )
    }
}

// =============================================================================
// Removal
// =============================================================================

/// Shape of a subtrie after a removal.
pub(crate) enum Reduced<K, V> {
    /// Nothing is left; the parent drops the slot.
    Empty,
    /// One leaf is left; the parent stores it inline.
    Leaf(Leaf<K, V>),
    /// The rebuilt node.
    Node(CompactNode<K, V>),
}

impl<K: Clone, V: Clone> From<CompactNode<K, V>> for Reduced<K, V> {
    fn from(node: CompactNode<K, V>) -> Self {
        if node.is_empty() {
            return Self::Empty;
        }
        match node.into_sole_leaf() {
            Ok(leaf) => Self::Leaf(leaf),
            Err(node) => Self::Node(node),
        }
    }
}

/// Removes `key` below `node`. Returns `None` when the key is absent.
pub(crate) fn remove<K, V, Q>(
    node: &CompactNode<K, V>,
    hash: u64,
    key: &Q,
    depth: usize,
) -> Option<Reduced<K, V>>
where
    K: Borrow<Q> + Clone,
    V: Clone,
    Q: Eq + ?Sized,
{
    assert!(depth <= LAST_LEVEL, "trie deeper than {LEVELS} levels");
    let fragment = fragment(hash, depth);

    let rebuilt = match node.slot(fragment)? {
        Slot::Leaf(leaf) => {
            if leaf.hash != hash || leaf.key.borrow() != key {
                return None;
            }
            node.with_removed(fragment)
        }
        Slot::Subtrie(child) => match remove(child, hash, key, depth + 1)? {
            Reduced::Empty => node.with_removed(fragment),
            Reduced::Leaf(leaf) => node.with_replaced(fragment, Slot::Leaf(leaf)),
            Reduced::Node(child) => {
                node.with_replaced(fragment, Slot::Subtrie(ReferenceCounter::new(child)))
            }
        },
        Slot::Collision(list) => {
            if list.hash != hash {
                return None;
            }
            match list.without(key)? {
                Shrunk::Leaf(leaf) => node.with_replaced(fragment, Slot::Leaf(leaf)),
                Shrunk::List(list) => {
                    node.with_replaced(fragment, Slot::Collision(ReferenceCounter::new(list)))
                }
            }
        }
    };
    Some(Reduced::from(rebuilt))
}

/// Turns the outcome of a removal at the root back into a root node.
///
/// The root is exempt from collapsing, so a lone leaf is stored back at its
/// level-0 slot.
pub(crate) fn reroot<K, V>(reduced: Reduced<K, V>) -> Option<CompactNode<K, V>> {
    match reduced {
        Reduced::Empty => None,
        Reduced::Leaf(leaf) => Some(CompactNode::single(fragment(leaf.hash, 0), Slot::Leaf(leaf))),
        Reduced::Node(node) => Some(node),
    }
}

// =============================================================================
// Structural audit
// =============================================================================

/// Checks every structural invariant below `root` and returns the number of
/// entries found.
pub(crate) fn audit<K, V>(root: &CompactNode<K, V>) -> Result<usize, InvariantViolation> {
    let mut route = ArrayVec::new();
    audit_node(root, &mut route, true)
}

fn audit_node<K, V>(
    node: &CompactNode<K, V>,
    route: &mut ArrayVec<u32, LEVELS>,
    is_root: bool,
) -> Result<usize, InvariantViolation> {
    let depth = route.len();
    let violation = |kind| InvariantViolation::new(kind, depth);

    if node.bitmap().count_ones() as usize != node.slots().len() {
        return Err(violation(ViolationKind::BitmapMismatch));
    }
    if node.is_empty() && !is_root {
        return Err(violation(ViolationKind::EmptyNode));
    }
    if !is_root && matches!(node.sole_slot(), Some(Slot::Leaf(_))) {
        return Err(violation(ViolationKind::LoneLeaf));
    }

    let occupied = (0..u32::BITS).filter(|&fragment| node.bitmap() & mask(fragment) != 0);
    let mut entries = 0;
    for (fragment, slot) in occupied.zip(node.slots()) {
        route.push(fragment);
        let routed = |hash: u64| {
            route
                .iter()
                .enumerate()
                .all(|(level, &expected)| self::fragment(hash, level) == expected)
        };
        match slot {
            Slot::Leaf(leaf) => {
                if !routed(leaf.hash) {
                    return Err(violation(ViolationKind::MisroutedEntry));
                }
                entries += 1;
            }
            Slot::Subtrie(child) => {
                if depth == LAST_LEVEL {
                    return Err(violation(ViolationKind::DepthExceeded));
                }
                entries += audit_node(child, route, false)?;
            }
            Slot::Collision(list) => {
                if depth != LAST_LEVEL || list.entries.len() < 2 {
                    return Err(violation(ViolationKind::MalformedCollision));
                }
                if !routed(list.hash) {
                    return Err(violation(ViolationKind::MisroutedEntry));
                }
                entries += list.entries.len();
            }
        }
        route.pop();
    }
    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================
