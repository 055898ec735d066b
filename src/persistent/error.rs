//! Structural audit errors.
//!
//! [`InvariantViolation`] is produced by
//! [`PersistentHashMap::check_invariants`](super::PersistentHashMap::check_invariants).
//! A violation always means a bug in this crate (or a hasher that breaks its
//! determinism precondition), never a user error.

use std::fmt;

/// The structural rule that was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A node's bitmap population differs from its slot count.
    BitmapMismatch,
    /// A node other than the root has no slots.
    EmptyNode,
    /// A node other than the root holds nothing but a single leaf.
    LoneLeaf,
    /// An entry is stored under a slot its hash does not select.
    MisroutedEntry,
    /// A subtrie or collision list sits below the deepest level.
    DepthExceeded,
    /// A collision list is outside the deepest level or holds fewer than two
    /// entries.
    MalformedCollision,
    /// The cached length differs from the number of stored entries.
    LengthMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::BitmapMismatch => "bitmap population differs from slot count",
            Self::EmptyNode => "non-root node is empty",
            Self::LoneLeaf => "non-root node holds a single leaf",
            Self::MisroutedEntry => "entry stored under the wrong slot",
            Self::DepthExceeded => "node below the deepest trie level",
            Self::MalformedCollision => "malformed collision list",
            Self::LengthMismatch => "cached length differs from entry count",
        };
        formatter.write_str(description)
    }
}

/// A broken structural invariant, with the trie level it was found at.
///
/// # Examples
///
/// ```rust
/// use lambars_hamt::persistent::{InvariantViolation, ViolationKind};
///
/// let error = InvariantViolation {
///     kind: ViolationKind::EmptyNode,
///     depth: 3,
/// };
/// assert_eq!(format!("{error}"), "non-root node is empty (depth 3)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Which rule was broken.
    pub kind: ViolationKind,
    /// Trie level of the offending node (0 is the root).
    pub depth: usize,
}

impl InvariantViolation {
    pub(crate) const fn new(kind: ViolationKind, depth: usize) -> Self {
        Self { kind, depth }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} (depth {})", self.kind, self.depth)
    }
}

impl std::error::Error for InvariantViolation {}
