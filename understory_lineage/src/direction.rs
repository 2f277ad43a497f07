// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Edge directions and dense key indexing.

use core::fmt;

/// One of the two edge sets every node carries.
///
/// # Example
///
/// ```
/// use understory_lineage::Direction;
///
/// assert_eq!(Direction::Parents.opposite(), Direction::Children);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges pointing at the nodes this node is a child of.
    Parents,
    /// Edges pointing at the nodes this node aggregates.
    Children,
}

impl Direction {
    /// Returns the other direction.
    #[must_use]
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Parents => Self::Children,
            Self::Children => Self::Parents,
        }
    }

    #[inline]
    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::Parents => 0,
            Self::Children => 1,
        }
    }
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parents => "Parents",
            Self::Children => "Children",
        })
    }
}

/// A key that maps onto a dense table index.
///
/// [`Lineage`](crate::Lineage) stores edges in vectors indexed by
/// [`DenseKey::index`], so keys should be small and reused (arena slots,
/// interned ids). Two distinct live keys must never share an index.
pub trait DenseKey {
    /// Returns the table index for this key.
    fn index(&self) -> usize;
}

impl DenseKey for u32 {
    #[inline]
    fn index(&self) -> usize {
        *self as usize
    }
}

impl DenseKey for usize {
    #[inline]
    fn index(&self) -> usize {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn opposite_round_trips() {
        for dir in [Direction::Parents, Direction::Children] {
            assert_eq!(dir.opposite().opposite(), dir);
            assert_ne!(dir.opposite(), dir);
        }
    }

    #[test]
    fn slots_are_distinct() {
        assert_ne!(Direction::Parents.slot(), Direction::Children.slot());
    }

    #[test]
    fn debug_is_bare_name() {
        assert_eq!(format!("{:?}", Direction::Children), "Children");
    }

    #[test]
    fn dense_key_impls() {
        assert_eq!(7_u32.index(), 7);
        assert_eq!(9_usize.index(), 9);
    }
}
