// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parent/child edge storage with traversal guards.

use alloc::vec::Vec;
use core::fmt;
use core::hash::Hash;

use crate::direction::{DenseKey, Direction};
use crate::scratch::AncestorScratch;

/// Error returned when an edge cannot be added or removed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError<K> {
    /// A node cannot be its own parent or child.
    #[error("cannot link {key:?} to itself")]
    SelfLink {
        /// The offending node.
        key: K,
    },
    /// The child is already an ancestor of the parent.
    #[error("linking {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// The node that would gain a child.
        parent: K,
        /// The node that would gain a parent.
        child: K,
    },
    /// An edge set touched by the operation is being traversed.
    #[error("{direction:?} edges of {key:?} are protected by an active traversal")]
    Protected {
        /// The node whose edge set is protected.
        key: K,
        /// Which of the node's edge sets is protected.
        direction: Direction,
    },
}

/// How to handle cycle detection when linking.
///
/// A link whose child is already a direct parent of the parent is refused
/// with [`LinkError::Cycle`] under every policy. The policies only decide
/// what happens to longer cycles, which need a walk over the ancestors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum CycleHandling {
    /// Walk the ancestors and panic on a cycle in debug builds; skip the walk
    /// entirely in release builds.
    #[default]
    DebugAssert,
    /// Walk the ancestors and return [`LinkError::Cycle`].
    Error,
    /// Walk the ancestors and silently refuse the link.
    Ignore,
    /// Skip the walk; the caller guarantees no cycles.
    Allow,
}

impl CycleHandling {
    #[inline]
    fn checks(self) -> bool {
        match self {
            Self::DebugAssert => cfg!(debug_assertions),
            Self::Error | Self::Ignore => true,
            Self::Allow => false,
        }
    }
}

/// Bidirectional parent/child edges plus per-direction traversal guards.
///
/// Every edge is stored twice: in the parent's child list and in the child's
/// parent list, so both "who do I aggregate?" and "who aggregates me?" are
/// direct lookups. Lists keep insertion order.
///
/// Each node also carries two guard counters, one per [`Direction`]. While a
/// caller walks an edge list it raises the matching guard with
/// [`protect`](Self::protect); any [`link`](Self::link) or
/// [`unlink`](Self::unlink) that would modify a guarded list is refused with
/// [`LinkError::Protected`]. The guards are plain counters for single-threaded
/// reentrancy, not locks.
///
/// # Example
///
/// ```
/// use understory_lineage::{CycleHandling, Direction, Lineage, LinkError};
///
/// let mut lineage = Lineage::<u32>::new();
/// lineage.link(1, 2, CycleHandling::Error).unwrap();
/// lineage.link(2, 3, CycleHandling::Error).unwrap();
///
/// assert!(lineage.children(1).eq([2]));
/// assert!(lineage.is_ancestor(1, 3));
///
/// // 1 is an ancestor of 3, so 1 cannot become a child of 3.
/// assert!(matches!(
///     lineage.link(3, 1, CycleHandling::Error),
///     Err(LinkError::Cycle { .. })
/// ));
///
/// lineage.protect(2, Direction::Parents);
/// assert!(lineage.unlink(1, 2).is_err());
/// lineage.release(2, Direction::Parents);
/// assert_eq!(lineage.unlink(1, 2), Ok(true));
/// ```
#[derive(Clone)]
pub struct Lineage<K>
where
    K: Copy + Eq + Hash + DenseKey,
{
    /// edges[0][key.index()] -> parents of `key`, edges[1][..] -> children.
    edges: [Vec<Vec<K>>; 2],
    /// guards[key.index()][direction.slot()] -> active traversals.
    guards: Vec<[u32; 2]>,
    scratch: AncestorScratch<K>,
}

impl<K> Default for Lineage<K>
where
    K: Copy + Eq + Hash + DenseKey,
{
    fn default() -> Self {
        Self {
            edges: [Vec::new(), Vec::new()],
            guards: Vec::new(),
            scratch: AncestorScratch::default(),
        }
    }
}

impl<K> fmt::Debug for Lineage<K>
where
    K: Copy + Eq + Hash + DenseKey,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edge_count: usize = self.edges[Direction::Children.slot()]
            .iter()
            .map(Vec::len)
            .sum();
        f.debug_struct("Lineage")
            .field("edge_count", &edge_count)
            .field(
                "protected",
                &self.guards.iter().filter(|g| g[0] + g[1] > 0).count(),
            )
            .finish_non_exhaustive()
    }
}

/// Ensures `vec` has at least `idx + 1` elements, filling with defaults.
#[inline]
fn grow<T: Default>(vec: &mut Vec<T>, idx: usize) {
    if idx >= vec.len() {
        vec.resize_with(idx + 1, T::default);
    }
}

impl<K> Lineage<K>
where
    K: Copy + Eq + Hash + DenseKey + fmt::Debug,
{
    /// Creates an empty lineage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if there are no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges[Direction::Children.slot()]
            .iter()
            .all(Vec::is_empty)
    }

    #[inline]
    fn list(&self, key: K, direction: Direction) -> &[K] {
        self.edges[direction.slot()]
            .get(key.index())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Adds `child` under `parent`.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the edge was added.
    /// - `Ok(false)` if it already existed, or if `handling` silently refused a
    ///   cycle.
    ///
    /// # Errors
    ///
    /// - [`LinkError::SelfLink`] when `parent == child`, whatever `handling` is.
    /// - [`LinkError::Protected`] when the parent's child list or the child's
    ///   parent list is being traversed.
    /// - [`LinkError::Cycle`] when `child` is a direct parent of `parent`,
    ///   whatever `handling` is, or any other ancestor of `parent` and
    ///   `handling` is [`CycleHandling::Error`].
    ///
    /// # Panics
    ///
    /// With [`CycleHandling::DebugAssert`] in a debug build, panics when the
    /// link would create a cycle.
    pub fn link(
        &mut self,
        parent: K,
        child: K,
        handling: CycleHandling,
    ) -> Result<bool, LinkError<K>> {
        if parent == child {
            return Err(LinkError::SelfLink { key: parent });
        }
        self.check_unprotected(parent, child)?;

        if self.is_linked(parent, child) {
            return Ok(false);
        }

        if self.is_linked(child, parent) {
            return Err(LinkError::Cycle { parent, child });
        }

        if handling.checks() && self.reaches_ancestor(child, parent) {
            return match handling {
                CycleHandling::Error => Err(LinkError::Cycle { parent, child }),
                CycleHandling::DebugAssert => {
                    debug_assert!(false, "linking {child:?} under {parent:?} would create a cycle");
                    Ok(false)
                }
                CycleHandling::Ignore | CycleHandling::Allow => Ok(false),
            };
        }

        let children = &mut self.edges[Direction::Children.slot()];
        grow(children, parent.index());
        children[parent.index()].push(child);

        let parents = &mut self.edges[Direction::Parents.slot()];
        grow(parents, child.index());
        parents[child.index()].push(parent);

        tracing::debug!(?parent, ?child, "linked");
        Ok(true)
    }

    /// Removes the edge between `parent` and `child`.
    ///
    /// Returns `Ok(true)` if the edge existed and was removed.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protected`] when either affected list is being traversed.
    pub fn unlink(&mut self, parent: K, child: K) -> Result<bool, LinkError<K>> {
        self.check_unprotected(parent, child)?;

        let children = &mut self.edges[Direction::Children.slot()];
        let Some(pos) = children
            .get(parent.index())
            .and_then(|list| list.iter().position(|&k| k == child))
        else {
            return Ok(false);
        };
        children[parent.index()].remove(pos);

        let parents = &mut self.edges[Direction::Parents.slot()];
        if let Some(list) = parents.get_mut(child.index())
            && let Some(pos) = list.iter().position(|&k| k == parent)
        {
            list.remove(pos);
        }

        tracing::debug!(?parent, ?child, "unlinked");
        Ok(true)
    }

    fn check_unprotected(&self, parent: K, child: K) -> Result<(), LinkError<K>> {
        if self.is_protected(parent, Direction::Children) {
            return Err(LinkError::Protected {
                key: parent,
                direction: Direction::Children,
            });
        }
        if self.is_protected(child, Direction::Parents) {
            return Err(LinkError::Protected {
                key: child,
                direction: Direction::Parents,
            });
        }
        Ok(())
    }

    /// Drops every edge and guard recorded for `key`.
    ///
    /// This is meant for recycling a key whose edges were already detached.
    /// It ignores guards; edges still present are removed from the
    /// counterpart lists as well, so the lineage stays consistent.
    pub fn remove_key(&mut self, key: K) {
        let idx = key.index();
        for direction in [Direction::Parents, Direction::Children] {
            let taken = match self.edges[direction.slot()].get_mut(idx) {
                Some(list) => core::mem::take(list),
                None => continue,
            };
            let other = &mut self.edges[direction.opposite().slot()];
            for peer in taken {
                if let Some(list) = other.get_mut(peer.index())
                    && let Some(pos) = list.iter().position(|&k| k == key)
                {
                    list.remove(pos);
                }
            }
        }
        if let Some(guard) = self.guards.get_mut(idx) {
            *guard = [0, 0];
        }
    }

    /// Returns the direct parents of `key`, in link order.
    #[inline]
    pub fn parents(&self, key: K) -> impl Iterator<Item = K> + '_ {
        self.list(key, Direction::Parents).iter().copied()
    }

    /// Returns the direct children of `key`, in link order.
    #[inline]
    pub fn children(&self, key: K) -> impl Iterator<Item = K> + '_ {
        self.list(key, Direction::Children).iter().copied()
    }

    /// Returns the direct neighbours of `key` in `direction`.
    #[must_use]
    #[inline]
    pub fn neighbours(&self, key: K, direction: Direction) -> &[K] {
        self.list(key, direction)
    }

    /// Returns `true` if `child` is a direct child of `parent`.
    #[must_use]
    pub fn is_linked(&self, parent: K, child: K) -> bool {
        self.list(parent, Direction::Children).contains(&child)
    }

    /// Returns `true` if `key` has any parents.
    #[must_use]
    #[inline]
    pub fn has_parents(&self, key: K) -> bool {
        !self.list(key, Direction::Parents).is_empty()
    }

    /// Returns `true` if `key` has any children.
    #[must_use]
    #[inline]
    pub fn has_children(&self, key: K) -> bool {
        !self.list(key, Direction::Children).is_empty()
    }

    /// Returns the number of direct parents of `key`.
    #[must_use]
    pub fn parent_count(&self, key: K) -> usize {
        self.list(key, Direction::Parents).len()
    }

    /// Returns the number of direct children of `key`.
    #[must_use]
    pub fn child_count(&self, key: K) -> usize {
        self.list(key, Direction::Children).len()
    }

    /// Returns `true` if `ancestor` is `key` or reachable from `key` by
    /// following parent edges.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: K, key: K) -> bool {
        AncestorScratch::default().reaches(key, ancestor, |k| self.list(k, Direction::Parents))
    }

    /// [`is_ancestor`](Self::is_ancestor) on the buffers kept by the lineage.
    fn reaches_ancestor(&mut self, ancestor: K, key: K) -> bool {
        let mut scratch = core::mem::take(&mut self.scratch);
        let found = scratch.reaches(key, ancestor, |k| self.list(k, Direction::Parents));
        self.scratch = scratch;
        found
    }

    /// Raises the guard on `key`'s `direction` edge list.
    ///
    /// Guards nest; every call must be paired with [`release`](Self::release).
    pub fn protect(&mut self, key: K, direction: Direction) {
        grow(&mut self.guards, key.index());
        self.guards[key.index()][direction.slot()] += 1;
    }

    /// Lowers the guard raised by [`protect`](Self::protect).
    pub fn release(&mut self, key: K, direction: Direction) {
        match self.guards.get_mut(key.index()) {
            Some(guard) if guard[direction.slot()] > 0 => guard[direction.slot()] -= 1,
            _ => debug_assert!(false, "releasing an unprotected {direction:?} list of {key:?}"),
        }
    }

    /// Returns `true` while `key`'s `direction` edge list is guarded.
    #[must_use]
    #[inline]
    pub fn is_protected(&self, key: K, direction: Direction) -> bool {
        self.guards
            .get(key.index())
            .is_some_and(|g| g[direction.slot()] > 0)
    }
}
