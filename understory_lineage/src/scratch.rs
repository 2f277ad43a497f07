// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Buffers for ancestor searches.

use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashSet;

/// Search stack and visited set, kept between searches so that repeated
/// cycle checks on a deep hierarchy do not allocate.
#[derive(Clone, Debug)]
pub(crate) struct AncestorScratch<K> {
    stack: Vec<K>,
    visited: HashSet<K>,
}

impl<K> Default for AncestorScratch<K> {
    fn default() -> Self {
        Self {
            stack: Vec::new(),
            visited: HashSet::new(),
        }
    }
}

impl<K> AncestorScratch<K>
where
    K: Copy + Eq + Hash,
{
    /// Returns `true` if `target` is `start` or is reached from `start` by
    /// following `next` any number of times.
    pub(crate) fn reaches<'a>(
        &mut self,
        start: K,
        target: K,
        mut next: impl FnMut(K) -> &'a [K],
    ) -> bool
    where
        K: 'a,
    {
        self.stack.clear();
        self.visited.clear();
        self.stack.push(start);

        while let Some(current) = self.stack.pop() {
            if current == target {
                return true;
            }
            if self.visited.insert(current) {
                self.stack.extend_from_slice(next(current));
            }
        }
        false
    }
}
