// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hash-map storage strategy.

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::key::{KeyRange, PropertyKey};
use crate::store::{SetOutcome, StoreIter, ValueStore};
use crate::value::PropertyValue;

/// A plain map from packed key to value.
///
/// Lookups are O(1); ordered iteration sorts the matching entries first.
#[derive(Clone, Debug, Default)]
pub struct FlatStore {
    entries: HashMap<PropertyKey, PropertyValue>,
}

impl FlatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueStore for FlatStore {
    #[inline]
    fn get(&self, key: PropertyKey) -> Option<PropertyValue> {
        self.entries.get(&key).copied()
    }

    fn get_or_set(&mut self, key: PropertyKey, value: PropertyValue) -> SetOutcome {
        SetOutcome::new(self.entries.insert(key, value), value)
    }

    fn remove(&mut self, key: PropertyKey) -> Option<PropertyValue> {
        self.entries.remove(&key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn range(&self, range: KeyRange) -> StoreIter<'_> {
        let mut matching: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| range.contains(**key))
            .map(|(&key, &value)| (key, value))
            .collect();
        matching.sort_unstable_by_key(|&(key, _)| key);
        StoreIter::sorted(matching)
    }
}
