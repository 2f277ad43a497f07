// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Key/value storage behind each graph node.
//!
//! Two interchangeable strategies implement [`ValueStore`]:
//!
//! - [`FlatStore`]: a plain hash map from packed key to value.
//! - [`BucketStore`]: one slot per tag, holding a parameterless value inline
//!   and promoting to a sorted vector on the first parameterized key.
//!
//! [`PropertyStore`] picks one at runtime according to [`StoreKind`]. Both
//! report whether a write changed the stored value separately from whether a
//! value was already present, and both iterate in key order so values of one
//! tag come out grouped.

use alloc::vec::IntoIter;

use crate::bucket::{BucketIter, BucketStore};
use crate::flat::FlatStore;
use crate::key::{KeyRange, PropertyKey};
use crate::value::PropertyValue;

/// Result of [`ValueStore::get_or_set`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetOutcome {
    /// The value stored before the write, if any.
    pub previous: Option<PropertyValue>,
    /// `true` if the stored value differs from `previous` (always `true` for
    /// an insertion).
    pub changed: bool,
}

impl SetOutcome {
    /// Compares `previous` with the value just written.
    #[must_use]
    #[inline]
    pub fn new(previous: Option<PropertyValue>, value: PropertyValue) -> Self {
        Self {
            previous,
            changed: previous != Some(value),
        }
    }

    /// Returns `true` if the key was absent before the write.
    #[must_use]
    #[inline]
    pub fn was_added(&self) -> bool {
        self.previous.is_none()
    }
}

/// Storage strategy for a graph node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum StoreKind {
    /// [`FlatStore`].
    Flat,
    /// [`BucketStore`].
    #[default]
    Bucketed,
}

/// Common interface of the node storage strategies.
///
/// Values are compared by raw bits; callers normalize reals before writing.
pub trait ValueStore {
    /// Returns the value stored under `key`.
    fn get(&self, key: PropertyKey) -> Option<PropertyValue>;

    /// Returns `true` if a value is stored under `key`.
    fn contains(&self, key: PropertyKey) -> bool {
        self.get(key).is_some()
    }

    /// Stores `value` under `key`.
    fn get_or_set(&mut self, key: PropertyKey, value: PropertyValue) -> SetOutcome;

    /// Removes and returns the value stored under `key`.
    fn remove(&mut self, key: PropertyKey) -> Option<PropertyValue>;

    /// Removes every value.
    fn clear(&mut self);

    /// Number of stored values.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the values whose key lies in `range`, in key order.
    fn range(&self, range: KeyRange) -> StoreIter<'_>;

    /// Iterates every value in key order.
    fn iter(&self) -> StoreIter<'_> {
        self.range(KeyRange::ALL)
    }

    /// Counts the values whose key lies in `range`.
    fn count_in_range(&self, range: KeyRange) -> usize {
        self.range(range).count()
    }
}

/// Ordered iterator over `(key, value)` pairs of a [`ValueStore`].
pub struct StoreIter<'a> {
    inner: IterInner<'a>,
}

enum IterInner<'a> {
    Sorted(IntoIter<(PropertyKey, PropertyValue)>),
    Bucket(BucketIter<'a>),
}

impl<'a> StoreIter<'a> {
    pub(crate) fn sorted(entries: alloc::vec::Vec<(PropertyKey, PropertyValue)>) -> Self {
        Self {
            inner: IterInner::Sorted(entries.into_iter()),
        }
    }

    pub(crate) fn bucket(iter: BucketIter<'a>) -> Self {
        Self {
            inner: IterInner::Bucket(iter),
        }
    }
}

impl Iterator for StoreIter<'_> {
    type Item = (PropertyKey, PropertyValue);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Sorted(iter) => iter.next(),
            IterInner::Bucket(iter) => iter.next(),
        }
    }
}

impl core::fmt::Debug for StoreIter<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.inner {
            IterInner::Sorted(_) => "Flat",
            IterInner::Bucket(_) => "Bucketed",
        };
        f.debug_struct("StoreIter").field("kind", &kind).finish()
    }
}

/// A [`ValueStore`] whose strategy is chosen at runtime.
#[derive(Clone, Debug)]
pub enum PropertyStore {
    /// Plain key/value map.
    Flat(FlatStore),
    /// Tag-bucketed store.
    Bucketed(BucketStore),
}

impl PropertyStore {
    /// Creates an empty store of the given kind.
    #[must_use]
    pub fn new(kind: StoreKind) -> Self {
        match kind {
            StoreKind::Flat => Self::Flat(FlatStore::new()),
            StoreKind::Bucketed => Self::Bucketed(BucketStore::new()),
        }
    }

    /// Returns the strategy of this store.
    #[must_use]
    pub fn kind(&self) -> StoreKind {
        match self {
            Self::Flat(_) => StoreKind::Flat,
            Self::Bucketed(_) => StoreKind::Bucketed,
        }
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new(StoreKind::default())
    }
}

macro_rules! delegate {
    ($self:ident, $store:ident => $body:expr) => {
        match $self {
            PropertyStore::Flat($store) => $body,
            PropertyStore::Bucketed($store) => $body,
        }
    };
}

impl ValueStore for PropertyStore {
    #[inline]
    fn get(&self, key: PropertyKey) -> Option<PropertyValue> {
        delegate!(self, s => s.get(key))
    }

    #[inline]
    fn get_or_set(&mut self, key: PropertyKey, value: PropertyValue) -> SetOutcome {
        delegate!(self, s => s.get_or_set(key, value))
    }

    #[inline]
    fn remove(&mut self, key: PropertyKey) -> Option<PropertyValue> {
        delegate!(self, s => s.remove(key))
    }

    fn clear(&mut self) {
        delegate!(self, s => s.clear());
    }

    #[inline]
    fn len(&self) -> usize {
        delegate!(self, s => s.len())
    }

    fn range(&self, range: KeyRange) -> StoreIter<'_> {
        delegate!(self, s => s.range(range))
    }
}
