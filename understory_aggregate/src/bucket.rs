// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tag-bucketed storage strategy.
//!
//! Most properties are set without parameters, so each tag starts with a
//! single inline value. The first parameterized key of a tag promotes its slot
//! to a sorted vector and migrates the inline value into it. Promoted slots
//! stay promoted.
//!
//! Slots live in a `SmallVec` sorted by tag and are found by binary search,
//! so nodes with a handful of tags never touch the heap for the slot table.

use alloc::vec;
use alloc::vec::Vec;
use core::slice;

use smallvec::SmallVec;

use crate::key::{KeyRange, PropertyKey, PropertyTag};
use crate::store::{SetOutcome, StoreIter, ValueStore};
use crate::value::PropertyValue;

const INLINE_SLOTS: usize = 8;

#[derive(Clone, Debug)]
enum Slot {
    /// Value of the parameterless key.
    Inline(PropertyValue),
    /// Every key of the tag, sorted.
    Sorted(Vec<(PropertyKey, PropertyValue)>),
}

/// One slot per tag with inline single values.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{BucketStore, PropertyKey, PropertyTag, PropertyValue, ValueStore};
///
/// let tag = PropertyTag::new(4);
/// let mut store = BucketStore::new();
/// store.get_or_set(PropertyKey::new(tag), PropertyValue::from_int(1));
/// assert!(!store.is_promoted(tag));
///
/// let keyed = PropertyKey::from_raw(PropertyKey::new(tag).raw() | 1);
/// store.get_or_set(keyed, PropertyValue::from_int(2));
/// assert!(store.is_promoted(tag));
/// assert_eq!(store.get(PropertyKey::new(tag)), Some(PropertyValue::from_int(1)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct BucketStore {
    slots: SmallVec<[(PropertyTag, Slot); INLINE_SLOTS]>,
    len: usize,
}

impl BucketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags with a slot.
    #[must_use]
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the slot of `tag` holds a sorted vector.
    #[must_use]
    pub fn is_promoted(&self, tag: PropertyTag) -> bool {
        self.find_slot(tag)
            .is_ok_and(|idx| matches!(self.slots[idx].1, Slot::Sorted(_)))
    }

    #[inline]
    fn find_slot(&self, tag: PropertyTag) -> Result<usize, usize> {
        self.slots.binary_search_by_key(&tag, |(t, _)| *t)
    }
}

impl ValueStore for BucketStore {
    fn get(&self, key: PropertyKey) -> Option<PropertyValue> {
        let idx = self.find_slot(key.tag()).ok()?;
        match &self.slots[idx].1 {
            Slot::Inline(value) => (!key.has_params()).then_some(*value),
            Slot::Sorted(entries) => entries
                .binary_search_by_key(&key, |(k, _)| *k)
                .ok()
                .map(|pos| entries[pos].1),
        }
    }

    fn get_or_set(&mut self, key: PropertyKey, value: PropertyValue) -> SetOutcome {
        let tag = key.tag();
        let idx = match self.find_slot(tag) {
            Ok(idx) => idx,
            Err(idx) => {
                let slot = if key.has_params() {
                    Slot::Sorted(vec![(key, value)])
                } else {
                    Slot::Inline(value)
                };
                self.slots.insert(idx, (tag, slot));
                self.len += 1;
                return SetOutcome::new(None, value);
            }
        };

        let slot = &mut self.slots[idx].1;
        let previous = match slot {
            Slot::Inline(current) if !key.has_params() => Some(core::mem::replace(current, value)),
            Slot::Inline(current) => {
                let inline = *current;
                // The parameterless key sorts before every other key of the tag.
                *slot = Slot::Sorted(vec![(PropertyKey::new(tag), inline), (key, value)]);
                None
            }
            Slot::Sorted(entries) => match entries.binary_search_by_key(&key, |(k, _)| *k) {
                Ok(pos) => Some(core::mem::replace(&mut entries[pos].1, value)),
                Err(pos) => {
                    entries.insert(pos, (key, value));
                    None
                }
            },
        };
        if previous.is_none() {
            self.len += 1;
        }
        SetOutcome::new(previous, value)
    }

    fn remove(&mut self, key: PropertyKey) -> Option<PropertyValue> {
        let idx = self.find_slot(key.tag()).ok()?;
        let removed = match &mut self.slots[idx].1 {
            Slot::Inline(_) if key.has_params() => None,
            Slot::Inline(value) => {
                let value = *value;
                self.slots.remove(idx);
                Some(value)
            }
            Slot::Sorted(entries) => entries
                .binary_search_by_key(&key, |(k, _)| *k)
                .ok()
                .map(|pos| entries.remove(pos).1),
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.len = 0;
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn range(&self, range: KeyRange) -> StoreIter<'_> {
        let first = self
            .slots
            .partition_point(|(tag, _)| *tag < range.start().tag());
        StoreIter::bucket(BucketIter {
            slots: self.slots[first..].iter(),
            current: slice::Iter::default(),
            range,
        })
    }
}

/// Lazy ordered iterator over a [`BucketStore`] range.
pub(crate) struct BucketIter<'a> {
    slots: slice::Iter<'a, (PropertyTag, Slot)>,
    current: slice::Iter<'a, (PropertyKey, PropertyValue)>,
    range: KeyRange,
}

impl BucketIter<'_> {
    fn finish(&mut self) {
        self.slots = slice::Iter::default();
        self.current = slice::Iter::default();
    }
}

impl Iterator for BucketIter<'_> {
    type Item = (PropertyKey, PropertyValue);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(&(key, value)) = self.current.next() {
                if key > self.range.end() {
                    self.finish();
                    return None;
                }
                if self.range.contains(key) {
                    return Some((key, value));
                }
                continue;
            }

            let (tag, slot) = self.slots.next()?;
            match slot {
                Slot::Inline(value) => {
                    let key = PropertyKey::new(*tag);
                    if key > self.range.end() {
                        self.finish();
                        return None;
                    }
                    if self.range.contains(key) {
                        return Some((key, *value));
                    }
                }
                Slot::Sorted(entries) => {
                    let start = entries.partition_point(|(k, _)| *k < self.range.start());
                    self.current = entries[start..].iter();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u16, params: u64) -> PropertyKey {
        PropertyKey::from_raw(PropertyKey::new(PropertyTag::new(tag)).raw() | params)
    }

    fn v(raw: u64) -> PropertyValue {
        PropertyValue::from_raw(raw)
    }

    #[test]
    fn inline_until_parameterized() {
        let mut store = BucketStore::new();
        store.get_or_set(key(2, 0), v(1));
        assert!(!store.is_promoted(PropertyTag::new(2)));
        assert_eq!(store.get(key(2, 5)), None);

        let outcome = store.get_or_set(key(2, 5), v(2));
        assert!(outcome.was_added());
        assert!(store.is_promoted(PropertyTag::new(2)));
        assert_eq!(store.get(key(2, 0)), Some(v(1)));
        assert_eq!(store.get(key(2, 5)), Some(v(2)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.slot_count(), 1);
    }

    #[test]
    fn promoted_slots_are_not_demoted() {
        let mut store = BucketStore::new();
        store.get_or_set(key(2, 5), v(2));
        assert!(store.is_promoted(PropertyTag::new(2)));
        assert_eq!(store.remove(key(2, 5)), Some(v(2)));
        assert!(store.is_empty());
        assert!(store.is_promoted(PropertyTag::new(2)));

        store.get_or_set(key(2, 0), v(3));
        assert!(store.is_promoted(PropertyTag::new(2)));
        assert_eq!(store.get(key(2, 0)), Some(v(3)));
    }

    #[test]
    fn removing_inline_value_frees_slot() {
        let mut store = BucketStore::new();
        store.get_or_set(key(1, 0), v(1));
        store.get_or_set(key(3, 0), v(3));
        assert_eq!(store.remove(key(1, 7)), None);
        assert_eq!(store.remove(key(1, 0)), Some(v(1)));
        assert_eq!(store.slot_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn range_skips_empty_and_foreign_slots() {
        let mut store = BucketStore::new();
        store.get_or_set(key(1, 1), v(11));
        store.remove(key(1, 1));
        store.get_or_set(key(2, 0), v(20));
        store.get_or_set(key(2, 2), v(22));
        store.get_or_set(key(5, 0), v(50));

        let all: Vec<_> = store.iter().collect();
        assert_eq!(
            all,
            [(key(2, 0), v(20)), (key(2, 2), v(22)), (key(5, 0), v(50))]
        );

        let narrow: Vec<_> = store.range(KeyRange::new(key(2, 1), key(2, 9))).collect();
        assert_eq!(narrow, [(key(2, 2), v(22))]);
    }
}
