// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tags and packed property keys.
//!
//! A [`PropertyKey`] is a single `u64`: the high [`TAG_BITS`] bits hold the
//! [`PropertyTag`], the low [`PARAM_BITS`] bits hold up to [`MAX_PARAMS`]
//! parameters whose widths come from the tag's metadata (see
//! [`PropertyInfo::encode_key`](crate::PropertyInfo::encode_key)).

use core::fmt;

/// Number of bits holding the tag in a packed key.
pub const TAG_BITS: u32 = 11;

/// Number of bits available to parameters in a packed key.
pub const PARAM_BITS: u32 = 53;

/// Maximum number of parameters a key can carry.
pub const MAX_PARAMS: usize = 4;

const PARAM_MASK: u64 = (1 << PARAM_BITS) - 1;

/// Identifies a semantic property ("MaxHealth", "Rank", ...).
///
/// Tags are assigned by [`PropertyRegistry::register`](crate::PropertyRegistry::register)
/// in registration order and fit in [`TAG_BITS`] bits.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::PropertyTag;
///
/// let tag = PropertyTag::new(42);
/// assert_eq!(tag.index(), 42);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyTag(u16);

impl PropertyTag {
    /// Number of distinct tags a key can address.
    pub const COUNT: usize = 1 << TAG_BITS;

    /// Creates a tag from its index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit in [`TAG_BITS`] bits.
    #[must_use]
    #[inline]
    pub const fn new(index: u16) -> Self {
        assert!(
            (index as usize) < Self::COUNT,
            "property tag must fit in 11 bits"
        );
        Self(index)
    }

    /// Returns the index of this tag.
    #[must_use]
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyTag").field(&self.0).finish()
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyTag({})", self.0)
    }
}

/// A packed (tag, parameters) identifier.
///
/// Equality and ordering are those of the packed integer, so all keys of one
/// tag sort together, and the parameterless key of a tag sorts first in its
/// group.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{PropertyKey, PropertyTag};
///
/// let key = PropertyKey::new(PropertyTag::new(3));
/// assert_eq!(key.tag(), PropertyTag::new(3));
/// assert!(!key.has_params());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyKey(u64);

impl PropertyKey {
    /// Returns the parameterless key for `tag`.
    #[must_use]
    #[inline]
    pub const fn new(tag: PropertyTag) -> Self {
        Self((tag.0 as u64) << PARAM_BITS)
    }

    /// Rebuilds a key from its packed form.
    #[must_use]
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the packed form.
    #[must_use]
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the tag of this key.
    #[must_use]
    #[inline]
    pub const fn tag(self) -> PropertyTag {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "only TAG_BITS bits remain after the shift"
        )]
        let index = (self.0 >> PARAM_BITS) as u16;
        PropertyTag(index)
    }

    /// Returns `true` if any parameter bit is set.
    #[must_use]
    #[inline]
    pub const fn has_params(self) -> bool {
        self.0 & PARAM_MASK != 0
    }

    /// Returns the raw parameter field (the low [`PARAM_BITS`] bits).
    #[must_use]
    #[inline]
    pub const fn param_bits(self) -> u64 {
        self.0 & PARAM_MASK
    }

    /// Returns the packed form with its bit order reversed.
    ///
    /// Parameterless keys only have high bits set, so the reversed form is a
    /// small integer and encodes as a short varint.
    #[must_use]
    #[inline]
    pub const fn reversed(self) -> u64 {
        self.0.reverse_bits()
    }

    /// Inverse of [`reversed`](Self::reversed).
    #[must_use]
    #[inline]
    pub const fn from_reversed(bits: u64) -> Self {
        Self(bits.reverse_bits())
    }
}

impl From<PropertyTag> for PropertyKey {
    #[inline]
    fn from(tag: PropertyTag) -> Self {
        Self::new(tag)
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyKey")
            .field("tag", &self.tag().0)
            .field("params", &format_args!("{:#x}", self.param_bits()))
            .finish()
    }
}

/// An inclusive range of packed keys.
///
/// Used for tag-grouped iteration: [`KeyRange::tag`] covers every key of one
/// tag whatever its parameters are.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyRange {
    start: PropertyKey,
    end: PropertyKey,
}

impl KeyRange {
    /// Every key.
    pub const ALL: Self = Self {
        start: PropertyKey(0),
        end: PropertyKey(u64::MAX),
    };

    /// Creates a range covering `start..=end`.
    #[must_use]
    #[inline]
    pub const fn new(start: PropertyKey, end: PropertyKey) -> Self {
        Self { start, end }
    }

    /// Covers every key whose tag is `tag`.
    #[must_use]
    #[inline]
    pub const fn tag(tag: PropertyTag) -> Self {
        let start = PropertyKey::new(tag);
        Self {
            start,
            end: PropertyKey(start.0 | PARAM_MASK),
        }
    }

    /// First key of the range.
    #[must_use]
    #[inline]
    pub const fn start(self) -> PropertyKey {
        self.start
    }

    /// Last key of the range.
    #[must_use]
    #[inline]
    pub const fn end(self) -> PropertyKey {
        self.end
    }

    /// Returns `true` if `key` lies in the range.
    #[must_use]
    #[inline]
    pub fn contains(self, key: PropertyKey) -> bool {
        self.start <= key && key <= self.end
    }
}
