// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference identifiers and their resolution.
//!
//! Game data hands out transient numeric ids ([`PrototypeRef`], [`AssetRef`],
//! [`CurveRef`]) that may change between data versions, plus version-stable
//! [`Guid`]s. Key packing needs a third form: small dense enumerants that fit
//! a parameter's bit width. [`ReferenceResolver`] converts between all three.

use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

macro_rules! reference_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            /// The "no reference" id.
            pub const INVALID: Self = Self(0);

            /// Wraps a raw id.
            #[must_use]
            #[inline]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id.
            #[must_use]
            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Returns `false` for [`Self::INVALID`].
            #[must_use]
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

reference_id!(
    /// Transient id of a game-data prototype.
    PrototypeRef
);
reference_id!(
    /// Transient id of an asset.
    AssetRef
);
reference_id!(
    /// Id of a curve evaluated by a [`CurveSource`](crate::CurveSource).
    CurveRef
);
reference_id!(
    /// Version-stable identifier used by durable storage.
    Guid
);

/// Names the enumeration a reference parameter is packed against.
///
/// Two parameters with the same domain share enumerants; the loader decides
/// what a domain means (a prototype family, an asset type, ...).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct EnumDomain(pub u32);

impl EnumDomain {
    /// Domain used for prototype-typed property values on the fast wire path.
    pub const PROTOTYPES: Self = Self(0);
}

/// Converts between transient ids, stable guids and dense enumerants.
///
/// Implementations only see valid references; callers map
/// [`INVALID`](PrototypeRef::INVALID) to guid 0 and enumerant 0 themselves.
pub trait ReferenceResolver {
    /// Returns the stable guid of a prototype.
    fn prototype_guid(&self, prototype: PrototypeRef) -> Option<Guid>;
    /// Returns the current prototype for a stable guid.
    fn prototype_from_guid(&self, guid: Guid) -> Option<PrototypeRef>;
    /// Returns the stable guid of an asset.
    fn asset_guid(&self, asset: AssetRef) -> Option<Guid>;
    /// Returns the current asset for a stable guid.
    fn asset_from_guid(&self, guid: Guid) -> Option<AssetRef>;
    /// Returns the dense enumerant of `prototype` within `domain`.
    fn prototype_to_enum(&self, domain: EnumDomain, prototype: PrototypeRef) -> Option<u64>;
    /// Returns the prototype behind an enumerant of `domain`.
    fn enum_to_prototype(&self, domain: EnumDomain, value: u64) -> Option<PrototypeRef>;
    /// Returns the dense enumerant of `asset` within `domain`.
    fn asset_to_enum(&self, domain: EnumDomain, asset: AssetRef) -> Option<u64>;
    /// Returns the asset behind an enumerant of `domain`.
    fn enum_to_asset(&self, domain: EnumDomain, value: u64) -> Option<AssetRef>;
}

/// In-memory [`ReferenceResolver`] backed by hash tables.
///
/// Enumerants start at 1 within each domain, in the order references were
/// enumerated; 0 always means "no reference".
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{EnumDomain, Guid, PrototypeRef, ReferenceResolver, ReferenceTable};
///
/// const POWERS: EnumDomain = EnumDomain(3);
///
/// let mut table = ReferenceTable::new();
/// table.add_prototype(PrototypeRef::new(0x99), Guid::new(0x1234));
/// table.enumerate_prototypes(POWERS, [PrototypeRef::new(0x98), PrototypeRef::new(0x99)]);
///
/// assert_eq!(table.prototype_guid(PrototypeRef::new(0x99)), Some(Guid::new(0x1234)));
/// assert_eq!(table.prototype_to_enum(POWERS, PrototypeRef::new(0x99)), Some(2));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReferenceTable {
    prototype_guids: HashMap<PrototypeRef, Guid>,
    guid_prototypes: HashMap<Guid, PrototypeRef>,
    asset_guids: HashMap<AssetRef, Guid>,
    guid_assets: HashMap<Guid, AssetRef>,
    prototype_enums: HashMap<EnumDomain, Enumeration<PrototypeRef>>,
    asset_enums: HashMap<EnumDomain, Enumeration<AssetRef>>,
}

#[derive(Clone, Debug)]
struct Enumeration<R> {
    values: Vec<R>,
    lookup: HashMap<R, u64>,
}

impl<R> Default for Enumeration<R> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<R: Copy + Eq + core::hash::Hash> Enumeration<R> {
    fn push(&mut self, value: R) {
        if self.lookup.contains_key(&value) {
            return;
        }
        self.values.push(value);
        self.lookup.insert(value, self.values.len() as u64);
    }

    fn to_enum(&self, value: R) -> Option<u64> {
        self.lookup.get(&value).copied()
    }

    fn from_enum(&self, value: u64) -> Option<R> {
        let index = usize::try_from(value.checked_sub(1)?).ok()?;
        self.values.get(index).copied()
    }
}

impl ReferenceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the stable guid of a prototype.
    pub fn add_prototype(&mut self, prototype: PrototypeRef, guid: Guid) {
        self.prototype_guids.insert(prototype, guid);
        self.guid_prototypes.insert(guid, prototype);
    }

    /// Records the stable guid of an asset.
    pub fn add_asset(&mut self, asset: AssetRef, guid: Guid) {
        self.asset_guids.insert(asset, guid);
        self.guid_assets.insert(guid, asset);
    }

    /// Appends prototypes to `domain`'s enumeration. Duplicates are skipped.
    pub fn enumerate_prototypes(
        &mut self,
        domain: EnumDomain,
        prototypes: impl IntoIterator<Item = PrototypeRef>,
    ) {
        let enumeration = self.prototype_enums.entry(domain).or_default();
        for prototype in prototypes {
            enumeration.push(prototype);
        }
    }

    /// Appends assets to `domain`'s enumeration. Duplicates are skipped.
    pub fn enumerate_assets(
        &mut self,
        domain: EnumDomain,
        assets: impl IntoIterator<Item = AssetRef>,
    ) {
        let enumeration = self.asset_enums.entry(domain).or_default();
        for asset in assets {
            enumeration.push(asset);
        }
    }
}

impl ReferenceResolver for ReferenceTable {
    fn prototype_guid(&self, prototype: PrototypeRef) -> Option<Guid> {
        self.prototype_guids.get(&prototype).copied()
    }

    fn prototype_from_guid(&self, guid: Guid) -> Option<PrototypeRef> {
        self.guid_prototypes.get(&guid).copied()
    }

    fn asset_guid(&self, asset: AssetRef) -> Option<Guid> {
        self.asset_guids.get(&asset).copied()
    }

    fn asset_from_guid(&self, guid: Guid) -> Option<AssetRef> {
        self.guid_assets.get(&guid).copied()
    }

    fn prototype_to_enum(&self, domain: EnumDomain, prototype: PrototypeRef) -> Option<u64> {
        self.prototype_enums.get(&domain)?.to_enum(prototype)
    }

    fn enum_to_prototype(&self, domain: EnumDomain, value: u64) -> Option<PrototypeRef> {
        self.prototype_enums.get(&domain)?.from_enum(value)
    }

    fn asset_to_enum(&self, domain: EnumDomain, asset: AssetRef) -> Option<u64> {
        self.asset_enums.get(&domain)?.to_enum(asset)
    }

    fn enum_to_asset(&self, domain: EnumDomain, value: u64) -> Option<AssetRef> {
        self.asset_enums.get(&domain)?.from_enum(value)
    }
}
