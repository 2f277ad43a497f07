// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw property values and their typed views.
//!
//! A [`PropertyValue`] is eight bytes of payload with no type tag. The tag
//! lives in the property's metadata ([`DataType`]); [`PropertyValue::typed`]
//! combines the two into a [`TypedValue`].

use core::fmt;

use crate::reference::{AssetRef, Guid, PrototypeRef};

/// Declared data type of a property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// `0` or `1`.
    Boolean,
    /// `f32` stored in the low 32 bits.
    Real,
    /// `i64`.
    Integer,
    /// A [`PrototypeRef`].
    Prototype,
    /// `f32` derived from a curve; behaves like [`DataType::Real`].
    Curve,
    /// An [`AssetRef`].
    Asset,
    /// An entity id.
    EntityId,
    /// Game time in milliseconds.
    Time,
    /// A [`Guid`].
    Guid,
    /// A region id.
    RegionId,
    /// An [`Int21Vector3`].
    Int21Vector3,
}

impl DataType {
    /// Returns `true` for types that fold arithmetically.
    #[must_use]
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Real | Self::Integer | Self::Curve)
    }

    /// Returns `true` for float-backed types.
    #[must_use]
    #[inline]
    pub const fn is_real(self) -> bool {
        matches!(self, Self::Real | Self::Curve)
    }

    /// Stable single-byte code used by durable storage.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Boolean => 0,
            Self::Real => 1,
            Self::Integer => 2,
            Self::Prototype => 3,
            Self::Curve => 4,
            Self::Asset => 5,
            Self::EntityId => 6,
            Self::Time => 7,
            Self::Guid => 8,
            Self::RegionId => 9,
            Self::Int21Vector3 => 10,
        }
    }

    /// Inverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Boolean,
            1 => Self::Real,
            2 => Self::Integer,
            3 => Self::Prototype,
            4 => Self::Curve,
            5 => Self::Asset,
            6 => Self::EntityId,
            7 => Self::Time,
            8 => Self::Guid,
            9 => Self::RegionId,
            10 => Self::Int21Vector3,
            _ => return None,
        })
    }
}

/// Three signed 21-bit integers packed into one value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Int21Vector3 {
    /// X component.
    pub x: i32,
    /// Y component.
    pub y: i32,
    /// Z component.
    pub z: i32,
}

impl Int21Vector3 {
    /// Smallest representable component.
    pub const MIN: i32 = -(1 << 20);
    /// Largest representable component.
    pub const MAX: i32 = (1 << 20) - 1;

    const MASK: u64 = (1 << 21) - 1;

    /// Creates a vector.
    ///
    /// # Panics
    ///
    /// Panics if a component is outside `MIN..=MAX`.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        assert!(
            x >= Self::MIN && x <= Self::MAX && y >= Self::MIN && y <= Self::MAX,
            "Int21Vector3 component out of range"
        );
        assert!(
            z >= Self::MIN && z <= Self::MAX,
            "Int21Vector3 component out of range"
        );
        Self { x, y, z }
    }

    const fn pack(self) -> u64 {
        (self.x as u64 & Self::MASK)
            | ((self.y as u64 & Self::MASK) << 21)
            | ((self.z as u64 & Self::MASK) << 42)
    }

    const fn unpack(raw: u64) -> Self {
        const fn component(bits: u64) -> i32 {
            // Sign-extend from bit 20.
            #[expect(
                clippy::cast_possible_truncation,
                reason = "a sign-extended 21-bit value fits in i32"
            )]
            let value = (((bits & Int21Vector3::MASK) << 43) as i64 >> 43) as i32;
            value
        }
        Self {
            x: component(raw),
            y: component(raw >> 21),
            z: component(raw >> 42),
        }
    }
}

/// A raw 64-bit property value.
///
/// The interpretation is given by the property's [`DataType`]. Reals occupy
/// the low 32 bits as `f32` bits.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{DataType, PropertyValue, TypedValue};
///
/// let v = PropertyValue::from_real(2.5);
/// assert_eq!(v.as_real(), 2.5);
/// assert_eq!(v.typed(DataType::Real), TypedValue::Real(2.5));
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct PropertyValue(u64);

#[expect(
    clippy::cast_possible_truncation,
    reason = "reals live in the low 32 bits"
)]
impl PropertyValue {
    /// All bits clear: `false`, `0`, `0.0`, or an invalid reference.
    pub const ZERO: Self = Self(0);

    /// Wraps raw bits.
    #[must_use]
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw bits.
    #[must_use]
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Boolean value.
    #[must_use]
    #[inline]
    pub const fn from_bool(value: bool) -> Self {
        Self(value as u64)
    }

    /// Integer value.
    #[must_use]
    #[inline]
    pub const fn from_int(value: i64) -> Self {
        Self(value as u64)
    }

    /// Real value.
    #[must_use]
    #[inline]
    pub const fn from_real(value: f32) -> Self {
        Self(value.to_bits() as u64)
    }

    /// Prototype reference.
    #[must_use]
    #[inline]
    pub const fn from_prototype(value: PrototypeRef) -> Self {
        Self(value.raw())
    }

    /// Asset reference.
    #[must_use]
    #[inline]
    pub const fn from_asset(value: AssetRef) -> Self {
        Self(value.raw())
    }

    /// Stable guid.
    #[must_use]
    #[inline]
    pub const fn from_guid(value: Guid) -> Self {
        Self(value.raw())
    }

    /// Time in milliseconds.
    #[must_use]
    #[inline]
    pub const fn from_time(millis: i64) -> Self {
        Self(millis as u64)
    }

    /// Packed vector.
    #[must_use]
    #[inline]
    pub const fn from_vector(value: Int21Vector3) -> Self {
        Self(value.pack())
    }

    /// Reads as a boolean (any non-zero bit is `true`).
    #[must_use]
    #[inline]
    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    /// Reads as an integer.
    #[must_use]
    #[inline]
    pub const fn as_int(self) -> i64 {
        self.0 as i64
    }

    /// Reads as a real.
    #[must_use]
    #[inline]
    pub const fn as_real(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    /// Reads as a prototype reference.
    #[must_use]
    #[inline]
    pub const fn as_prototype(self) -> PrototypeRef {
        PrototypeRef::new(self.0)
    }

    /// Reads as an asset reference.
    #[must_use]
    #[inline]
    pub const fn as_asset(self) -> AssetRef {
        AssetRef::new(self.0)
    }

    /// Reads as a guid.
    #[must_use]
    #[inline]
    pub const fn as_guid(self) -> Guid {
        Guid::new(self.0)
    }

    /// Reads as a packed vector.
    #[must_use]
    #[inline]
    pub const fn as_vector(self) -> Int21Vector3 {
        Int21Vector3::unpack(self.0)
    }

    /// Interprets the bits as `data_type`.
    #[must_use]
    pub fn typed(self, data_type: DataType) -> TypedValue {
        match data_type {
            DataType::Boolean => TypedValue::Boolean(self.as_bool()),
            DataType::Real => TypedValue::Real(self.as_real()),
            DataType::Integer => TypedValue::Integer(self.as_int()),
            DataType::Prototype => TypedValue::Prototype(self.as_prototype()),
            DataType::Curve => TypedValue::Curve(self.as_real()),
            DataType::Asset => TypedValue::Asset(self.as_asset()),
            DataType::EntityId => TypedValue::EntityId(self.0),
            DataType::Time => TypedValue::Time(self.as_int()),
            DataType::Guid => TypedValue::Guid(self.as_guid()),
            DataType::RegionId => TypedValue::RegionId(self.0),
            DataType::Int21Vector3 => TypedValue::Int21Vector3(self.as_vector()),
        }
    }

    /// Compares two values of `data_type`.
    ///
    /// Reals compare as floats (so `0.0` equals `-0.0`); everything else
    /// compares raw bits.
    #[must_use]
    pub fn same_as(self, other: Self, data_type: DataType) -> bool {
        if data_type.is_real() {
            self.as_real() == other.as_real()
        } else {
            self.0 == other.0
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyValue({:#x})", self.0)
    }
}

/// A property value together with its data type.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TypedValue {
    /// See [`DataType::Boolean`].
    Boolean(bool),
    /// See [`DataType::Real`].
    Real(f32),
    /// See [`DataType::Integer`].
    Integer(i64),
    /// See [`DataType::Prototype`].
    Prototype(PrototypeRef),
    /// See [`DataType::Curve`].
    Curve(f32),
    /// See [`DataType::Asset`].
    Asset(AssetRef),
    /// See [`DataType::EntityId`].
    EntityId(u64),
    /// See [`DataType::Time`].
    Time(i64),
    /// See [`DataType::Guid`].
    Guid(Guid),
    /// See [`DataType::RegionId`].
    RegionId(u64),
    /// See [`DataType::Int21Vector3`].
    Int21Vector3(Int21Vector3),
}

impl TypedValue {
    /// Returns the data type of this value.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Real(_) => DataType::Real,
            Self::Integer(_) => DataType::Integer,
            Self::Prototype(_) => DataType::Prototype,
            Self::Curve(_) => DataType::Curve,
            Self::Asset(_) => DataType::Asset,
            Self::EntityId(_) => DataType::EntityId,
            Self::Time(_) => DataType::Time,
            Self::Guid(_) => DataType::Guid,
            Self::RegionId(_) => DataType::RegionId,
            Self::Int21Vector3(_) => DataType::Int21Vector3,
        }
    }
}

impl From<TypedValue> for PropertyValue {
    fn from(value: TypedValue) -> Self {
        match value {
            TypedValue::Boolean(v) => Self::from_bool(v),
            TypedValue::Real(v) | TypedValue::Curve(v) => Self::from_real(v),
            TypedValue::Integer(v) | TypedValue::Time(v) => Self::from_int(v),
            TypedValue::Prototype(v) => Self::from_prototype(v),
            TypedValue::Asset(v) => Self::from_asset(v),
            TypedValue::EntityId(v) | TypedValue::RegionId(v) => Self(v),
            TypedValue::Guid(v) => Self::from_guid(v),
            TypedValue::Int21Vector3(v) => Self::from_vector(v),
        }
    }
}

impl From<bool> for PropertyValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

impl From<i64> for PropertyValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::from_int(value)
    }
}

impl From<i32> for PropertyValue {
    #[inline]
    fn from(value: i32) -> Self {
        Self::from_int(i64::from(value))
    }
}

impl From<f32> for PropertyValue {
    #[inline]
    fn from(value: f32) -> Self {
        Self::from_real(value)
    }
}

impl From<PrototypeRef> for PropertyValue {
    #[inline]
    fn from(value: PrototypeRef) -> Self {
        Self::from_prototype(value)
    }
}

impl From<AssetRef> for PropertyValue {
    #[inline]
    fn from(value: AssetRef) -> Self {
        Self::from_asset(value)
    }
}
