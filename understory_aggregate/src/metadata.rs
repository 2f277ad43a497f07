// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-tag property metadata.
//!
//! This module provides [`PropertyInfo`], the finalized description of one
//! property tag, and [`PropertyInfoBuilder`] for constructing it. Parameter
//! layouts are computed when the builder is registered, so every key of a
//! registered tag can be packed and unpacked without further setup.

use core::fmt;

use smallvec::SmallVec;

use crate::aggregation::AggregationMethod;
use crate::key::{KeyRange, MAX_PARAMS, PARAM_BITS, PropertyKey, PropertyTag};
use crate::reference::{AssetRef, EnumDomain, Guid, PrototypeRef};
use crate::value::{DataType, PropertyValue};

bitflags::bitflags! {
    /// Which storage and transport paths a property takes part in.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u8 {
        /// Written by the durable codec.
        const PERSISTENT = 1 << 0;
        /// Written by the fast codec in replication mode.
        const REPLICATED = 1 << 1;
        /// Written by the fast codec in migration mode.
        const TRANSFERRED = 1 << 2;
    }
}

/// What a key parameter refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// A plain integer.
    Integer,
    /// An asset, packed as its enumerant in the given domain.
    Asset(EnumDomain),
    /// A prototype, packed as its enumerant in the given domain.
    Prototype(EnumDomain),
}

impl ParamKind {
    /// Stable single-byte code used by durable storage.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Integer => 0,
            Self::Asset(_) => 1,
            Self::Prototype(_) => 2,
        }
    }
}

/// Bit layout of one key parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamLayout {
    kind: ParamKind,
    max: u64,
    bit_width: u32,
    offset: u32,
}

impl ParamLayout {
    fn new(kind: ParamKind, max: u64, offset: u32) -> Self {
        Self {
            kind,
            max,
            bit_width: width_for(max),
            offset,
        }
    }

    /// What the parameter refers to.
    #[must_use]
    #[inline]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Largest encodable value.
    #[must_use]
    #[inline]
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of bits the parameter occupies.
    #[must_use]
    #[inline]
    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    /// Position of the parameter's least significant bit in the packed key.
    #[must_use]
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    fn mask(&self) -> u64 {
        if self.bit_width == 0 {
            0
        } else {
            u64::MAX >> (64 - self.bit_width)
        }
    }
}

/// `floor(log2(max)) + 1`, or 0 for `max == 0`.
#[inline]
const fn width_for(max: u64) -> u32 {
    64 - max.leading_zeros()
}

/// A key parameter before packing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyParam {
    /// A plain integer.
    Integer(u64),
    /// An asset reference.
    Asset(AssetRef),
    /// A prototype reference.
    Prototype(PrototypeRef),
}

/// Inclusive clamp bounds, interpreted with the property's data type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClampBounds {
    /// Lower bound.
    pub min: PropertyValue,
    /// Upper bound.
    pub max: PropertyValue,
}

/// Error raised when a property definition cannot be registered.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Another property already uses this name.
    #[error("property `{name}` is already registered")]
    DuplicateName {
        /// The duplicated name.
        name: &'static str,
    },
    /// Another property already uses this stable guid.
    #[error("property `{name}` reuses stable guid {guid:?}")]
    DuplicateGuid {
        /// The property being registered.
        name: &'static str,
        /// The duplicated guid.
        guid: Guid,
    },
    /// Every tag is in use.
    #[error("cannot register `{name}`: all {} property tags are in use", PropertyTag::COUNT)]
    TooManyTags {
        /// The property being registered.
        name: &'static str,
    },
    /// A key carries at most four parameters.
    #[error("property `{name}` declares {count} parameters (max {MAX_PARAMS})")]
    TooManyParams {
        /// The property being registered.
        name: &'static str,
        /// Number of declared parameters.
        count: usize,
    },
    /// The parameters need more than the available bits.
    #[error("parameters of `{name}` need {bits} bits (max {PARAM_BITS})")]
    ParamBitOverflow {
        /// The property being registered.
        name: &'static str,
        /// Total width requested.
        bits: u32,
    },
    /// The aggregation method does not apply to the data type.
    #[error("property `{name}` cannot aggregate {data_type:?} values with {method:?}")]
    UnsupportedAggregation {
        /// The property being registered.
        name: &'static str,
        /// Requested method.
        method: AggregationMethod,
        /// Declared data type.
        data_type: DataType,
    },
    /// Clamp bounds are reversed or do not apply to the data type.
    #[error("property `{name}` has invalid clamp bounds")]
    InvalidClamp {
        /// The property being registered.
        name: &'static str,
    },
}

/// Error raised when a key cannot be packed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// No property is registered with this tag.
    #[error("unknown property tag {tag:?}")]
    UnknownTag {
        /// The tag.
        tag: PropertyTag,
    },
    /// More parameters were given than the tag declares.
    #[error("{tag:?} takes {expected} parameters, got {given}")]
    ParamCount {
        /// The tag.
        tag: PropertyTag,
        /// Parameters supplied.
        given: usize,
        /// Parameters declared.
        expected: usize,
    },
    /// A parameter exceeds its declared maximum.
    #[error("parameter {index} of {tag:?} is {value}, above its maximum {max}")]
    ParamOverflow {
        /// The tag.
        tag: PropertyTag,
        /// Parameter position.
        index: usize,
        /// Supplied value.
        value: u64,
        /// Declared maximum.
        max: u64,
    },
    /// A parameter of the wrong kind was supplied.
    #[error("parameter {index} of {tag:?} has the wrong kind")]
    ParamKind {
        /// The tag.
        tag: PropertyTag,
        /// Parameter position.
        index: usize,
    },
    /// A reference parameter has no enumerant in its domain.
    #[error("parameter {index} of {tag:?} does not resolve to an enumerant")]
    Unresolved {
        /// The tag.
        tag: PropertyTag,
        /// Parameter position.
        index: usize,
    },
}

/// Finalized metadata of one property tag.
///
/// Created by [`PropertyRegistry::register`](crate::PropertyRegistry::register)
/// from a [`PropertyInfoBuilder`].
#[derive(Clone, Debug)]
pub struct PropertyInfo {
    tag: PropertyTag,
    name: &'static str,
    data_type: DataType,
    default: PropertyValue,
    aggregation: AggregationMethod,
    clamp: Option<ClampBounds>,
    truncate_to_int: bool,
    params: SmallVec<[ParamLayout; MAX_PARAMS]>,
    flags: PropertyFlags,
    guid: Guid,
    version: u32,
}

impl PropertyInfo {
    /// The tag this metadata describes.
    #[must_use]
    #[inline]
    pub fn tag(&self) -> PropertyTag {
        self.tag
    }

    /// Registered name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared data type.
    #[must_use]
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Value reported when a key has no aggregate value.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> PropertyValue {
        self.default
    }

    /// How child values fold into a parent.
    #[must_use]
    #[inline]
    pub fn aggregation(&self) -> AggregationMethod {
        self.aggregation
    }

    /// Clamp bounds, if any.
    #[must_use]
    #[inline]
    pub fn clamp(&self) -> Option<ClampBounds> {
        self.clamp
    }

    /// Whether real values are floored before being stored.
    #[must_use]
    #[inline]
    pub fn truncate_to_int(&self) -> bool {
        self.truncate_to_int
    }

    /// Number of key parameters.
    #[must_use]
    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Layout of parameter `index`.
    #[must_use]
    #[inline]
    pub fn param_layout(&self, index: usize) -> Option<&ParamLayout> {
        self.params.get(index)
    }

    /// Every parameter layout, most significant first.
    #[must_use]
    #[inline]
    pub fn params(&self) -> &[ParamLayout] {
        &self.params
    }

    /// Storage and transport flags.
    #[must_use]
    #[inline]
    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    /// Stable guid used by durable storage.
    #[must_use]
    #[inline]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Data version stamp written next to durable entries.
    #[must_use]
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns `true` if values of this tag come from curves.
    #[must_use]
    #[inline]
    pub fn is_curve_property(&self) -> bool {
        self.data_type == DataType::Curve
    }

    /// Default value of a curve property as a real.
    #[must_use]
    pub fn curve_default(&self) -> Option<f32> {
        self.is_curve_property().then(|| self.default.as_real())
    }

    /// Packs `params` into a key of this tag.
    ///
    /// Missing trailing parameters are 0.
    ///
    /// # Errors
    ///
    /// [`KeyError::ParamCount`] when more parameters are given than declared,
    /// [`KeyError::ParamOverflow`] when a parameter exceeds its maximum.
    pub fn encode_key(&self, params: &[u64]) -> Result<PropertyKey, KeyError> {
        if params.len() > self.params.len() {
            return Err(KeyError::ParamCount {
                tag: self.tag,
                given: params.len(),
                expected: self.params.len(),
            });
        }
        let mut raw = PropertyKey::new(self.tag).raw();
        for (index, (&value, layout)) in params.iter().zip(&self.params).enumerate() {
            if value > layout.max {
                return Err(KeyError::ParamOverflow {
                    tag: self.tag,
                    index,
                    value,
                    max: layout.max,
                });
            }
            if layout.bit_width > 0 {
                raw |= value << layout.offset;
            }
        }
        Ok(PropertyKey::from_raw(raw))
    }

    /// Unpacks the parameters of `key`. Unused slots are 0.
    ///
    /// The tag of `key` is not checked.
    #[must_use]
    pub fn decode_key(&self, key: PropertyKey) -> [u64; MAX_PARAMS] {
        let mut out = [0; MAX_PARAMS];
        for (slot, layout) in out.iter_mut().zip(&self.params) {
            if layout.bit_width > 0 {
                *slot = (key.raw() >> layout.offset) & layout.mask();
            }
        }
        out
    }

    /// Range of keys of this tag whose first parameter is `param0`.
    ///
    /// # Errors
    ///
    /// [`KeyError::ParamCount`] when the tag has no parameters,
    /// [`KeyError::ParamOverflow`] when `param0` exceeds its maximum.
    pub fn param0_range(&self, param0: u64) -> Result<KeyRange, KeyError> {
        let Some(first) = self.params.first() else {
            return Err(KeyError::ParamCount {
                tag: self.tag,
                given: 1,
                expected: 0,
            });
        };
        let start = self.encode_key(&[param0])?;
        let low_bits = if first.offset == 0 {
            0
        } else {
            u64::MAX >> (64 - first.offset)
        };
        Ok(KeyRange::new(
            start,
            PropertyKey::from_raw(start.raw() | low_bits),
        ))
    }
}

/// Builder for [`PropertyInfo`].
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{AggregationMethod, DataType, PropertyInfoBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let rank = registry
///     .register(
///         "PowerRank",
///         PropertyInfoBuilder::new(DataType::Integer)
///             .aggregate(AggregationMethod::Max)
///             .clamp_int(0, 20)
///             .integer_param(255),
///     )
///     .unwrap();
///
/// let info = registry.get(rank).unwrap();
/// assert_eq!(info.param_count(), 1);
/// assert_eq!(info.param_layout(0).unwrap().bit_width(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct PropertyInfoBuilder {
    data_type: DataType,
    default: PropertyValue,
    aggregation: AggregationMethod,
    clamp: Option<ClampBounds>,
    truncate_to_int: bool,
    params: SmallVec<[(ParamKind, u64); MAX_PARAMS]>,
    flags: PropertyFlags,
    guid: Guid,
    version: u32,
}

impl PropertyInfoBuilder {
    /// Starts a definition for values of `data_type`.
    ///
    /// Defaults: value 0, [`AggregationMethod::None`], no clamp, no
    /// parameters, no flags, invalid guid, version 0.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            default: PropertyValue::ZERO,
            aggregation: AggregationMethod::None,
            clamp: None,
            truncate_to_int: false,
            params: SmallVec::new(),
            flags: PropertyFlags::empty(),
            guid: Guid::INVALID,
            version: 0,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<PropertyValue>) -> Self {
        self.default = value.into();
        self
    }

    /// Sets the aggregation method.
    #[must_use]
    pub fn aggregate(mut self, method: AggregationMethod) -> Self {
        self.aggregation = method;
        self
    }

    /// Clamps integer values to `min..=max`.
    #[must_use]
    pub fn clamp_int(mut self, min: i64, max: i64) -> Self {
        self.clamp = Some(ClampBounds {
            min: PropertyValue::from_int(min),
            max: PropertyValue::from_int(max),
        });
        self
    }

    /// Clamps real values to `min..=max`.
    #[must_use]
    pub fn clamp_real(mut self, min: f32, max: f32) -> Self {
        self.clamp = Some(ClampBounds {
            min: PropertyValue::from_real(min),
            max: PropertyValue::from_real(max),
        });
        self
    }

    /// Floors real values before they are stored.
    #[must_use]
    pub fn truncate_to_int(mut self) -> Self {
        self.truncate_to_int = true;
        self
    }

    /// Appends an integer parameter accepting `0..=max`.
    #[must_use]
    pub fn integer_param(mut self, max: u64) -> Self {
        self.params.push((ParamKind::Integer, max));
        self
    }

    /// Appends an asset parameter; `max` is the largest enumerant in `domain`.
    #[must_use]
    pub fn asset_param(mut self, domain: EnumDomain, max: u64) -> Self {
        self.params.push((ParamKind::Asset(domain), max));
        self
    }

    /// Appends a prototype parameter; `max` is the largest enumerant in `domain`.
    #[must_use]
    pub fn prototype_param(mut self, domain: EnumDomain, max: u64) -> Self {
        self.params.push((ParamKind::Prototype(domain), max));
        self
    }

    /// Sets the storage and transport flags.
    #[must_use]
    pub fn flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the stable guid used by durable storage.
    #[must_use]
    pub fn guid(mut self, guid: Guid) -> Self {
        self.guid = guid;
        self
    }

    /// Sets the data version stamp.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Validates the definition and computes the parameter layout.
    pub(crate) fn finalize(
        self,
        tag: PropertyTag,
        name: &'static str,
    ) -> Result<PropertyInfo, ConfigError> {
        if self.params.len() > MAX_PARAMS {
            return Err(ConfigError::TooManyParams {
                name,
                count: self.params.len(),
            });
        }
        let bits: u32 = self.params.iter().map(|&(_, max)| width_for(max)).sum();
        if bits > PARAM_BITS {
            return Err(ConfigError::ParamBitOverflow { name, bits });
        }
        if !self.aggregation.supports(self.data_type) {
            return Err(ConfigError::UnsupportedAggregation {
                name,
                method: self.aggregation,
                data_type: self.data_type,
            });
        }
        if let Some(bounds) = self.clamp
            && !clamp_is_valid(bounds, self.data_type)
        {
            return Err(ConfigError::InvalidClamp { name });
        }

        let mut offset = PARAM_BITS;
        let params = self
            .params
            .iter()
            .map(|&(kind, max)| {
                offset -= width_for(max);
                ParamLayout::new(kind, max, offset)
            })
            .collect();

        let mut info = PropertyInfo {
            tag,
            name,
            data_type: self.data_type,
            default: self.default,
            aggregation: self.aggregation,
            clamp: self.clamp,
            truncate_to_int: self.truncate_to_int,
            params,
            flags: self.flags,
            guid: self.guid,
            version: self.version,
        };
        info.default = info.normalize(info.default);
        Ok(info)
    }
}

fn clamp_is_valid(bounds: ClampBounds, data_type: DataType) -> bool {
    match data_type {
        DataType::Integer => bounds.min.as_int() <= bounds.max.as_int(),
        DataType::Real | DataType::Curve => bounds.min.as_real() <= bounds.max.as_real(),
        _ => false,
    }
}

impl fmt::Display for PropertyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.name, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalize(builder: PropertyInfoBuilder) -> Result<PropertyInfo, ConfigError> {
        builder.finalize(PropertyTag::new(9), "Test")
    }

    #[test]
    fn layout_packs_from_the_top() {
        let info = finalize(
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param(1)
                .integer_param(0)
                .integer_param(1000),
        )
        .unwrap();

        let widths: [u32; 3] = core::array::from_fn(|i| info.params()[i].bit_width());
        assert_eq!(widths, [1, 0, 10]);
        assert_eq!(info.params()[0].offset(), 52);
        assert_eq!(info.params()[1].offset(), 52);
        assert_eq!(info.params()[2].offset(), 42);
    }

    #[test]
    fn encode_decode() {
        let info = finalize(
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param(7)
                .integer_param(300),
        )
        .unwrap();

        let key = info.encode_key(&[5, 299]).unwrap();
        assert_eq!(key.tag(), PropertyTag::new(9));
        assert!(key.has_params());
        assert_eq!(info.decode_key(key), [5, 299, 0, 0]);

        let partial = info.encode_key(&[3]).unwrap();
        assert_eq!(info.decode_key(partial), [3, 0, 0, 0]);
    }

    #[test]
    fn encode_rejects_overflow() {
        let info = finalize(PropertyInfoBuilder::new(DataType::Integer).integer_param(7)).unwrap();
        assert_eq!(
            info.encode_key(&[8]),
            Err(KeyError::ParamOverflow {
                tag: PropertyTag::new(9),
                index: 0,
                value: 8,
                max: 7
            })
        );
        assert!(matches!(
            info.encode_key(&[1, 1]),
            Err(KeyError::ParamCount { given: 2, .. })
        ));
    }

    #[test]
    fn zero_width_param_only_accepts_zero() {
        let info = finalize(PropertyInfoBuilder::new(DataType::Integer).integer_param(0)).unwrap();
        assert!(!info.encode_key(&[0]).unwrap().has_params());
        assert!(info.encode_key(&[1]).is_err());
    }

    #[test]
    fn too_many_bits() {
        let result = finalize(
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param(u64::from(u32::MAX))
                .integer_param(u64::from(u32::MAX)),
        );
        assert_eq!(
            result.unwrap_err(),
            ConfigError::ParamBitOverflow {
                name: "Test",
                bits: 64
            }
        );
    }

    #[test]
    fn full_53_bits_is_accepted() {
        let info = finalize(
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param((1 << 50) - 1)
                .integer_param(7),
        )
        .unwrap();
        let key = info.encode_key(&[(1 << 50) - 1, 7]).unwrap();
        assert_eq!(key.tag(), PropertyTag::new(9));
        assert_eq!(info.decode_key(key), [(1 << 50) - 1, 7, 0, 0]);
    }

    #[test]
    fn too_many_params() {
        let mut builder = PropertyInfoBuilder::new(DataType::Integer);
        for _ in 0..5 {
            builder = builder.integer_param(1);
        }
        assert!(matches!(
            finalize(builder),
            Err(ConfigError::TooManyParams { count: 5, .. })
        ));
    }

    #[test]
    fn set_on_numeric_is_rejected() {
        assert!(matches!(
            finalize(PropertyInfoBuilder::new(DataType::Real).aggregate(AggregationMethod::Set)),
            Err(ConfigError::UnsupportedAggregation { .. })
        ));
        assert!(
            finalize(PropertyInfoBuilder::new(DataType::Asset).aggregate(AggregationMethod::Set))
                .is_ok()
        );
    }

    #[test]
    fn clamp_validation() {
        assert!(matches!(
            finalize(PropertyInfoBuilder::new(DataType::Integer).clamp_int(5, 1)),
            Err(ConfigError::InvalidClamp { .. })
        ));
        assert!(matches!(
            finalize(PropertyInfoBuilder::new(DataType::Boolean).clamp_int(0, 1)),
            Err(ConfigError::InvalidClamp { .. })
        ));
    }

    #[test]
    fn param0_range_covers_remaining_params() {
        let info = finalize(
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param(15)
                .integer_param(15),
        )
        .unwrap();
        let range = info.param0_range(3).unwrap();
        assert!(range.contains(info.encode_key(&[3, 0]).unwrap()));
        assert!(range.contains(info.encode_key(&[3, 15]).unwrap()));
        assert!(!range.contains(info.encode_key(&[4, 0]).unwrap()));
        assert!(!range.contains(info.encode_key(&[2, 15]).unwrap()));
    }

    #[test]
    fn curve_default() {
        let info = finalize(PropertyInfoBuilder::new(DataType::Curve).default(1.5_f32)).unwrap();
        assert!(info.is_curve_property());
        assert_eq!(info.curve_default(), Some(1.5));

        let plain = finalize(PropertyInfoBuilder::new(DataType::Real)).unwrap();
        assert_eq!(plain.curve_default(), None);
    }
}
