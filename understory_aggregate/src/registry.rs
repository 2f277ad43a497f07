// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property metadata registry.
//!
//! This module provides [`PropertyRegistry`], the read-only table of
//! [`PropertyInfo`] consulted by every graph operation. It is built once by the
//! loader and then shared (typically behind an `Arc`).

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::aggregation::AggregationMethod;
use crate::key::{MAX_PARAMS, PropertyKey, PropertyTag};
use crate::metadata::{
    ClampBounds, ConfigError, KeyError, ParamKind, ParamLayout, PropertyInfo, PropertyInfoBuilder,
    PropertyParam,
};
use crate::reference::{AssetRef, Guid, PrototypeRef, ReferenceResolver};
use crate::value::{DataType, PropertyValue};

/// A registry of property metadata, indexed by [`PropertyTag`].
///
/// Tags are handed out in registration order. Lookups that miss return a
/// neutral fallback and log a warning.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{
///     AggregationMethod, DataType, PropertyInfoBuilder, PropertyRegistry, PropertyValue,
/// };
///
/// let mut registry = PropertyRegistry::new();
/// let health = registry
///     .register(
///         "MaxHealth",
///         PropertyInfoBuilder::new(DataType::Real)
///             .default(100.0_f32)
///             .aggregate(AggregationMethod::Sum),
///     )
///     .unwrap();
///
/// assert_eq!(registry.by_name("MaxHealth"), Some(health));
/// assert_eq!(registry.default_value(health), PropertyValue::from_real(100.0));
/// assert_eq!(registry.aggregation(health), AggregationMethod::Sum);
/// ```
#[derive(Default)]
pub struct PropertyRegistry {
    properties: Vec<PropertyInfo>,
    by_name: HashMap<&'static str, PropertyTag>,
    by_guid: HashMap<Guid, PropertyTag>,
}

impl PropertyRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `builder` and registers it under the next free tag.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the name or guid is taken, every tag is in
    /// use, or the definition itself is invalid. A failed registration leaves
    /// the registry unchanged.
    pub fn register(
        &mut self,
        name: &'static str,
        builder: PropertyInfoBuilder,
    ) -> Result<PropertyTag, ConfigError> {
        if self.by_name.contains_key(name) {
            return Err(ConfigError::DuplicateName { name });
        }
        let Ok(index) = u16::try_from(self.properties.len()) else {
            return Err(ConfigError::TooManyTags { name });
        };
        if usize::from(index) >= PropertyTag::COUNT {
            return Err(ConfigError::TooManyTags { name });
        }

        let tag = PropertyTag::new(index);
        let info = builder.finalize(tag, name)?;
        let guid = info.guid();
        if guid.is_valid() && self.by_guid.contains_key(&guid) {
            return Err(ConfigError::DuplicateGuid { name, guid });
        }

        if guid.is_valid() {
            self.by_guid.insert(guid, tag);
        }
        self.by_name.insert(name, tag);
        self.properties.push(info);
        Ok(tag)
    }

    /// Returns the number of registered properties.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if no properties are registered.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns the metadata of `tag`.
    #[must_use]
    #[inline]
    pub fn get(&self, tag: PropertyTag) -> Option<&PropertyInfo> {
        self.properties.get(usize::from(tag.index()))
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<PropertyTag> {
        self.by_name.get(name).copied()
    }

    /// Looks up a property by its stable guid.
    #[must_use]
    pub fn by_guid(&self, guid: Guid) -> Option<PropertyTag> {
        self.by_guid.get(&guid).copied()
    }

    /// Returns the name of a property.
    #[must_use]
    pub fn name(&self, tag: PropertyTag) -> Option<&'static str> {
        self.get(tag).map(PropertyInfo::name)
    }

    /// Returns an iterator over all registered properties in tag order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyInfo> {
        self.properties.iter()
    }

    fn lookup(&self, tag: PropertyTag) -> Option<&PropertyInfo> {
        let info = self.get(tag);
        if info.is_none() {
            tracing::warn!(?tag, "unknown property tag");
        }
        info
    }

    /// Default value of `tag`, or zero for an unknown tag.
    #[must_use]
    pub fn default_value(&self, tag: PropertyTag) -> PropertyValue {
        self.lookup(tag)
            .map_or(PropertyValue::ZERO, PropertyInfo::default_value)
    }

    /// Data type of `tag`, or [`DataType::Integer`] for an unknown tag.
    #[must_use]
    pub fn data_type(&self, tag: PropertyTag) -> DataType {
        self.lookup(tag)
            .map_or(DataType::Integer, PropertyInfo::data_type)
    }

    /// Aggregation method of `tag`, or [`AggregationMethod::None`].
    #[must_use]
    pub fn aggregation(&self, tag: PropertyTag) -> AggregationMethod {
        self.lookup(tag)
            .map_or(AggregationMethod::None, PropertyInfo::aggregation)
    }

    /// Number of key parameters of `tag`, or 0.
    #[must_use]
    pub fn param_count(&self, tag: PropertyTag) -> usize {
        self.lookup(tag).map_or(0, PropertyInfo::param_count)
    }

    /// Layout of parameter `index` of `tag`.
    #[must_use]
    pub fn param_layout(&self, tag: PropertyTag, index: usize) -> Option<ParamLayout> {
        self.lookup(tag)?.param_layout(index).copied()
    }

    /// Clamp bounds of `tag`, if any.
    #[must_use]
    pub fn clamp_bounds(&self, tag: PropertyTag) -> Option<ClampBounds> {
        self.lookup(tag)?.clamp()
    }

    /// Returns `true` if `tag` is curve-derived.
    #[must_use]
    pub fn is_curve_property(&self, tag: PropertyTag) -> bool {
        self.lookup(tag).is_some_and(PropertyInfo::is_curve_property)
    }

    /// Default value of a curve property as a real.
    #[must_use]
    pub fn curve_default(&self, tag: PropertyTag) -> Option<f32> {
        self.lookup(tag)?.curve_default()
    }

    /// Packs integer parameters into a key of `tag`.
    ///
    /// # Errors
    ///
    /// [`KeyError::UnknownTag`] for an unregistered tag, otherwise as
    /// [`PropertyInfo::encode_key`].
    pub fn encode(&self, tag: PropertyTag, params: &[u64]) -> Result<PropertyKey, KeyError> {
        self.get(tag)
            .ok_or(KeyError::UnknownTag { tag })?
            .encode_key(params)
    }

    /// Unpacks the integer parameters of `key`.
    ///
    /// # Errors
    ///
    /// [`KeyError::UnknownTag`] for an unregistered tag.
    pub fn decode(&self, key: PropertyKey) -> Result<[u64; MAX_PARAMS], KeyError> {
        let tag = key.tag();
        Ok(self.get(tag).ok_or(KeyError::UnknownTag { tag })?.decode_key(key))
    }

    /// Packs typed parameters, translating references to enumerants.
    ///
    /// Invalid references pack as 0.
    ///
    /// # Errors
    ///
    /// [`KeyError::ParamKind`] when a parameter does not match its declared
    /// kind, [`KeyError::Unresolved`] when a reference has no enumerant, and
    /// everything [`encode`](Self::encode) reports.
    pub fn encode_params(
        &self,
        tag: PropertyTag,
        params: &[PropertyParam],
        resolver: &dyn ReferenceResolver,
    ) -> Result<PropertyKey, KeyError> {
        let info = self.get(tag).ok_or(KeyError::UnknownTag { tag })?;
        if params.len() > info.param_count() {
            return Err(KeyError::ParamCount {
                tag,
                given: params.len(),
                expected: info.param_count(),
            });
        }

        let mut raw = [0_u64; MAX_PARAMS];
        for (index, (param, layout)) in params.iter().zip(info.params()).enumerate() {
            let value = match (*param, layout.kind()) {
                (PropertyParam::Integer(value), ParamKind::Integer) => Some(value),
                (PropertyParam::Asset(asset), ParamKind::Asset(_)) if !asset.is_valid() => Some(0),
                (PropertyParam::Asset(asset), ParamKind::Asset(domain)) => {
                    resolver.asset_to_enum(domain, asset)
                }
                (PropertyParam::Prototype(proto), ParamKind::Prototype(_)) if !proto.is_valid() => {
                    Some(0)
                }
                (PropertyParam::Prototype(proto), ParamKind::Prototype(domain)) => {
                    resolver.prototype_to_enum(domain, proto)
                }
                _ => return Err(KeyError::ParamKind { tag, index }),
            };
            raw[index] = value.ok_or(KeyError::Unresolved { tag, index })?;
        }
        info.encode_key(&raw[..params.len()])
    }

    /// Unpacks typed parameters, translating enumerants back to references.
    ///
    /// # Errors
    ///
    /// [`KeyError::UnknownTag`] for an unregistered tag and
    /// [`KeyError::Unresolved`] for an enumerant with no reference.
    pub fn decode_params(
        &self,
        key: PropertyKey,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Vec<PropertyParam>, KeyError> {
        let tag = key.tag();
        let info = self.get(tag).ok_or(KeyError::UnknownTag { tag })?;
        let raw = info.decode_key(key);
        info.params()
            .iter()
            .zip(raw)
            .enumerate()
            .map(|(index, (layout, value))| {
                let unresolved = KeyError::Unresolved { tag, index };
                Ok(match layout.kind() {
                    ParamKind::Integer => PropertyParam::Integer(value),
                    ParamKind::Asset(_) if value == 0 => PropertyParam::Asset(AssetRef::INVALID),
                    ParamKind::Asset(domain) => {
                        PropertyParam::Asset(resolver.enum_to_asset(domain, value).ok_or(unresolved)?)
                    }
                    ParamKind::Prototype(_) if value == 0 => {
                        PropertyParam::Prototype(PrototypeRef::INVALID)
                    }
                    ParamKind::Prototype(domain) => PropertyParam::Prototype(
                        resolver.enum_to_prototype(domain, value).ok_or(unresolved)?,
                    ),
                })
            })
            .collect()
    }
}

impl core::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("count", &self.properties.len())
            .field(
                "properties",
                &self.properties.iter().map(PropertyInfo::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{EnumDomain, ReferenceTable};
    use alloc::{format, vec, vec::Vec};

    const POWERS: EnumDomain = EnumDomain(1);

    #[test]
    fn registry_new() {
        let registry = PropertyRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn tags_follow_registration_order() {
        let mut registry = PropertyRegistry::new();
        let a = registry.register("A", PropertyInfoBuilder::new(DataType::Integer)).unwrap();
        let b = registry.register("B", PropertyInfoBuilder::new(DataType::Real)).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(registry.name(b), Some("B"));
        assert_eq!(registry.by_name("A"), Some(a));
        assert_eq!(registry.by_name("C"), None);

        let names: Vec<_> = registry.iter().map(PropertyInfo::name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn duplicate_name_and_guid() {
        let mut registry = PropertyRegistry::new();
        registry
            .register(
                "A",
                PropertyInfoBuilder::new(DataType::Integer).guid(Guid::new(7)),
            )
            .unwrap();

        assert_eq!(
            registry.register("A", PropertyInfoBuilder::new(DataType::Integer)),
            Err(ConfigError::DuplicateName { name: "A" })
        );
        assert_eq!(
            registry.register(
                "B",
                PropertyInfoBuilder::new(DataType::Integer).guid(Guid::new(7))
            ),
            Err(ConfigError::DuplicateGuid {
                name: "B",
                guid: Guid::new(7)
            })
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.by_guid(Guid::new(7)), registry.by_name("A"));
    }

    #[test]
    fn tag_space_is_bounded() {
        let mut registry = PropertyRegistry::new();
        for i in 0..PropertyTag::COUNT {
            let name: &'static str = alloc::boxed::Box::leak(format!("P{i}").into_boxed_str());
            registry.register(name, PropertyInfoBuilder::new(DataType::Integer)).unwrap();
        }
        assert_eq!(
            registry.register("Overflow", PropertyInfoBuilder::new(DataType::Integer)),
            Err(ConfigError::TooManyTags { name: "Overflow" })
        );
    }

    #[test]
    fn soft_misses_fall_back() {
        let registry = PropertyRegistry::new();
        let tag = PropertyTag::new(12);
        assert_eq!(registry.default_value(tag), PropertyValue::ZERO);
        assert_eq!(registry.aggregation(tag), AggregationMethod::None);
        assert_eq!(registry.param_count(tag), 0);
        assert!(registry.param_layout(tag, 0).is_none());
        assert!(!registry.is_curve_property(tag));
        assert_eq!(
            registry.encode(tag, &[]),
            Err(KeyError::UnknownTag { tag })
        );
    }

    #[test]
    fn typed_params_round_trip() {
        let mut refs = ReferenceTable::new();
        refs.enumerate_prototypes(POWERS, [PrototypeRef::new(500), PrototypeRef::new(501)]);

        let mut registry = PropertyRegistry::new();
        let rank = registry
            .register(
                "PowerRank",
                PropertyInfoBuilder::new(DataType::Integer)
                    .prototype_param(POWERS, 2)
                    .integer_param(9),
            )
            .unwrap();

        let key = registry
            .encode_params(
                rank,
                &[
                    PropertyParam::Prototype(PrototypeRef::new(501)),
                    PropertyParam::Integer(4),
                ],
                &refs,
            )
            .unwrap();
        assert_eq!(registry.decode(key).unwrap(), [2, 4, 0, 0]);
        assert_eq!(
            registry.decode_params(key, &refs).unwrap(),
            vec![
                PropertyParam::Prototype(PrototypeRef::new(501)),
                PropertyParam::Integer(4)
            ]
        );

        let invalid = registry
            .encode_params(rank, &[PropertyParam::Prototype(PrototypeRef::INVALID)], &refs)
            .unwrap();
        assert_eq!(invalid, PropertyKey::new(rank));
    }

    #[test]
    fn typed_param_errors() {
        let refs = ReferenceTable::new();
        let mut registry = PropertyRegistry::new();
        let tag = registry
            .register(
                "Keyed",
                PropertyInfoBuilder::new(DataType::Integer).asset_param(POWERS, 10),
            )
            .unwrap();

        assert_eq!(
            registry.encode_params(tag, &[PropertyParam::Integer(1)], &refs),
            Err(KeyError::ParamKind { tag, index: 0 })
        );
        assert_eq!(
            registry.encode_params(tag, &[PropertyParam::Asset(AssetRef::new(3))], &refs),
            Err(KeyError::Unresolved { tag, index: 0 })
        );
    }

    #[test]
    fn registry_debug() {
        let mut registry = PropertyRegistry::new();
        registry.register("Width", PropertyInfoBuilder::new(DataType::Real)).unwrap();

        let debug = format!("{registry:?}");
        assert!(debug.contains("PropertyRegistry"));
        assert!(debug.contains("Width"));
    }
}
