// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use smallvec::SmallVec;

use super::varint::{Reader, unzigzag, write_varint, zigzag};
use super::{DecodeError, DecodeReport, WireError, write_framed};
use crate::forest::{GraphId, PropertyForest};
use crate::key::PropertyKey;
use crate::metadata::{KeyError, ParamKind, PropertyFlags, PropertyInfo, PropertyParam};
use crate::reference::{AssetRef, Guid, PrototypeRef, ReferenceResolver};
use crate::registry::PropertyRegistry;
use crate::value::{DataType, PropertyValue};
use crate::watcher::SetFlags;

/// Why a durable entry was not written or applied.
#[derive(Debug, thiserror::Error)]
enum Skip {
    #[error(transparent)]
    Body(#[from] WireError),
    #[error("property has no guid")]
    NoGuid,
    #[error("no property with guid {0:?}")]
    UnknownGuid(Guid),
    #[error("stored version {stored} differs from current {current}")]
    Version { stored: u32, current: u32 },
    #[error("parameter or value layout changed")]
    Layout,
    #[error("reference has no guid")]
    Unnamed,
    #[error("guid {0:?} does not resolve")]
    Unresolved(Guid),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("curve properties are not stored")]
    CurveProperty,
}

/// Storage encoding that survives registry changes.
///
/// Each entry names its property by guid and records the property's data
/// version, the kind and stable guid of every reference parameter, and the
/// data type of the value:
///
/// ```text
/// entry   := varint(len) body
/// body    := varint(guid) varint(version) u8(param_count) param* u8(type) varint(value)
/// param   := u8(kind) varint(integer | guid)
/// ```
///
/// Only properties flagged [`PropertyFlags::PERSISTENT`] are written, and
/// never curve properties, which are re-derived from their curves.
///
/// Loading resolves guids back to the current ids. An entry whose property is
/// unknown, whose version or parameter layout changed, or whose references no
/// longer resolve is skipped.
#[derive(Copy, Clone)]
pub struct DurableCodec<'r> {
    resolver: &'r dyn ReferenceResolver,
}

impl fmt::Debug for DurableCodec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableCodec").finish_non_exhaustive()
    }
}

impl<'r> DurableCodec<'r> {
    /// Creates a codec translating references through `resolver`.
    #[must_use]
    pub fn new(resolver: &'r dyn ReferenceResolver) -> Self {
        Self { resolver }
    }

    /// Appends the persistent base values of `id` to `out`.
    ///
    /// Returns the number of entries written. Values whose property has no
    /// guid, or whose references have none, are left out with a warning.
    ///
    /// # Errors
    ///
    /// [`WireError::TooManyEntries`] if the count overflows the header.
    pub fn encode(
        &self,
        forest: &PropertyForest,
        id: GraphId,
        out: &mut Vec<u8>,
    ) -> Result<usize, WireError> {
        let registry = forest.registry();
        let mut entries = Vec::new();
        let mut body = Vec::new();
        let mut count = 0;

        for (key, value) in forest.iter_base(id) {
            let Some(info) = registry.get(key.tag()) else {
                continue;
            };
            if !info.flags().contains(PropertyFlags::PERSISTENT) || info.is_curve_property() {
                continue;
            }
            body.clear();
            if let Err(error) = self.encode_entry(registry, info, key, value, &mut body) {
                tracing::warn!(?key, %error, "durable entry not written");
                continue;
            }
            write_varint(&mut entries, body.len() as u64);
            entries.extend_from_slice(&body);
            count += 1;
        }

        write_framed(out, count, &entries)?;
        Ok(count)
    }

    /// Applies the entries of `bytes` to the base store of `id` with
    /// [`SetFlags::DESERIALIZED`] and [`SetFlags::PERSISTENT`].
    ///
    /// # Errors
    ///
    /// [`DecodeError`] if the header or an entry length is truncated or
    /// malformed. Entries before the error stay applied and are counted in
    /// [`DecodeError::report`].
    pub fn decode(
        &self,
        forest: &mut PropertyForest,
        id: GraphId,
        bytes: &[u8],
    ) -> Result<DecodeReport, DecodeError> {
        let mut report = DecodeReport::default();
        match self.decode_into(forest, id, bytes, &mut report) {
            Ok(()) => Ok(report),
            Err(error) => Err(DecodeError { report, error }),
        }
    }

    fn decode_into(
        &self,
        forest: &mut PropertyForest,
        id: GraphId,
        bytes: &[u8],
        report: &mut DecodeReport,
    ) -> Result<(), WireError> {
        let registry = Arc::clone(forest.registry());
        let mut reader = Reader::new(bytes);
        let count = reader.read_u32_le()?;

        for _ in 0..count {
            let offset = reader.position();
            let len = reader.read_varint()?;
            let len = usize::try_from(len).map_err(|_| WireError::Malformed { offset })?;
            let body = reader.read_bytes(len)?;

            match self.decode_entry(&registry, body) {
                Ok((key, value)) => {
                    forest.set_with_flags(
                        id,
                        key,
                        value,
                        SetFlags::DESERIALIZED | SetFlags::PERSISTENT,
                    );
                    report.applied += 1;
                }
                Err(skip) => {
                    tracing::warn!(offset, %skip, "durable entry skipped");
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn encode_entry(
        &self,
        registry: &PropertyRegistry,
        info: &PropertyInfo,
        key: PropertyKey,
        value: PropertyValue,
        out: &mut Vec<u8>,
    ) -> Result<(), Skip> {
        if !info.guid().is_valid() {
            return Err(Skip::NoGuid);
        }
        write_varint(out, info.guid().raw());
        write_varint(out, u64::from(info.version()));

        let params = registry.decode_params(key, self.resolver)?;
        #[expect(clippy::cast_possible_truncation, reason = "at most four parameters")]
        out.push(params.len() as u8);
        for (param, layout) in params.iter().zip(info.params()) {
            out.push(layout.kind().code());
            let bits = match *param {
                PropertyParam::Integer(value) => value,
                PropertyParam::Asset(asset) => self.asset_guid(asset)?.raw(),
                PropertyParam::Prototype(prototype) => self.prototype_guid(prototype)?.raw(),
            };
            write_varint(out, bits);
        }

        out.push(info.data_type().code());
        let bits = match info.data_type() {
            DataType::Real | DataType::Curve => u64::from(value.as_real().to_bits()),
            DataType::Integer | DataType::Time => zigzag(value.as_int()),
            DataType::Prototype => self.prototype_guid(value.as_prototype())?.raw(),
            DataType::Asset => self.asset_guid(value.as_asset())?.raw(),
            _ => value.raw(),
        };
        write_varint(out, bits);
        Ok(())
    }

    fn decode_entry(
        &self,
        registry: &PropertyRegistry,
        body: &[u8],
    ) -> Result<(PropertyKey, PropertyValue), Skip> {
        let mut reader = Reader::new(body);
        let guid = Guid::new(reader.read_varint()?);
        let tag = registry.by_guid(guid).ok_or(Skip::UnknownGuid(guid))?;
        let info = registry.get(tag).ok_or(Skip::UnknownGuid(guid))?;

        let stored = u32::try_from(reader.read_varint()?).map_err(|_| Skip::Layout)?;
        if stored != info.version() {
            return Err(Skip::Version {
                stored,
                current: info.version(),
            });
        }
        if info.is_curve_property() {
            return Err(Skip::CurveProperty);
        }

        let param_count = usize::from(reader.read_u8()?);
        if param_count != info.param_count() {
            return Err(Skip::Layout);
        }
        let mut params = SmallVec::<[PropertyParam; 4]>::new();
        for layout in info.params() {
            let kind = reader.read_u8()?;
            if kind != layout.kind().code() {
                return Err(Skip::Layout);
            }
            let bits = reader.read_varint()?;
            params.push(match layout.kind() {
                ParamKind::Integer => PropertyParam::Integer(bits),
                ParamKind::Asset(_) => PropertyParam::Asset(self.asset_from_guid(Guid::new(bits))?),
                ParamKind::Prototype(_) => {
                    PropertyParam::Prototype(self.prototype_from_guid(Guid::new(bits))?)
                }
            });
        }

        let data_type = DataType::from_code(reader.read_u8()?).ok_or(Skip::Layout)?;
        if data_type != info.data_type() {
            return Err(Skip::Layout);
        }
        let bits = reader.read_varint()?;
        let value = match data_type {
            DataType::Real | DataType::Curve => PropertyValue::from_real(f32::from_bits(
                u32::try_from(bits).map_err(|_| Skip::Layout)?,
            )),
            DataType::Integer | DataType::Time => PropertyValue::from_int(unzigzag(bits)),
            DataType::Prototype => {
                PropertyValue::from_prototype(self.prototype_from_guid(Guid::new(bits))?)
            }
            DataType::Asset => PropertyValue::from_asset(self.asset_from_guid(Guid::new(bits))?),
            _ => PropertyValue::from_raw(bits),
        };

        let key = registry.encode_params(tag, &params, self.resolver)?;
        Ok((key, value))
    }

    fn prototype_guid(&self, prototype: PrototypeRef) -> Result<Guid, Skip> {
        if !prototype.is_valid() {
            return Ok(Guid::INVALID);
        }
        self.resolver
            .prototype_guid(prototype)
            .ok_or(Skip::Unnamed)
    }

    fn asset_guid(&self, asset: AssetRef) -> Result<Guid, Skip> {
        if !asset.is_valid() {
            return Ok(Guid::INVALID);
        }
        self.resolver
            .asset_guid(asset)
            .ok_or(Skip::Unnamed)
    }

    fn prototype_from_guid(&self, guid: Guid) -> Result<PrototypeRef, Skip> {
        if !guid.is_valid() {
            return Ok(PrototypeRef::INVALID);
        }
        self.resolver
            .prototype_from_guid(guid)
            .ok_or(Skip::Unresolved(guid))
    }

    fn asset_from_guid(&self, guid: Guid) -> Result<AssetRef, Skip> {
        if !guid.is_valid() {
            return Ok(AssetRef::INVALID);
        }
        self.resolver.asset_from_guid(guid).ok_or(Skip::Unresolved(guid))
    }
}
