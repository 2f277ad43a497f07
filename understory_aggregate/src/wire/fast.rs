// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use super::varint::{Reader, unzigzag, write_varint, zigzag};
use super::{DecodeError, DecodeReport, WireError, write_framed};
use crate::forest::{GraphId, PropertyForest};
use crate::key::PropertyKey;
use crate::metadata::{PropertyFlags, PropertyInfo};
use crate::reference::{EnumDomain, PrototypeRef, ReferenceResolver};
use crate::value::{DataType, PropertyValue};
use crate::watcher::SetFlags;

/// Which properties a [`FastCodec`] writes and how it encodes them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WireMode {
    /// Properties flagged [`PropertyFlags::REPLICATED`], with type-aware value
    /// bits.
    #[default]
    Replication,
    /// Properties flagged [`PropertyFlags::TRANSFERRED`], every value as a
    /// zig-zag `i64`.
    Migration,
}

impl WireMode {
    fn selects(self, flags: PropertyFlags) -> bool {
        match self {
            Self::Replication => flags.contains(PropertyFlags::REPLICATED),
            Self::Migration => flags.contains(PropertyFlags::TRANSFERRED),
        }
    }
}

/// Compact encoding for peers sharing one registry.
///
/// Keys travel bit-reversed so that parameterless keys, whose low bits are
/// all zero, become small varints.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use understory_aggregate::{
///     DataType, FastCodec, PropertyFlags, PropertyForest, PropertyInfoBuilder, PropertyKey,
///     PropertyRegistry, WireMode,
/// };
///
/// let mut registry = PropertyRegistry::new();
/// let health = registry
///     .register(
///         "Health",
///         PropertyInfoBuilder::new(DataType::Integer).flags(PropertyFlags::REPLICATED),
///     )
///     .unwrap();
/// let key = PropertyKey::new(health);
///
/// let mut forest = PropertyForest::new(Arc::new(registry));
/// let server = forest.create();
/// let client = forest.create();
/// forest.set(server, key, 250_i64);
///
/// let codec = FastCodec::new(WireMode::Replication);
/// let mut bytes = Vec::new();
/// codec.encode(&forest, server, &mut bytes).unwrap();
/// let report = codec.decode(&mut forest, client, &bytes).unwrap();
///
/// assert_eq!(report.applied, 1);
/// assert_eq!(forest.get_int(client, key), 250);
/// ```
#[derive(Copy, Clone, Default)]
pub struct FastCodec<'r> {
    mode: WireMode,
    time_origin: i64,
    baseline: Option<GraphId>,
    resolver: Option<&'r dyn ReferenceResolver>,
}

impl fmt::Debug for FastCodec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastCodec")
            .field("mode", &self.mode)
            .field("time_origin", &self.time_origin)
            .field("baseline", &self.baseline)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl<'r> FastCodec<'r> {
    /// Creates a codec with time origin 0, no baseline and no resolver.
    #[must_use]
    pub fn new(mode: WireMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Time values travel as milliseconds relative to `origin`.
    #[must_use]
    pub fn with_time_origin(mut self, origin: i64) -> Self {
        self.time_origin = origin;
        self
    }

    /// In replication mode, skip values equal to the base value of
    /// `baseline`.
    #[must_use]
    pub fn with_baseline(mut self, baseline: GraphId) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Prototype values travel as enumerants of
    /// [`EnumDomain::PROTOTYPES`] instead of raw ids.
    #[must_use]
    pub fn with_resolver(mut self, resolver: &'r dyn ReferenceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The wire mode.
    #[must_use]
    #[inline]
    pub fn mode(&self) -> WireMode {
        self.mode
    }

    /// Appends the selected base values of `id` to `out`.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// [`WireError::TooManyEntries`] if the count overflows the header;
    /// nothing is written in that case.
    pub fn encode(
        &self,
        forest: &PropertyForest,
        id: GraphId,
        out: &mut Vec<u8>,
    ) -> Result<usize, WireError> {
        let registry = forest.registry();
        let mut entries = Vec::new();
        let mut count = 0;

        for (key, value) in forest.iter_base(id) {
            let Some(info) = registry.get(key.tag()) else {
                continue;
            };
            if !self.mode.selects(info.flags()) {
                continue;
            }
            if self.mode == WireMode::Replication
                && self
                    .baseline
                    .is_some_and(|baseline| forest.base_value(baseline, key) == Some(value))
            {
                continue;
            }
            let Some(bits) = self.value_to_bits(value, info.data_type()) else {
                tracing::warn!(?key, ?value, "prototype has no enumerant, entry not written");
                continue;
            };
            write_varint(&mut entries, key.reversed());
            write_varint(&mut entries, bits);
            count += 1;
        }

        write_framed(out, count, &entries)?;
        Ok(count)
    }

    /// Applies the entries of `bytes` to the base store of `id`.
    ///
    /// Entries with an unknown tag, a malformed key or an unresolvable value
    /// are skipped.
    ///
    /// # Errors
    ///
    /// [`DecodeError`] if the stream is truncated or a varint is malformed.
    /// Entries before the error stay applied and are counted in
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
            let key = PropertyKey::from_reversed(reader.read_varint()?);
            let bits = reader.read_varint()?;

            let Some(info) = registry.get(key.tag()) else {
                tracing::warn!(?key, "unknown property tag, entry skipped");
                report.skipped += 1;
                continue;
            };
            if !is_canonical(info, key) {
                tracing::warn!(?key, "malformed key, entry skipped");
                report.skipped += 1;
                continue;
            }
            let Some(value) = self.bits_to_value(bits, info.data_type()) else {
                tracing::warn!(?key, bits, "unresolvable value, entry skipped");
                report.skipped += 1;
                continue;
            };

            forest.set_with_flags(id, key, value, SetFlags::DESERIALIZED);
            report.applied += 1;
        }

        if !reader.is_empty() {
            tracing::warn!(offset = reader.position(), "trailing bytes after fast stream");
        }
        Ok(())
    }

    fn value_to_bits(&self, value: PropertyValue, data_type: DataType) -> Option<u64> {
        if self.mode == WireMode::Migration {
            return Some(zigzag(value.as_int()));
        }
        Some(match data_type {
            DataType::Real | DataType::Curve => u64::from(value.as_real().to_bits()),
            DataType::Integer => zigzag(value.as_int()),
            DataType::Time => zigzag(value.as_int().wrapping_sub(self.time_origin)),
            DataType::Prototype => {
                let prototype = value.as_prototype();
                match self.resolver {
                    _ if !prototype.is_valid() => 0,
                    Some(resolver) => resolver.prototype_to_enum(EnumDomain::PROTOTYPES, prototype)?,
                    None => prototype.raw(),
                }
            }
            _ => value.raw(),
        })
    }

    fn bits_to_value(&self, bits: u64, data_type: DataType) -> Option<PropertyValue> {
        if self.mode == WireMode::Migration {
            return Some(PropertyValue::from_int(unzigzag(bits)));
        }
        Some(match data_type {
            DataType::Real | DataType::Curve => {
                PropertyValue::from_real(f32::from_bits(u32::try_from(bits).ok()?))
            }
            DataType::Integer => PropertyValue::from_int(unzigzag(bits)),
            DataType::Time => {
                PropertyValue::from_time(unzigzag(bits).wrapping_add(self.time_origin))
            }
            DataType::Prototype => PropertyValue::from_prototype(match self.resolver {
                _ if bits == 0 => PrototypeRef::INVALID,
                Some(resolver) => resolver.enum_to_prototype(EnumDomain::PROTOTYPES, bits)?,
                None => PrototypeRef::new(bits),
            }),
            _ => PropertyValue::from_raw(bits),
        })
    }
}

/// Returns `true` if `key` has no bits outside its parameters and every
/// parameter is within its maximum.
fn is_canonical(info: &PropertyInfo, key: PropertyKey) -> bool {
    let params = info.decode_key(key);
    info.encode_key(&params[..info.param_count()]) == Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyInfoBuilder;
    use crate::reference::ReferenceTable;
    use crate::registry::PropertyRegistry;

    struct Fixture {
        forest: PropertyForest,
        time: PropertyKey,
        proto: PropertyKey,
        real: PropertyKey,
        hidden: PropertyKey,
    }

    fn fixture() -> Fixture {
        let both = PropertyFlags::REPLICATED | PropertyFlags::TRANSFERRED;
        let mut registry = PropertyRegistry::new();
        let time = registry
            .register("Time", PropertyInfoBuilder::new(DataType::Time).flags(both))
            .unwrap();
        let proto = registry
            .register("Proto", PropertyInfoBuilder::new(DataType::Prototype).flags(both))
            .unwrap();
        let real = registry
            .register(
                "Real",
                PropertyInfoBuilder::new(DataType::Real).flags(PropertyFlags::REPLICATED),
            )
            .unwrap();
        let hidden = registry
            .register("Hidden", PropertyInfoBuilder::new(DataType::Integer))
            .unwrap();
        Fixture {
            forest: PropertyForest::new(Arc::new(registry)),
            time: PropertyKey::new(time),
            proto: PropertyKey::new(proto),
            real: PropertyKey::new(real),
            hidden: PropertyKey::new(hidden),
        }
    }

    #[test]
    fn time_travels_relative_to_origin() {
        let mut f = fixture();
        let src = f.forest.create();
        f.forest.set(src, f.time, PropertyValue::from_time(10_005));

        let codec = FastCodec::new(WireMode::Replication).with_time_origin(10_000);
        let mut bytes = Vec::new();
        assert_eq!(codec.encode(&f.forest, src, &mut bytes), Ok(1));
        // Header, one-byte key, zigzag(5) = 10.
        assert_eq!(bytes.len(), 4 + 1 + 1);
        assert_eq!(bytes[5], 10);

        let later = FastCodec::new(WireMode::Replication).with_time_origin(20_000);
        let dst = f.forest.create();
        later.decode(&mut f.forest, dst, &bytes).unwrap();
        assert_eq!(f.forest.get_int(dst, f.time), 20_005);
    }

    #[test]
    fn prototypes_travel_as_enumerants() {
        let mut f = fixture();
        let mut table = ReferenceTable::new();
        table.enumerate_prototypes(
            EnumDomain::PROTOTYPES,
            [PrototypeRef::new(0xdead), PrototypeRef::new(0xbeef)],
        );
        let src = f.forest.create();
        f.forest.set(src, f.proto, PrototypeRef::new(0xbeef));

        let codec = FastCodec::new(WireMode::Replication).with_resolver(&table);
        let mut bytes = Vec::new();
        codec.encode(&f.forest, src, &mut bytes).unwrap();
        assert_eq!(bytes.last(), Some(&2));

        let dst = f.forest.create();
        assert_eq!(
            codec.decode(&mut f.forest, dst, &bytes),
            Ok(DecodeReport {
                applied: 1,
                skipped: 0
            })
        );
        assert_eq!(f.forest.get(dst, f.proto).as_prototype(), PrototypeRef::new(0xbeef));

        // Unknown to the resolver: not written.
        f.forest.set(src, f.proto, PrototypeRef::new(0x1234));
        bytes.clear();
        assert_eq!(codec.encode(&f.forest, src, &mut bytes), Ok(0));
    }

    #[test]
    fn modes_select_by_flags() {
        let mut f = fixture();
        let src = f.forest.create();
        f.forest.set(src, f.real, 1.5_f32);
        f.forest.set(src, f.time, PropertyValue::from_time(3));
        f.forest.set(src, f.hidden, 9_i64);

        let mut bytes = Vec::new();
        let replicated = FastCodec::new(WireMode::Replication).encode(&f.forest, src, &mut bytes);
        assert_eq!(replicated, Ok(2));

        bytes.clear();
        let migrated = FastCodec::new(WireMode::Migration).encode(&f.forest, src, &mut bytes);
        assert_eq!(migrated, Ok(1));
        let dst = f.forest.create();
        FastCodec::new(WireMode::Migration)
            .decode(&mut f.forest, dst, &bytes)
            .unwrap();
        assert_eq!(f.forest.get_int(dst, f.time), 3);
        assert!(!f.forest.has(dst, f.real));
    }

    #[test]
    fn baseline_filters_replication_only() {
        let mut f = fixture();
        let baseline = f.forest.create();
        let src = f.forest.create();
        f.forest.set(baseline, f.time, PropertyValue::from_time(3));
        f.forest.set(src, f.time, PropertyValue::from_time(3));
        f.forest.set(src, f.real, 2.0_f32);

        let mut bytes = Vec::new();
        let codec = FastCodec::new(WireMode::Replication).with_baseline(baseline);
        assert_eq!(codec.encode(&f.forest, src, &mut bytes), Ok(1));

        bytes.clear();
        let codec = FastCodec::new(WireMode::Migration).with_baseline(baseline);
        assert_eq!(codec.encode(&f.forest, src, &mut bytes), Ok(1));
    }

    #[test]
    fn non_canonical_keys_are_skipped() {
        let mut f = fixture();
        let dst = f.forest.create();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1_u32.to_le_bytes());
        write_varint(&mut bytes, PropertyKey::from_raw(f.hidden.raw() | 1).reversed());
        write_varint(&mut bytes, 2);

        let report = FastCodec::default().decode(&mut f.forest, dst, &bytes).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!f.forest.has(dst, f.hidden));
    }
}
