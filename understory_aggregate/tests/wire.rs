// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Round trips through `FastCodec` and `DurableCodec`.

use std::sync::Arc;

use understory_aggregate::{
    AggregationMethod, AssetRef, CurveRef, CurveTable, DataType, DecodeError, DecodeReport,
    DurableCodec, EnumDomain, FastCodec, GraphConfig, GraphId, Guid, Int21Vector3, PropertyFlags,
    PropertyForest, PropertyInfoBuilder, PropertyKey, PropertyParam, PropertyRegistry, PropertyTag,
    PropertyValue, PrototypeRef, ReferenceTable, StoreKind, WireError, WireMode,
};

const POWERS: EnumDomain = EnumDomain(1);

struct Tags {
    flag: PropertyTag,
    health: PropertyTag,
    gold: PropertyTag,
    cooldown: PropertyTag,
    skin: PropertyTag,
    owner: PropertyTag,
    offset: PropertyTag,
    rank: PropertyTag,
    scaled: PropertyTag,
    level: PropertyTag,
}

/// Builds the same layout every time; `rank_version` lets a test simulate a
/// data change of one property.
fn build_registry(rank_version: u32) -> (PropertyRegistry, Tags) {
    let net = PropertyFlags::REPLICATED | PropertyFlags::PERSISTENT;
    let mut r = PropertyRegistry::new();
    let mut add = |name: &'static str, builder: PropertyInfoBuilder, guid: u64| {
        r.register(name, builder.flags(net).guid(Guid::new(guid))).unwrap()
    };
    let flag = add("Flag", PropertyInfoBuilder::new(DataType::Boolean), 0x10);
    let health = add("Health", PropertyInfoBuilder::new(DataType::Real), 0x11);
    let gold = add("Gold", PropertyInfoBuilder::new(DataType::Integer), 0x12);
    let cooldown = add("Cooldown", PropertyInfoBuilder::new(DataType::Time), 0x13);
    let skin = add("Skin", PropertyInfoBuilder::new(DataType::Asset), 0x14);
    let owner = add("Owner", PropertyInfoBuilder::new(DataType::Prototype), 0x15);
    let offset = add("Offset", PropertyInfoBuilder::new(DataType::Int21Vector3), 0x16);
    let rank = add(
        "PowerRank",
        PropertyInfoBuilder::new(DataType::Integer)
            .aggregate(AggregationMethod::Sum)
            .prototype_param(POWERS, 8)
            .version(rank_version),
        0x17,
    );
    let scaled = add(
        "Scaled",
        PropertyInfoBuilder::new(DataType::Curve).aggregate(AggregationMethod::Sum),
        0x18,
    );
    let level = add("Level", PropertyInfoBuilder::new(DataType::Integer), 0x19);
    (
        r,
        Tags {
            flag,
            health,
            gold,
            cooldown,
            skin,
            owner,
            offset,
            rank,
            scaled,
            level,
        },
    )
}

/// Prototype `0x100` has guid `0xA1` and enumerant 1 in [`POWERS`];
/// `renumbered` gives it another numeric id, as a rebuilt data set would.
fn references(renumbered: bool) -> (ReferenceTable, PrototypeRef) {
    let power = PrototypeRef::new(if renumbered { 0x900 } else { 0x100 });
    let mut table = ReferenceTable::new();
    table.add_prototype(power, Guid::new(0xa1));
    table.add_prototype(PrototypeRef::new(0x300), Guid::new(0xa3));
    table.add_asset(AssetRef::new(0x200), Guid::new(0xb1));
    table.enumerate_prototypes(POWERS, [power]);
    table.enumerate_prototypes(EnumDomain::PROTOTYPES, [PrototypeRef::new(0x300), power]);
    (table, power)
}

fn populate(
    forest: &mut PropertyForest,
    tags: &Tags,
    table: &ReferenceTable,
    power: PrototypeRef,
) -> GraphId {
    let g = forest.create();
    let rank = forest
        .registry()
        .encode_params(tags.rank, &[PropertyParam::Prototype(power)], table)
        .unwrap();
    forest.set(g, PropertyKey::new(tags.flag), true);
    forest.set(g, PropertyKey::new(tags.health), 412.5_f32);
    forest.set(g, PropertyKey::new(tags.gold), -75_i64);
    forest.set(g, PropertyKey::new(tags.cooldown), PropertyValue::from_time(1_000_250));
    forest.set(g, PropertyKey::new(tags.skin), AssetRef::new(0x200));
    forest.set(g, PropertyKey::new(tags.owner), PrototypeRef::new(0x300));
    forest.set(
        g,
        PropertyKey::new(tags.offset),
        PropertyValue::from_vector(Int21Vector3::new(-4, 0, 1_000)),
    );
    forest.set(g, rank, 3_i64);
    forest.set(g, PropertyKey::new(tags.level), 2_i64);
    g
}

fn new_forest(registry: PropertyRegistry, store: StoreKind) -> PropertyForest {
    let mut curves = CurveTable::new();
    curves.insert(CurveRef::new(1), 0, [0.0, 1.0, 2.0]);
    PropertyForest::with_config(Arc::new(registry), GraphConfig::new().with_store(store))
        .with_curves(curves)
}

#[test]
fn fast_round_trip_between_store_kinds() {
    let (table, power) = references(false);
    let (registry, tags) = build_registry(1);
    let mut src = new_forest(registry, StoreKind::Flat);
    let node = populate(&mut src, &tags, &table, power);

    let codec = FastCodec::new(WireMode::Replication)
        .with_time_origin(1_000_000)
        .with_resolver(&table);
    let mut bytes = Vec::new();
    assert_eq!(codec.encode(&src, node, &mut bytes), Ok(9));

    let (registry, _) = build_registry(1);
    let mut dst = new_forest(registry, StoreKind::Bucketed);
    let copy = dst.create();
    assert_eq!(
        codec.decode(&mut dst, copy, &bytes),
        Ok(DecodeReport {
            applied: 9,
            skipped: 0
        })
    );
    let expected: Vec<_> = src.iter_base(node).collect();
    let actual: Vec<_> = dst.iter_base(copy).collect();
    assert_eq!(actual, expected);
}

#[test]
fn fast_stream_truncation_reports_applied_entries() {
    let (table, power) = references(false);
    let (registry, tags) = build_registry(1);
    let mut forest = new_forest(registry, StoreKind::Bucketed);
    let node = populate(&mut forest, &tags, &table, power);

    let codec = FastCodec::new(WireMode::Replication).with_resolver(&table);
    let mut bytes = Vec::new();
    codec.encode(&forest, node, &mut bytes).unwrap();
    bytes.truncate(bytes.len() - 1);

    let copy = forest.create();
    let err = codec.decode(&mut forest, copy, &bytes).unwrap_err();
    assert!(matches!(err.error, WireError::Truncated { .. }));
    assert_eq!(
        err.report,
        DecodeReport {
            applied: 8,
            skipped: 0
        }
    );
    assert_eq!(forest.iter_base(copy).count(), 8);

    assert_eq!(
        codec.decode(&mut forest, copy, &[1, 0]),
        Err(DecodeError {
            report: DecodeReport::default(),
            error: WireError::Truncated { offset: 0 },
        })
    );
}

#[test]
fn durable_stream_truncation_reports_applied_entries() {
    let (table, power) = references(false);
    let (registry, tags) = build_registry(1);
    let mut forest = new_forest(registry, StoreKind::Flat);
    let node = populate(&mut forest, &tags, &table, power);

    let codec = DurableCodec::new(&table);
    let mut bytes = Vec::new();
    assert_eq!(codec.encode(&forest, node, &mut bytes), Ok(9));
    bytes.truncate(bytes.len() - 1);

    let copy = forest.create();
    let err = codec.decode(&mut forest, copy, &bytes).unwrap_err();
    assert!(matches!(err.error, WireError::Truncated { .. }));
    assert_eq!(err.report.applied, 8);
    assert_eq!(forest.iter_base(copy).count(), 8);
}

#[test]
fn durable_round_trip_resolves_renumbered_references() {
    let (table, power) = references(false);
    let (registry, tags) = build_registry(1);
    let mut src = new_forest(registry, StoreKind::Bucketed);
    let node = populate(&mut src, &tags, &table, power);

    let level = PropertyKey::new(tags.level);
    let scaled = PropertyKey::new(tags.scaled);
    src.set_curve(node, scaled, CurveRef::new(1), level).unwrap();
    assert_eq!(src.get_real(node, scaled), 2.0);

    let mut bytes = Vec::new();
    // Every value except the curve-derived one.
    assert_eq!(DurableCodec::new(&table).encode(&src, node, &mut bytes), Ok(9));

    let (renumbered, new_power) = references(true);
    let (registry, tags) = build_registry(1);
    let mut dst = new_forest(registry, StoreKind::Flat);
    let copy = dst.create();
    let report = DurableCodec::new(&renumbered)
        .decode(&mut dst, copy, &bytes)
        .unwrap();
    assert_eq!(report, DecodeReport { applied: 9, skipped: 0 });

    let rank = dst
        .registry()
        .encode_params(tags.rank, &[PropertyParam::Prototype(new_power)], &renumbered)
        .unwrap();
    assert_eq!(dst.get_int(copy, rank), 3);
    assert_eq!(dst.get_real(copy, PropertyKey::new(tags.health)), 412.5);
    assert_eq!(dst.get_int(copy, PropertyKey::new(tags.gold)), -75);
    assert_eq!(
        dst.get(copy, PropertyKey::new(tags.skin)).as_asset(),
        AssetRef::new(0x200)
    );
    assert_eq!(
        dst.get(copy, PropertyKey::new(tags.offset)).as_vector(),
        Int21Vector3::new(-4, 0, 1_000)
    );
    assert!(!dst.has(copy, scaled));
}

#[test]
fn durable_skips_changed_and_unknown_entries() {
    let (table, power) = references(false);
    let (registry, tags) = build_registry(1);
    let mut src = new_forest(registry, StoreKind::Bucketed);
    let node = populate(&mut src, &tags, &table, power);
    let mut bytes = Vec::new();
    DurableCodec::new(&table).encode(&src, node, &mut bytes).unwrap();

    // The rank property changed version since the stream was written.
    let (registry, _) = build_registry(2);
    let mut dst = new_forest(registry, StoreKind::Bucketed);
    let copy = dst.create();
    let report = DurableCodec::new(&table).decode(&mut dst, copy, &bytes).unwrap();
    assert_eq!(report, DecodeReport { applied: 8, skipped: 1 });

    // The asset no longer has a guid mapping.
    let mut sparse = ReferenceTable::new();
    sparse.add_prototype(power, Guid::new(0xa1));
    sparse.add_prototype(PrototypeRef::new(0x300), Guid::new(0xa3));
    sparse.enumerate_prototypes(POWERS, [power]);
    let (registry, _) = build_registry(1);
    let mut dst = new_forest(registry, StoreKind::Bucketed);
    let other = dst.create();
    let report = DurableCodec::new(&sparse).decode(&mut dst, other, &bytes).unwrap();
    assert_eq!(report, DecodeReport { applied: 8, skipped: 1 });
    assert!(!dst.has(other, PropertyKey::new(tags.skin)));
    assert!(dst.has(other, PropertyKey::new(tags.owner)));
}
