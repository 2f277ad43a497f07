// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `understory_aggregate`.

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::vec::Vec;

use understory_aggregate::{
    AggregationMethod, BucketStore, DataType, FastCodec, FlatStore, GraphConfig, GraphId,
    KeyRange, PropertyFlags, PropertyForest, PropertyInfoBuilder, PropertyKey, PropertyRegistry,
    PropertyTag, PropertyValue, StoreKind, ValueStore, WireMode,
};

fn registry() -> (Arc<PropertyRegistry>, PropertyTag, PropertyTag) {
    let mut registry = PropertyRegistry::new();
    let damage = registry
        .register(
            "Damage",
            PropertyInfoBuilder::new(DataType::Integer)
                .aggregate(AggregationMethod::Sum)
                .flags(PropertyFlags::REPLICATED),
        )
        .unwrap();
    let resist = registry
        .register(
            "Resist",
            PropertyInfoBuilder::new(DataType::Real)
                .aggregate(AggregationMethod::Max)
                .integer_param(255)
                .flags(PropertyFlags::REPLICATED),
        )
        .unwrap();
    (Arc::new(registry), damage, resist)
}

/// A chain `0 <- 1 <- ... <- depth-1`, each level with `fanout` extra leaves.
fn chain(forest: &mut PropertyForest, depth: usize, fanout: usize) -> Vec<GraphId> {
    let mut spine: Vec<GraphId> = Vec::with_capacity(depth);
    for _ in 0..depth {
        let node = forest.create();
        if let Some(&parent) = spine.last() {
            forest.add_child(parent, node).unwrap();
        }
        for _ in 0..fanout {
            let leaf = forest.create();
            forest.add_child(node, leaf).unwrap();
        }
        spine.push(node);
    }
    spine
}

fn bench_propagate(c: &mut Criterion) {
    let (registry, damage, _) = registry();
    let key = PropertyKey::new(damage);
    let mut group = c.benchmark_group("aggregate/propagate");

    for depth in [1_usize, 4, 16] {
        group.bench_function(BenchmarkId::new("set_leaf", depth), |b| {
            let mut forest = PropertyForest::new(registry.clone());
            let spine = chain(&mut forest, depth, 4);
            let leaf = *spine.last().unwrap();
            let mut value = 0_i64;
            b.iter(|| {
                value += 1;
                black_box(forest.set(leaf, key, value));
            });
        });
    }

    group.bench_function("add_remove_child", |b| {
        let mut forest = PropertyForest::new(registry.clone());
        let parent = forest.create();
        let child = forest.create();
        forest.set(child, key, 5_i64);
        b.iter(|| {
            forest.add_child(parent, child).unwrap();
            forest.remove_child(parent, child).unwrap();
        });
    });

    group.finish();
}

fn fill<S: ValueStore>(store: &mut S, keys: &[PropertyKey]) {
    for (i, &key) in keys.iter().enumerate() {
        store.get_or_set(key, PropertyValue::from_int(i as i64 + 1));
    }
}

fn bench_stores(c: &mut Criterion) {
    let (registry, damage, resist) = registry();
    let info = registry.get(resist).unwrap();
    let keys: Vec<PropertyKey> = core::iter::once(PropertyKey::new(damage))
        .chain((0..64).map(|p| info.encode_key(&[p]).unwrap()))
        .collect();

    let mut group = c.benchmark_group("aggregate/store");

    let mut flat = FlatStore::new();
    fill(&mut flat, &keys);
    let mut bucket = BucketStore::new();
    fill(&mut bucket, &keys);

    group.bench_function("get/flat", |b| {
        b.iter(|| {
            for &key in &keys {
                black_box(flat.get(key));
            }
        });
    });
    group.bench_function("get/bucketed", |b| {
        b.iter(|| {
            for &key in &keys {
                black_box(bucket.get(key));
            }
        });
    });
    group.bench_function("range/flat", |b| {
        b.iter(|| black_box(flat.count_in_range(KeyRange::tag(resist))));
    });
    group.bench_function("range/bucketed", |b| {
        b.iter(|| black_box(bucket.count_in_range(KeyRange::tag(resist))));
    });
    group.bench_function("fill/bucketed", |b| {
        b.iter_batched(
            BucketStore::new,
            |mut store| {
                fill(&mut store, &keys);
                black_box(store);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_wire(c: &mut Criterion) {
    let (registry, damage, resist) = registry();
    let mut forest =
        PropertyForest::with_config(registry.clone(), GraphConfig::new().with_store(StoreKind::Flat));
    let node = forest.create();
    forest.set(node, PropertyKey::new(damage), 40_i64);
    for p in 0..32 {
        let key = registry.encode(resist, &[p]).unwrap();
        forest.set(node, key, 0.5_f32);
    }

    let codec = FastCodec::new(WireMode::Replication);
    let mut bytes = Vec::new();
    codec.encode(&forest, node, &mut bytes).unwrap();

    let mut group = c.benchmark_group("aggregate/wire");
    group.bench_function("fast_encode", |b| {
        let mut out = Vec::with_capacity(bytes.len());
        b.iter(|| {
            out.clear();
            black_box(codec.encode(&forest, node, &mut out).unwrap());
        });
    });
    group.bench_function("fast_decode", |b| {
        let target = forest.create();
        b.iter(|| black_box(codec.decode(&mut forest, target, &bytes).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_propagate, bench_stores, bench_wire);
criterion_main!(benches);
