// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property-based tests for key packing.

use proptest::prelude::*;
use understory_aggregate::{
    DataType, EnumDomain, KeyError, KeyRange, PropertyInfo, PropertyInfoBuilder, PropertyKey,
    PropertyRegistry, PropertyTag,
};

fn resist() -> (PropertyRegistry, PropertyTag) {
    let mut registry = PropertyRegistry::new();
    registry
        .register("Padding", PropertyInfoBuilder::new(DataType::Integer))
        .unwrap();
    let tag = registry
        .register(
            "Resist",
            PropertyInfoBuilder::new(DataType::Integer)
                .integer_param(1_000)
                .integer_param(3)
                .asset_param(EnumDomain(4), 255),
        )
        .unwrap();
    (registry, tag)
}

fn info(registry: &PropertyRegistry, tag: PropertyTag) -> &PropertyInfo {
    registry.get(tag).unwrap()
}

proptest! {
    #[test]
    fn pack_unpack_round_trip(a in 0_u64..=1_000, b in 0_u64..=3, c in 0_u64..=255) {
        let (registry, tag) = resist();
        let key = registry.encode(tag, &[a, b, c]).unwrap();

        prop_assert_eq!(key.tag(), tag);
        prop_assert_eq!(registry.decode(key).unwrap(), [a, b, c, 0]);
        prop_assert_eq!(PropertyKey::from_reversed(key.reversed()), key);
        prop_assert!(KeyRange::tag(tag).contains(key));
        prop_assert!(info(&registry, tag).param0_range(a).unwrap().contains(key));
    }

    #[test]
    fn key_order_follows_parameter_order(
        a in (0_u64..=1_000, 0_u64..=3),
        b in (0_u64..=1_000, 0_u64..=3),
    ) {
        let (registry, tag) = resist();
        let ka = registry.encode(tag, &[a.0, a.1]).unwrap();
        let kb = registry.encode(tag, &[b.0, b.1]).unwrap();
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    #[test]
    fn overflow_is_rejected(a in 1_001_u64..) {
        let (registry, tag) = resist();
        prop_assert_eq!(
            registry.encode(tag, &[a]),
            Err(KeyError::ParamOverflow { tag, index: 0, value: a, max: 1_000 })
        );
    }
}

#[test]
fn missing_trailing_params_are_zero() {
    let (registry, tag) = resist();
    assert_eq!(
        registry.encode(tag, &[7]).unwrap(),
        registry.encode(tag, &[7, 0, 0]).unwrap()
    );
    assert!(matches!(
        registry.encode(tag, &[0, 0, 0, 0]),
        Err(KeyError::ParamCount { given: 4, expected: 3, .. })
    ));
}

#[test]
fn parameterless_keys_reverse_to_small_numbers() {
    let (registry, tag) = resist();
    let key = PropertyKey::new(tag);
    assert!(!key.has_params());
    assert_eq!(key.reversed(), 1 << 10);
    assert!(registry.encode(tag, &[1]).unwrap().has_params());
}
