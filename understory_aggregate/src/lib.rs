// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Aggregate: aggregatable game properties.
//!
//! Game entities carry many small numeric and reference-typed properties
//! ("max health", "damage bonus against this faction") whose effective value
//! is the combination of the entity's own value and the values contributed by
//! attached sources such as equipped items, buffs and passive powers. This
//! crate stores those properties and keeps every aggregate current as values
//! change and sources are attached or detached.
//!
//! ## Core Concepts
//!
//! - **Keys** ([`PropertyKey`]): a 64-bit word holding an 11-bit
//!   [`PropertyTag`] and up to four parameters packed into the remaining 53
//!   bits, with layouts declared per tag.
//! - **Values** ([`PropertyValue`]): a raw 64-bit word. Its meaning comes from
//!   the tag's [`DataType`], never from the value itself.
//! - **Metadata** ([`PropertyRegistry`]): per tag, the data type, default,
//!   [`AggregationMethod`], clamp bounds, parameter layout and wire flags.
//! - **Stores** ([`ValueStore`]): sparse maps from key to value, either flat
//!   ([`FlatStore`]) or bucketed by tag ([`BucketStore`]).
//! - **Graphs** ([`PropertyForest`]): nodes with a base store and an aggregate
//!   store, linked in a many-to-many parent/child hierarchy. Writes fold
//!   upwards; curves and watchers react to aggregate changes.
//! - **Wire** ([`FastCodec`], [`DurableCodec`]): encodings of a node's base
//!   values for replication and for storage.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use understory_aggregate::{
//!     AggregationMethod, DataType, PropertyChange, PropertyForest, PropertyInfoBuilder,
//!     PropertyKey, PropertyRegistry, PropertyWatcher,
//! };
//!
//! let mut registry = PropertyRegistry::new();
//! let max_health = registry
//!     .register(
//!         "MaxHealth",
//!         PropertyInfoBuilder::new(DataType::Real).aggregate(AggregationMethod::Max),
//!     )
//!     .unwrap();
//! let key = PropertyKey::new(max_health);
//!
//! struct Count(Rc<Cell<u32>>);
//! impl PropertyWatcher for Count {
//!     fn on_property_change(&mut self, _: &mut PropertyForest, _: &PropertyChange) {
//!         self.0.set(self.0.get() + 1);
//!     }
//! }
//!
//! let mut forest = PropertyForest::new(Arc::new(registry));
//! let avatar = forest.create();
//! let item = forest.create();
//!
//! forest.set(item, key, 50.0_f32);
//! forest.add_child(avatar, item).unwrap();
//! assert_eq!(forest.get_real(avatar, key), 50.0);
//!
//! let changes = Rc::new(Cell::new(0));
//! forest.attach_watcher(avatar, Count(changes.clone()));
//! changes.set(0);
//!
//! forest.set(item, key, 75.0_f32);
//! assert_eq!(forest.get_real(avatar, key), 75.0);
//! assert_eq!(changes.get(), 1);
//! ```
//!
//! ## Reentrancy
//!
//! Watchers receive the forest mutably and may write to it. While a node's
//! children are folded, or its parents are updated, the corresponding edge
//! list is protected: adding or removing an edge there fails with
//! [`GraphError::Link`] instead of invalidating the walk.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

mod aggregation;
mod bucket;
mod curve;
mod flat;
mod forest;
mod key;
mod metadata;
mod reference;
mod registry;
mod store;
mod value;
mod watcher;
mod wire;

pub use aggregation::AggregationMethod;
pub use bucket::BucketStore;
pub use curve::{CurveBinding, CurveSource, CurveTable, NoCurves};
pub use flat::FlatStore;
pub use forest::{GraphConfig, GraphError, GraphId, PropertyForest};
pub use key::{KeyRange, MAX_PARAMS, PARAM_BITS, PropertyKey, PropertyTag, TAG_BITS};
pub use metadata::{
    ClampBounds, ConfigError, KeyError, ParamKind, ParamLayout, PropertyFlags, PropertyInfo,
    PropertyInfoBuilder, PropertyParam,
};
pub use reference::{
    AssetRef, CurveRef, EnumDomain, Guid, PrototypeRef, ReferenceResolver, ReferenceTable,
};
pub use registry::PropertyRegistry;
pub use store::{PropertyStore, SetOutcome, StoreIter, StoreKind, ValueStore};
pub use value::{DataType, Int21Vector3, PropertyValue, TypedValue};
pub use watcher::{PropertyChange, PropertyWatcher, SetFlags, WatcherId};
pub use wire::{DecodeError, DecodeReport, DurableCodec, FastCodec, WireError, WireMode};

pub use understory_lineage::{CycleHandling, Direction, LinkError};
