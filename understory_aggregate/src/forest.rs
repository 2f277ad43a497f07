// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The aggregation engine.
//!
//! A [`PropertyForest`] owns every property graph node of one simulation and
//! the parent/child edges between them. Each node keeps two stores:
//!
//! - **base**: values written directly to this node;
//! - **aggregate**: the base value folded with every child's aggregate
//!   according to the tag's [`AggregationMethod`], then normalized.
//!
//! Writes update the base store, recompute the aggregate of the written key,
//! notify curve bindings and watchers, and push the key up to every parent.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use smallvec::SmallVec;
use understory_lineage::{CycleHandling, DenseKey, Direction, Lineage, LinkError};

use crate::aggregation::AggregationMethod;
use crate::curve::{CurveBinding, CurveSource, NoCurves};
use crate::key::{KeyRange, PropertyKey, PropertyTag};
use crate::metadata::{KeyError, PropertyInfo};
use crate::reference::CurveRef;
use crate::registry::PropertyRegistry;
use crate::store::{PropertyStore, StoreIter, StoreKind, ValueStore};
use crate::value::{DataType, PropertyValue, TypedValue};
use crate::watcher::{PropertyChange, PropertyWatcher, SetFlags, WatcherId};

/// Stable handle of a node in a [`PropertyForest`].
///
/// Handles carry a generation, so a handle of a destroyed node never aliases
/// a node created later in the same slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct GraphId {
    index: u32,
    generation: u32,
}

impl GraphId {
    /// Generation of the slot this handle points to.
    #[must_use]
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl DenseKey for GraphId {
    #[inline]
    fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphId({}v{})", self.index, self.generation)
    }
}

/// Options of a [`PropertyForest`].
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{CycleHandling, GraphConfig, StoreKind};
///
/// let config = GraphConfig::new()
///     .with_store(StoreKind::Flat)
///     .with_cycle_handling(CycleHandling::Error);
/// assert_eq!(config.store(), StoreKind::Flat);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphConfig {
    store: StoreKind,
    cycle_handling: CycleHandling,
}

impl GraphConfig {
    /// Bucketed stores and [`CycleHandling::DebugAssert`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage strategy of new nodes.
    #[must_use]
    pub fn with_store(mut self, store: StoreKind) -> Self {
        self.store = store;
        self
    }

    /// Sets what [`PropertyForest::add_child`] does about cycles.
    #[must_use]
    pub fn with_cycle_handling(mut self, cycle_handling: CycleHandling) -> Self {
        self.cycle_handling = cycle_handling;
        self
    }

    /// Storage strategy of new nodes.
    #[must_use]
    #[inline]
    pub fn store(&self) -> StoreKind {
        self.store
    }

    /// Cycle policy of [`PropertyForest::add_child`].
    #[must_use]
    #[inline]
    pub fn cycle_handling(&self) -> CycleHandling {
        self.cycle_handling
    }
}

/// Error returned by fallible [`PropertyForest`] operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An edge could not be added or removed.
    #[error(transparent)]
    Link(#[from] LinkError<GraphId>),
    /// A key could not be packed.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// A node cannot be destroyed while it has edges.
    #[error("{graph:?} still has {parents} parents and {children} children")]
    StillLinked {
        /// The node.
        graph: GraphId,
        /// Remaining parents.
        parents: usize,
        /// Remaining children.
        children: usize,
    },
    /// The key's tag is not registered.
    #[error("unknown property tag {tag:?}")]
    UnknownTag {
        /// The tag.
        tag: PropertyTag,
    },
    /// Only curve properties can be bound to curves.
    #[error("{key:?} is not a curve property")]
    NotCurveProperty {
        /// The key.
        key: PropertyKey,
    },
    /// The curve source does not define the curve.
    #[error("curve {curve:?} is not defined")]
    UnsetCurve {
        /// The curve.
        curve: CurveRef,
    },
    /// A curve property cannot be indexed by itself.
    #[error("{key:?} cannot be its own curve index")]
    SelfIndexedCurve {
        /// The key.
        key: PropertyKey,
    },
    /// The index chain of the new binding leads back to the bound key.
    #[error("binding {key:?} would close a loop of curve indices")]
    CurveCycle {
        /// The key being bound.
        key: PropertyKey,
    },
}

struct WatcherEntry {
    id: WatcherId,
    /// `None` while the watcher is running.
    watcher: Option<Box<dyn PropertyWatcher>>,
}

struct Node {
    base: PropertyStore,
    aggregate: PropertyStore,
    curves: HashMap<PropertyKey, CurveBinding>,
    watchers: Vec<WatcherEntry>,
}

impl Node {
    fn new(kind: StoreKind) -> Self {
        Self {
            base: PropertyStore::new(kind),
            aggregate: PropertyStore::new(kind),
            curves: HashMap::new(),
            watchers: Vec::new(),
        }
    }
}

struct NodeSlot {
    generation: u32,
    node: Option<Node>,
}

/// An arena of property graph nodes plus their parent/child edges.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use understory_aggregate::{
///     AggregationMethod, DataType, PropertyForest, PropertyInfoBuilder, PropertyKey,
///     PropertyRegistry,
/// };
///
/// let mut registry = PropertyRegistry::new();
/// let damage = registry
///     .register(
///         "DamageBonus",
///         PropertyInfoBuilder::new(DataType::Integer).aggregate(AggregationMethod::Sum),
///     )
///     .unwrap();
/// let key = PropertyKey::new(damage);
///
/// let mut forest = PropertyForest::new(Arc::new(registry));
/// let avatar = forest.create();
/// let sword = forest.create();
/// let ring = forest.create();
/// forest.add_child(avatar, sword).unwrap();
/// forest.add_child(avatar, ring).unwrap();
///
/// forest.set(sword, key, 10_i64);
/// forest.set(ring, key, 5_i64);
/// forest.set(avatar, key, 1_i64);
/// assert_eq!(forest.get_int(avatar, key), 16);
///
/// forest.remove_child(avatar, ring).unwrap();
/// assert_eq!(forest.get_int(avatar, key), 11);
/// ```
pub struct PropertyForest {
    registry: Arc<PropertyRegistry>,
    curves: Box<dyn CurveSource>,
    config: GraphConfig,
    slots: Vec<NodeSlot>,
    free: Vec<u32>,
    live: usize,
    lineage: Lineage<GraphId>,
    next_watcher: u32,
}

impl fmt::Debug for PropertyForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyForest")
            .field("nodes", &self.live)
            .field("config", &self.config)
            .field("lineage", &self.lineage)
            .finish_non_exhaustive()
    }
}

impl PropertyForest {
    /// Creates an empty forest with no curves and the default [`GraphConfig`].
    #[must_use]
    pub fn new(registry: Arc<PropertyRegistry>) -> Self {
        Self::with_config(registry, GraphConfig::default())
    }

    /// Creates an empty forest with `config`.
    #[must_use]
    pub fn with_config(registry: Arc<PropertyRegistry>, config: GraphConfig) -> Self {
        Self {
            registry,
            curves: Box::new(NoCurves),
            config,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            lineage: Lineage::new(),
            next_watcher: 0,
        }
    }

    /// Replaces the curve source.
    #[must_use]
    pub fn with_curves(mut self, curves: impl CurveSource + 'static) -> Self {
        self.curves = Box::new(curves);
        self
    }

    /// The metadata registry.
    #[must_use]
    #[inline]
    pub fn registry(&self) -> &Arc<PropertyRegistry> {
        &self.registry
    }

    /// The forest options.
    #[must_use]
    #[inline]
    pub fn config(&self) -> GraphConfig {
        self.config
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    /// Creates an empty node.
    pub fn create(&mut self) -> GraphId {
        let node = Node::new(self.config.store);
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return GraphId {
                index,
                generation: slot.generation,
            };
        }
        let index =
            u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("too many graph nodes"));
        self.slots.push(NodeSlot {
            generation: 0,
            node: Some(node),
        });
        GraphId {
            index,
            generation: 0,
        }
    }

    /// Destroys a node that has no parents and no children.
    ///
    /// Remaining watchers are detached and dropped.
    ///
    /// # Errors
    ///
    /// [`GraphError::StillLinked`] if the node still has edges.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale.
    pub fn destroy(&mut self, id: GraphId) -> Result<(), GraphError> {
        let _ = self.node(id);
        let parents = self.lineage.parent_count(id);
        let children = self.lineage.child_count(id);
        if parents + children > 0 {
            return Err(GraphError::StillLinked {
                graph: id,
                parents,
                children,
            });
        }

        self.remove_all_watchers(id);
        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        self.lineage.remove_key(id);
        tracing::debug!(graph = ?id, "destroyed property graph");
        Ok(())
    }

    /// Returns `true` if `id` refers to a live node.
    #[must_use]
    pub fn contains(&self, id: GraphId) -> bool {
        self.try_node(id).is_some()
    }

    /// Number of live nodes.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if there are no live nodes.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn try_node(&self, id: GraphId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?
            .node
            .as_ref()
    }

    fn try_node_mut(&mut self, id: GraphId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?
            .node
            .as_mut()
    }

    fn node(&self, id: GraphId) -> &Node {
        match self.try_node(id) {
            Some(node) => node,
            None => panic!("stale graph handle {id:?}"),
        }
    }

    fn node_mut(&mut self, id: GraphId) -> &mut Node {
        match self.try_node_mut(id) {
            Some(node) => node,
            None => panic!("stale graph handle {id:?}"),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Aggregate value of `key`, or the tag's default.
    ///
    /// # Panics
    ///
    /// Panics if `id` is stale. The same holds for every method taking a
    /// [`GraphId`].
    #[must_use]
    pub fn get(&self, id: GraphId, key: PropertyKey) -> PropertyValue {
        self.node(id)
            .aggregate
            .get(key)
            .unwrap_or_else(|| self.registry.default_value(key.tag()))
    }

    /// Aggregate value of `key` interpreted with the tag's data type.
    #[must_use]
    pub fn get_typed(&self, id: GraphId, key: PropertyKey) -> TypedValue {
        self.get(id, key).typed(self.registry.data_type(key.tag()))
    }

    /// Aggregate value of `key` as an integer.
    #[must_use]
    pub fn get_int(&self, id: GraphId, key: PropertyKey) -> i64 {
        self.get(id, key).as_int()
    }

    /// Aggregate value of `key` as a real.
    #[must_use]
    pub fn get_real(&self, id: GraphId, key: PropertyKey) -> f32 {
        self.get(id, key).as_real()
    }

    /// Aggregate value of `key` as a boolean.
    #[must_use]
    pub fn get_bool(&self, id: GraphId, key: PropertyKey) -> bool {
        self.get(id, key).as_bool()
    }

    /// Value written directly to this node, if any.
    #[must_use]
    pub fn base_value(&self, id: GraphId, key: PropertyKey) -> Option<PropertyValue> {
        self.node(id).base.get(key)
    }

    /// Returns `true` if a value was written directly to this node.
    #[must_use]
    pub fn has_base(&self, id: GraphId, key: PropertyKey) -> bool {
        self.node(id).base.contains(key)
    }

    /// Returns `true` if `key` has an aggregate value.
    #[must_use]
    pub fn has(&self, id: GraphId, key: PropertyKey) -> bool {
        self.node(id).aggregate.contains(key)
    }

    /// Returns `true` if any key of `tag` has an aggregate value.
    #[must_use]
    pub fn has_tag(&self, id: GraphId, tag: PropertyTag) -> bool {
        self.iter_tag(id, tag).next().is_some()
    }

    /// Number of aggregate values of `tag`.
    #[must_use]
    pub fn count_in_range(&self, id: GraphId, tag: PropertyTag) -> usize {
        self.node(id).aggregate.count_in_range(KeyRange::tag(tag))
    }

    /// Iterates the aggregate values in key order.
    pub fn iter(&self, id: GraphId) -> StoreIter<'_> {
        self.node(id).aggregate.iter()
    }

    /// Iterates the base values in key order.
    pub fn iter_base(&self, id: GraphId) -> StoreIter<'_> {
        self.node(id).base.iter()
    }

    /// Iterates the aggregate values of `tag`.
    pub fn iter_tag(&self, id: GraphId, tag: PropertyTag) -> StoreIter<'_> {
        self.node(id).aggregate.range(KeyRange::tag(tag))
    }

    /// Iterates the aggregate values of `tag` whose first parameter is
    /// `param0`.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownTag`] for an unregistered tag and
    /// [`GraphError::Key`] when the tag has no parameters or `param0` is out
    /// of range.
    pub fn iter_tag_param0(
        &self,
        id: GraphId,
        tag: PropertyTag,
        param0: u64,
    ) -> Result<StoreIter<'_>, GraphError> {
        let info = self.registry.get(tag).ok_or(GraphError::UnknownTag { tag })?;
        let range = info.param0_range(param0)?;
        Ok(self.node(id).aggregate.range(range))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes `value` to the base store of `key`.
    ///
    /// The value is normalized first; a value equal to the default removes the
    /// base entry instead. Returns `true` if the base store changed.
    pub fn set(&mut self, id: GraphId, key: PropertyKey, value: impl Into<PropertyValue>) -> bool {
        self.set_with_flags(id, key, value.into(), SetFlags::empty())
    }

    /// [`set`](Self::set) with explicit flags.
    ///
    /// With [`SetFlags::REFRESH`] the aggregate is recomputed and watchers are
    /// notified even when nothing changed, and the call returns `true`.
    pub fn set_with_flags(
        &mut self,
        id: GraphId,
        key: PropertyKey,
        value: PropertyValue,
        flags: SetFlags,
    ) -> bool {
        let _ = self.node(id);
        let registry = Arc::clone(&self.registry);
        let Some(info) = registry.get(key.tag()) else {
            tracing::warn!(?key, "unknown property tag");
            return false;
        };

        let value = info.normalize(value);
        let node = self.node_mut(id);
        let changed = if value == info.default_value() {
            node.base.remove(key).is_some()
        } else {
            node.base.get_or_set(key, value).changed
        };

        let refresh = flags.contains(SetFlags::REFRESH);
        if changed || refresh {
            self.recompute(id, key, info, flags);
        }
        changed || refresh
    }

    /// Removes the base value and curve binding of `key`.
    ///
    /// Returns `true` if a base value was removed.
    pub fn remove(&mut self, id: GraphId, key: PropertyKey) -> bool {
        let _ = self.node(id);
        let registry = Arc::clone(&self.registry);
        let Some(info) = registry.get(key.tag()) else {
            tracing::warn!(?key, "unknown property tag");
            return false;
        };

        let node = self.node_mut(id);
        node.curves.remove(&key);
        if node.base.remove(key).is_none() {
            return false;
        }
        self.recompute(id, key, info, SetFlags::empty());
        true
    }

    /// Removes every base value of `tag`, returning how many were removed.
    pub fn remove_tag(&mut self, id: GraphId, tag: PropertyTag) -> usize {
        let keys: Vec<PropertyKey> = self
            .node(id)
            .base
            .range(KeyRange::tag(tag))
            .map(|(key, _)| key)
            .collect();
        keys.into_iter().filter(|&key| self.remove(id, key)).count()
    }

    /// Adds `delta` to the base value (or default) of an integer `key`.
    pub fn adjust_int(&mut self, id: GraphId, key: PropertyKey, delta: i64) -> bool {
        if delta == 0 {
            return false;
        }
        let current = self
            .base_value(id, key)
            .unwrap_or_else(|| self.registry.default_value(key.tag()));
        self.set(id, key, current.as_int().saturating_add(delta))
    }

    /// Adds `delta` to the base value (or default) of a real `key`.
    pub fn adjust_real(&mut self, id: GraphId, key: PropertyKey, delta: f32) -> bool {
        if delta == 0.0 {
            return false;
        }
        let current = self
            .base_value(id, key)
            .unwrap_or_else(|| self.registry.default_value(key.tag()));
        self.set(id, key, current.as_real() + delta)
    }

    /// Writes the aggregate value of `key` on `src` to the base of `dst`.
    ///
    /// Does nothing if `src` has no value for `key`.
    pub fn copy_property(&mut self, dst: GraphId, src: GraphId, key: PropertyKey) -> bool {
        match self.node(src).aggregate.get(key) {
            Some(value) => self.set(dst, key, value),
            None => false,
        }
    }

    /// Writes every aggregate value of `tag` on `src` to the base of `dst`.
    ///
    /// Returns the number of values copied.
    pub fn copy_range(&mut self, dst: GraphId, src: GraphId, tag: PropertyTag) -> usize {
        let entries: Vec<_> = self.iter_tag(src, tag).collect();
        let count = entries.len();
        for (key, value) in entries {
            self.set(dst, key, value);
        }
        count
    }

    /// Flattens the aggregate values and curve bindings of `src` into `dst`.
    ///
    /// With `clean`, `dst` is [cleared](Self::clear) first and the copied
    /// bindings are evaluated. Without it, the values are combined on top of
    /// the existing state and every binding of `dst` is re-evaluated.
    ///
    /// # Errors
    ///
    /// As [`clear`](Self::clear).
    pub fn copy_from(&mut self, dst: GraphId, src: GraphId, clean: bool) -> Result<(), GraphError> {
        if dst == src {
            let _ = self.node(dst);
            return Ok(());
        }
        if clean {
            self.clear(dst)?;
        }

        let source = self.node(src);
        let entries: Vec<_> = source.aggregate.iter().collect();
        let mut bindings: Vec<_> = source.curves.iter().map(|(&k, &b)| (k, b)).collect();

        for (key, value) in entries {
            self.set(dst, key, value);
        }
        bindings.retain(|&(key, binding)| {
            let index_key = binding.index_key();
            let closes_loop = self.curve_chain_reaches(dst, index_key, key);
            if closes_loop {
                tracing::warn!(?key, ?index_key, "curve binding skipped, it would close a loop");
            } else {
                self.node_mut(dst).curves.insert(key, binding);
            }
            !closes_loop
        });

        let to_update = if clean {
            bindings
        } else {
            self.node(dst).curves.iter().map(|(&k, &b)| (k, b)).collect()
        };
        for (key, binding) in to_update {
            self.update_curve_value(dst, key, binding, SetFlags::empty());
        }
        Ok(())
    }

    /// Clears base values and curve bindings, removes every child and
    /// rebuilds the aggregate store.
    ///
    /// Removed aggregate values are reported to watchers and parents.
    ///
    /// # Errors
    ///
    /// [`GraphError::Link`] if the child list is protected.
    pub fn clear(&mut self, id: GraphId) -> Result<(), GraphError> {
        self.remove_all_children(id)?;

        let node = self.node_mut(id);
        node.base.clear();
        node.curves.clear();
        let keys: Vec<PropertyKey> = node.aggregate.iter().map(|(key, _)| key).collect();

        let registry = Arc::clone(&self.registry);
        for key in keys {
            match registry.get(key.tag()) {
                Some(info) => self.recompute(id, key, info, SetFlags::empty()),
                None => {
                    self.node_mut(id).aggregate.remove(key);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Re-derives the aggregate of `key` on `id` and propagates it upwards.
    fn recompute(&mut self, id: GraphId, key: PropertyKey, info: &PropertyInfo, flags: SetFlags) {
        let mut aggregate = self.node(id).base.get(key);

        if info.aggregation() != AggregationMethod::None {
            self.lineage.protect(id, Direction::Children);
            for &child in self.lineage.neighbours(id, Direction::Children) {
                let Some(value) = self.node(child).aggregate.get(key) else {
                    continue;
                };
                aggregate = Some(match aggregate {
                    Some(acc) => info.fold(acc, value),
                    None => value,
                });
            }
            self.lineage.release(id, Direction::Children);
        }

        let aggregate = aggregate.map(|value| info.normalize(value));
        let default = info.default_value();
        let refresh = flags.contains(SetFlags::REFRESH);
        let node = self.node_mut(id);
        let change = match aggregate {
            Some(value) => {
                let outcome = node.aggregate.get_or_set(key, value);
                (outcome.changed || refresh).then(|| (value, outcome.previous.unwrap_or(default)))
            }
            None => node.aggregate.remove(key).map(|old| (default, old)),
        };
        tracing::trace!(graph = ?id, ?key, ?aggregate, changed = change.is_some(), "recomputed");

        let Some((new_value, old_value)) = change else {
            return;
        };
        self.on_change(id, key, new_value, old_value, flags);

        // The watchers may have destroyed this node.
        if !self.contains(id) {
            return;
        }
        self.lineage.protect(id, Direction::Parents);
        let parents: SmallVec<[GraphId; 4]> = self.lineage.parents(id).collect();
        for parent in parents {
            self.recompute(parent, key, info, flags);
        }
        self.lineage.release(id, Direction::Parents);
    }

    /// Re-evaluates curves indexed by `key`, then notifies watchers.
    fn on_change(
        &mut self,
        id: GraphId,
        key: PropertyKey,
        new_value: PropertyValue,
        old_value: PropertyValue,
        flags: SetFlags,
    ) {
        let dependents: SmallVec<[(PropertyKey, CurveBinding); 2]> = self
            .node(id)
            .curves
            .iter()
            .filter(|(_, binding)| binding.index_key() == key)
            .map(|(&k, &b)| (k, b))
            .collect();
        for (curve_key, binding) in dependents {
            self.update_curve_value(id, curve_key, binding, flags - SetFlags::REFRESH);
        }

        self.notify(
            id,
            &PropertyChange {
                graph: id,
                key,
                new_value,
                old_value,
                flags,
            },
        );
    }

    fn notify(&mut self, id: GraphId, change: &PropertyChange) {
        let Some(node) = self.try_node(id) else {
            return;
        };
        let ids: SmallVec<[WatcherId; 4]> = node.watchers.iter().map(|w| w.id).collect();
        for watcher_id in ids {
            let Some(mut watcher) = self.take_watcher(id, watcher_id) else {
                continue;
            };
            watcher.on_property_change(self, change);
            self.restore_watcher(id, watcher_id, watcher);
        }
    }

    fn take_watcher(
        &mut self,
        id: GraphId,
        watcher_id: WatcherId,
    ) -> Option<Box<dyn PropertyWatcher>> {
        self.try_node_mut(id)?
            .watchers
            .iter_mut()
            .find(|entry| entry.id == watcher_id)?
            .watcher
            .take()
    }

    fn restore_watcher(
        &mut self,
        id: GraphId,
        watcher_id: WatcherId,
        mut watcher: Box<dyn PropertyWatcher>,
    ) {
        let Some(node) = self.try_node_mut(id) else {
            // The node was destroyed from inside the callback.
            watcher.detach(id, false);
            return;
        };
        match node.watchers.iter_mut().find(|entry| entry.id == watcher_id) {
            Some(entry) => entry.watcher = Some(watcher),
            None => watcher.detach(id, true),
        }
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    /// Adds `child` under `parent` and aggregates its values upwards at once.
    ///
    /// Returns `Ok(false)` if the edge already existed or the configured
    /// [`CycleHandling`] silently refused it.
    ///
    /// # Errors
    ///
    /// [`GraphError::Link`] for self links, protected edge lists, a `child`
    /// that is already a parent of `parent`, and longer cycles under
    /// [`CycleHandling::Error`].
    pub fn add_child(&mut self, parent: GraphId, child: GraphId) -> Result<bool, GraphError> {
        let _ = (self.node(parent), self.node(child));
        if !self.lineage.link(parent, child, self.config.cycle_handling)? {
            return Ok(false);
        }
        self.reaggregate_from(parent, child);
        Ok(true)
    }

    /// Removes `child` from `parent` and re-aggregates the remaining children.
    ///
    /// Returns `Ok(false)` if there was no such edge.
    ///
    /// # Errors
    ///
    /// [`GraphError::Link`] if either edge list is protected.
    pub fn remove_child(&mut self, parent: GraphId, child: GraphId) -> Result<bool, GraphError> {
        let _ = (self.node(parent), self.node(child));
        if !self.lineage.unlink(parent, child)? {
            return Ok(false);
        }
        self.reaggregate_from(parent, child);
        Ok(true)
    }

    /// Same as [`remove_child`](Self::remove_child) seen from the child.
    ///
    /// # Errors
    ///
    /// As [`remove_child`](Self::remove_child).
    pub fn remove_from_parent(
        &mut self,
        child: GraphId,
        parent: GraphId,
    ) -> Result<bool, GraphError> {
        self.remove_child(parent, child)
    }

    /// Detaches `child` from every parent, returning how many there were.
    ///
    /// # Errors
    ///
    /// As [`remove_child`](Self::remove_child); parents handled before the
    /// error stay detached.
    pub fn remove_from_all_parents(&mut self, child: GraphId) -> Result<usize, GraphError> {
        let parents: Vec<GraphId> = self.parents(child).collect();
        for &parent in &parents {
            self.remove_child(parent, child)?;
        }
        Ok(parents.len())
    }

    /// Detaches every child of `parent`, returning how many there were.
    ///
    /// # Errors
    ///
    /// As [`remove_child`](Self::remove_child); children handled before the
    /// error stay detached.
    pub fn remove_all_children(&mut self, parent: GraphId) -> Result<usize, GraphError> {
        let children: Vec<GraphId> = self.children(parent).collect();
        for &child in &children {
            self.remove_child(parent, child)?;
        }
        Ok(children.len())
    }

    /// Returns `true` if `child` is a direct child of `parent`.
    #[must_use]
    pub fn is_child_of(&self, child: GraphId, parent: GraphId) -> bool {
        self.lineage.is_linked(parent, child)
    }

    /// Returns `true` if `child` is a direct child of `parent`.
    #[must_use]
    pub fn has_child(&self, parent: GraphId, child: GraphId) -> bool {
        self.lineage.is_linked(parent, child)
    }

    /// Direct children of `id`, in link order.
    pub fn children(&self, id: GraphId) -> impl Iterator<Item = GraphId> + '_ {
        self.lineage.children(id)
    }

    /// Direct parents of `id`, in link order.
    pub fn parents(&self, id: GraphId) -> impl Iterator<Item = GraphId> + '_ {
        self.lineage.parents(id)
    }

    /// Returns `true` while a traversal of `id`'s `direction` edges is active.
    ///
    /// Observable from watchers, which run inside such traversals.
    #[must_use]
    pub fn is_protected(&self, id: GraphId, direction: Direction) -> bool {
        self.lineage.is_protected(id, direction)
    }

    /// Recomputes on `parent` every aggregated key that `child` holds.
    fn reaggregate_from(&mut self, parent: GraphId, child: GraphId) {
        let keys: Vec<PropertyKey> = self.node(child).aggregate.iter().map(|(k, _)| k).collect();
        let registry = Arc::clone(&self.registry);
        for key in keys {
            let Some(info) = registry.get(key.tag()) else {
                continue;
            };
            if info.aggregation() != AggregationMethod::None && self.contains(parent) {
                self.recompute(parent, key, info, SetFlags::empty());
            }
        }
    }

    // =========================================================================
    // Curves
    // =========================================================================

    /// Binds the curve property `key` to `curve`, indexed by the aggregate
    /// value of `index_key`, and evaluates it.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownTag`] if either tag is unregistered.
    /// - [`GraphError::NotCurveProperty`] if `key` is not curve-typed.
    /// - [`GraphError::UnsetCurve`] if the curve source lacks `curve`.
    /// - [`GraphError::SelfIndexedCurve`] if `index_key == key`.
    /// - [`GraphError::CurveCycle`] if `index_key` is itself curve-derived,
    ///   directly or through other bindings, from `key`.
    pub fn set_curve(
        &mut self,
        id: GraphId,
        key: PropertyKey,
        curve: CurveRef,
        index_key: PropertyKey,
    ) -> Result<(), GraphError> {
        let _ = self.node(id);
        let info = self
            .registry
            .get(key.tag())
            .ok_or(GraphError::UnknownTag { tag: key.tag() })?;
        if !info.is_curve_property() {
            return Err(GraphError::NotCurveProperty { key });
        }
        if self.registry.get(index_key.tag()).is_none() {
            return Err(GraphError::UnknownTag {
                tag: index_key.tag(),
            });
        }
        if !curve.is_valid() || !self.curves.contains(curve) {
            return Err(GraphError::UnsetCurve { curve });
        }
        if index_key == key {
            return Err(GraphError::SelfIndexedCurve { key });
        }
        if self.curve_chain_reaches(id, index_key, key) {
            return Err(GraphError::CurveCycle { key });
        }

        let binding = CurveBinding::new(curve, index_key);
        self.node_mut(id).curves.insert(key, binding);
        self.update_curve_value(id, key, binding, SetFlags::empty());
        Ok(())
    }

    /// Returns `true` if following the bindings of `id` from `from` (to its
    /// index key, then that key's index key, ...) arrives at `target`.
    fn curve_chain_reaches(&self, id: GraphId, from: PropertyKey, target: PropertyKey) -> bool {
        let curves = &self.node(id).curves;
        let mut next = from;
        // Existing bindings never loop, so the chain is at most this long.
        for _ in 0..=curves.len() {
            if next == target {
                return true;
            }
            match curves.get(&next) {
                Some(binding) => next = binding.index_key(),
                None => return false,
            }
        }
        false
    }

    /// The curve binding of `key`, if any.
    #[must_use]
    pub fn curve_binding(&self, id: GraphId, key: PropertyKey) -> Option<CurveBinding> {
        self.node(id).curves.get(&key).copied()
    }

    /// The curve bound to `key`, or [`CurveRef::INVALID`].
    #[must_use]
    pub fn curve_for(&self, id: GraphId, key: PropertyKey) -> CurveRef {
        if !self.registry.is_curve_property(key.tag()) {
            tracing::warn!(?key, "not a curve property");
            return CurveRef::INVALID;
        }
        self.curve_binding(id, key)
            .map_or(CurveRef::INVALID, |binding| binding.curve())
    }

    /// The index key of the curve bound to `key`, if any.
    #[must_use]
    pub fn curve_index_key(&self, id: GraphId, key: PropertyKey) -> Option<PropertyKey> {
        if !self.registry.is_curve_property(key.tag()) {
            tracing::warn!(?key, "not a curve property");
            return None;
        }
        self.curve_binding(id, key).map(|binding| binding.index_key())
    }

    /// Evaluates `binding` and writes the result to the base of `key`.
    fn update_curve_value(
        &mut self,
        id: GraphId,
        key: PropertyKey,
        binding: CurveBinding,
        flags: SetFlags,
    ) {
        let registry = Arc::clone(&self.registry);
        let Some(info) = registry.get(key.tag()) else {
            return;
        };

        let index_value = self.get(id, binding.index_key());
        let index = curve_index(index_value, registry.data_type(binding.index_key().tag()));
        let result = match self.curves.evaluate(binding.curve(), index) {
            Some(result) => result,
            None => {
                tracing::warn!(curve = ?binding.curve(), index, "curve has no value");
                match info.curve_default() {
                    Some(fallback) => fallback,
                    None => return,
                }
            }
        };

        let value = info.normalize(PropertyValue::from_real(result));
        let node = self.node_mut(id);
        let changed = if value == info.default_value() {
            node.base.remove(key).is_some()
        } else {
            node.base.get_or_set(key, value).changed
        };
        if changed || flags.contains(SetFlags::REFRESH) {
            self.recompute(id, key, info, flags);
        }
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// Attaches `watcher` to `id` and replays every current aggregate value
    /// to it with [`SetFlags::REFRESH`].
    pub fn attach_watcher(
        &mut self,
        id: GraphId,
        watcher: impl PropertyWatcher + 'static,
    ) -> WatcherId {
        let watcher_id = WatcherId(self.next_watcher);
        self.next_watcher = self.next_watcher.wrapping_add(1);

        let mut watcher: Box<dyn PropertyWatcher> = Box::new(watcher);
        watcher.attach(id);
        let entries: Vec<_> = self.iter(id).collect();

        for (key, value) in entries {
            watcher.on_property_change(
                self,
                &PropertyChange {
                    graph: id,
                    key,
                    new_value: value,
                    old_value: value,
                    flags: SetFlags::REFRESH,
                },
            );
        }
        match self.try_node_mut(id) {
            Some(node) => node.watchers.push(WatcherEntry {
                id: watcher_id,
                watcher: Some(watcher),
            }),
            None => watcher.detach(id, false),
        }
        watcher_id
    }

    /// Detaches a watcher and hands it back.
    ///
    /// Returns `None` for an unknown id, or when called from inside the
    /// watcher's own callback; in that case the watcher is detached and
    /// dropped when the callback returns.
    pub fn detach_watcher(
        &mut self,
        id: GraphId,
        watcher_id: WatcherId,
    ) -> Option<Box<dyn PropertyWatcher>> {
        let node = self.node_mut(id);
        let pos = node.watchers.iter().position(|entry| entry.id == watcher_id)?;
        let mut watcher = node.watchers.remove(pos).watcher?;
        watcher.detach(id, true);
        Some(watcher)
    }

    /// Detaches and drops every watcher of `id`, returning how many there were.
    pub fn remove_all_watchers(&mut self, id: GraphId) -> usize {
        let entries = core::mem::take(&mut self.node_mut(id).watchers);
        let count = entries.len();
        for mut watcher in entries.into_iter().filter_map(|entry| entry.watcher) {
            watcher.detach(id, false);
        }
        count
    }

    /// Number of watchers attached to `id`.
    #[must_use]
    pub fn watcher_count(&self, id: GraphId) -> usize {
        self.node(id).watchers.len()
    }
}

/// Converts an index property value to a curve index.
#[expect(
    clippy::cast_possible_truncation,
    reason = "curve indices saturate to i32"
)]
fn curve_index(value: PropertyValue, data_type: DataType) -> i32 {
    if data_type.is_real() {
        value.as_real() as i32
    } else {
        value.as_int().clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }
}
