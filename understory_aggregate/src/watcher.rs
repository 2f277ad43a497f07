// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Change notification.

use crate::forest::{GraphId, PropertyForest};
use crate::key::PropertyKey;
use crate::value::PropertyValue;

bitflags::bitflags! {
    /// Hints passed along with a write and its notifications.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SetFlags: u8 {
        /// The value was read from a wire stream.
        const DESERIALIZED = 1 << 0;
        /// Recompute and notify even if nothing changed.
        const REFRESH = 1 << 1;
        /// The value came from durable storage.
        const PERSISTENT = 1 << 2;
    }
}

/// One aggregate change delivered to a [`PropertyWatcher`].
///
/// A value that became absent is reported as the tag's default.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PropertyChange {
    /// Node whose aggregate changed.
    pub graph: GraphId,
    /// Changed key.
    pub key: PropertyKey,
    /// Aggregate after the change.
    pub new_value: PropertyValue,
    /// Aggregate before the change.
    pub old_value: PropertyValue,
    /// Flags of the write that caused the change.
    pub flags: SetFlags,
}

/// Observer of a node's aggregate values.
///
/// The watcher receives the forest mutably and may write to it, including to
/// the node it watches. While it runs it is taken out of its slot, so it is
/// never called reentrantly.
///
/// Changes caused by the watcher's own writes are therefore not delivered to
/// it, not even those on the node it watches. They are not queued either.
/// Other watchers of the node still receive them, and the forest is fully
/// up to date when the callback returns.
pub trait PropertyWatcher {
    /// Called when the watcher is attached to `graph`.
    fn attach(&mut self, graph: GraphId) {
        let _ = graph;
    }

    /// Called when the watcher leaves `graph`.
    ///
    /// `removed_from_graph` is `true` when this watcher alone was detached and
    /// `false` when the node dropped all of its watchers at once.
    fn detach(&mut self, graph: GraphId, removed_from_graph: bool) {
        let _ = (graph, removed_from_graph);
    }

    /// Called after an aggregate value of the watched node changed.
    fn on_property_change(&mut self, forest: &mut PropertyForest, change: &PropertyChange);
}

/// Handle returned by [`PropertyForest::attach_watcher`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) u32);
