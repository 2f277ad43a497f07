// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Lineage: parent/child edges with traversal guards.
//!
//! This crate stores a many-to-many hierarchy of nodes (each node may have any
//! number of parents and children) as bidirectional adjacency lists keyed by
//! dense indices. It is the structural half of systems that fold values from
//! children into parents and push changes back up.
//!
//! - **Edges** ([`Lineage`]): `link`/`unlink` keep the parent's child list and
//!   the child's parent list consistent.
//! - **Guards** ([`Lineage::protect`]): per-node, per-[`Direction`] counters
//!   that refuse structural changes to an edge list while it is being walked.
//! - **Cycle policy** ([`CycleHandling`]): what `link` does when the new child
//!   is already an ancestor of the parent.
//!
//! ## Quick Start
//!
//! ```rust
//! use understory_lineage::{CycleHandling, Direction, Lineage};
//!
//! let mut lineage = Lineage::<u32>::new();
//! lineage.link(0, 1, CycleHandling::Error).unwrap();
//! lineage.link(0, 2, CycleHandling::Error).unwrap();
//!
//! // Walk the children of 0 while refusing structural changes to that list.
//! lineage.protect(0, Direction::Children);
//! let children: Vec<u32> = lineage.children(0).collect();
//! assert!(lineage.link(0, 3, CycleHandling::Error).is_err());
//! lineage.release(0, Direction::Children);
//!
//! assert_eq!(children, [1, 2]);
//! ```
//!
//! ## Cycle Detection
//!
//! - `DebugAssert` (default): walks ancestors and panics in debug builds,
//!   performs no walk in release builds.
//! - `Error`: returns `Err(LinkError::Cycle)`.
//! - `Ignore`: refuses the link without an error.
//! - `Allow`: never walks.
//!
//! Self links, and links that make a node the child of its own child, are
//! always rejected. The policy applies to longer cycles. The lineage keeps
//! its search buffers between links, so checks do not allocate once warm.
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`. It does not depend on `std`.

#![no_std]

extern crate alloc;

mod direction;
mod lineage;
mod scratch;

pub use direction::{DenseKey, Direction};
pub use lineage::{CycleHandling, Lineage, LinkError};
