// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Curve evaluation for curve-derived properties.

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::key::PropertyKey;
use crate::reference::CurveRef;

/// Supplies curve values to a [`PropertyForest`](crate::PropertyForest).
///
/// Closures `Fn(CurveRef, i32) -> Option<f32>` implement this trait.
pub trait CurveSource {
    /// Evaluates `curve` at `index`, or returns `None` for an unknown curve.
    fn evaluate(&self, curve: CurveRef, index: i32) -> Option<f32>;

    /// Returns `true` if `curve` is defined.
    fn contains(&self, curve: CurveRef) -> bool {
        self.evaluate(curve, 0).is_some()
    }
}

impl<F> CurveSource for F
where
    F: Fn(CurveRef, i32) -> Option<f32>,
{
    #[inline]
    fn evaluate(&self, curve: CurveRef, index: i32) -> Option<f32> {
        self(curve, index)
    }
}

/// A [`CurveSource`] with no curves.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoCurves;

impl CurveSource for NoCurves {
    fn evaluate(&self, _curve: CurveRef, _index: i32) -> Option<f32> {
        None
    }
}

/// Tabulated curves indexed by integer, clamped at both ends.
///
/// # Example
///
/// ```rust
/// use understory_aggregate::{CurveRef, CurveSource, CurveTable};
///
/// let mut curves = CurveTable::new();
/// curves.insert(CurveRef::new(1), 1, [10.0, 20.0, 30.0]);
///
/// assert_eq!(curves.evaluate(CurveRef::new(1), 2), Some(20.0));
/// assert_eq!(curves.evaluate(CurveRef::new(1), 99), Some(30.0));
/// assert_eq!(curves.evaluate(CurveRef::new(2), 1), None);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CurveTable {
    curves: HashMap<CurveRef, (i32, Vec<f32>)>,
}

impl CurveTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `curve` with `values[0]` at `first_index`.
    ///
    /// An empty `values` leaves the curve undefined.
    pub fn insert(
        &mut self,
        curve: CurveRef,
        first_index: i32,
        values: impl IntoIterator<Item = f32>,
    ) {
        let values: Vec<f32> = values.into_iter().collect();
        if values.is_empty() {
            self.curves.remove(&curve);
        } else {
            self.curves.insert(curve, (first_index, values));
        }
    }
}

impl CurveSource for CurveTable {
    fn evaluate(&self, curve: CurveRef, index: i32) -> Option<f32> {
        let (first, values) = self.curves.get(&curve)?;
        let offset = i64::from(index) - i64::from(*first);
        let last = values.len() - 1;
        let pos = usize::try_from(offset).map_or(0, |pos| pos.min(last));
        values.get(pos).copied()
    }
}

/// Binds a curve property to a curve and the key it is indexed by.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CurveBinding {
    curve: CurveRef,
    index_key: PropertyKey,
}

impl CurveBinding {
    /// Creates a binding.
    #[must_use]
    pub const fn new(curve: CurveRef, index_key: PropertyKey) -> Self {
        Self { curve, index_key }
    }

    /// The curve evaluated.
    #[must_use]
    #[inline]
    pub const fn curve(&self) -> CurveRef {
        self.curve
    }

    /// The key whose aggregate value is the curve index.
    #[must_use]
    #[inline]
    pub const fn index_key(&self) -> PropertyKey {
        self.index_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_clamps_below_and_above() {
        let mut table = CurveTable::new();
        table.insert(CurveRef::new(3), -1, [1.0, 2.0]);
        assert_eq!(table.evaluate(CurveRef::new(3), -10), Some(1.0));
        assert_eq!(table.evaluate(CurveRef::new(3), 0), Some(2.0));
        assert_eq!(table.evaluate(CurveRef::new(3), i32::MAX), Some(2.0));
        assert!(table.contains(CurveRef::new(3)));
    }

    #[test]
    fn empty_definition_removes_curve() {
        let mut table = CurveTable::new();
        table.insert(CurveRef::new(3), 0, [1.0]);
        table.insert(CurveRef::new(3), 0, []);
        assert!(!table.contains(CurveRef::new(3)));
    }

    #[test]
    fn closures_are_sources() {
        let doubled = |_: CurveRef, index: i32| Some(2.0 * index as f32);
        assert_eq!(doubled.evaluate(CurveRef::new(1), 4), Some(8.0));
        assert!(!NoCurves.contains(CurveRef::new(1)));
    }
}
