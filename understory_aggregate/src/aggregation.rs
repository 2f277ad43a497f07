// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Aggregation methods and value normalization.

use crate::metadata::PropertyInfo;
use crate::value::{DataType, PropertyValue};

/// How a node combines its own base value with its children's aggregates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum AggregationMethod {
    /// Children are ignored; the aggregate is the base value.
    #[default]
    None,
    /// Smallest value; logical AND for booleans.
    Min,
    /// Largest value; logical OR for booleans.
    Max,
    /// Sum of numeric values.
    Sum,
    /// Product of numeric values.
    Mul,
    /// Last contribution wins. Only for non-numeric types.
    Set,
}

impl AggregationMethod {
    /// Returns `true` if values of `data_type` can be folded with this method.
    #[must_use]
    pub const fn supports(self, data_type: DataType) -> bool {
        match self {
            Self::None => true,
            Self::Set => !data_type.is_numeric(),
            Self::Min | Self::Max => {
                data_type.is_numeric() || matches!(data_type, DataType::Boolean | DataType::Time)
            }
            Self::Sum | Self::Mul => data_type.is_numeric(),
        }
    }
}

impl PropertyInfo {
    /// Folds `input` into `acc` with this property's aggregation method.
    pub(crate) fn fold(&self, acc: PropertyValue, input: PropertyValue) -> PropertyValue {
        use AggregationMethod as M;

        let data_type = self.data_type();
        match self.aggregation() {
            M::None => acc,
            M::Set => input,
            method if data_type == DataType::Boolean => match method {
                M::Min => PropertyValue::from_bool(acc.as_bool() && input.as_bool()),
                _ => PropertyValue::from_bool(acc.as_bool() || input.as_bool()),
            },
            method if data_type.is_real() => {
                let (a, b) = (acc.as_real(), input.as_real());
                PropertyValue::from_real(match method {
                    M::Min => a.min(b),
                    M::Max => a.max(b),
                    M::Sum => a + b,
                    _ => a * b,
                })
            }
            method => {
                let (a, b) = (acc.as_int(), input.as_int());
                PropertyValue::from_int(match method {
                    M::Min => a.min(b),
                    M::Max => a.max(b),
                    M::Sum => a.saturating_add(b),
                    _ => a.saturating_mul(b),
                })
            }
        }
    }

    /// Applies this property's boolean normalization, truncation and clamp.
    ///
    /// Reals are also canonicalized so that `-0.0` is stored as `0.0`, which
    /// keeps raw-bit comparison equivalent to float comparison.
    #[must_use]
    pub fn normalize(&self, value: PropertyValue) -> PropertyValue {
        match self.data_type() {
            DataType::Boolean => PropertyValue::from_bool(value.as_bool()),
            DataType::Real | DataType::Curve => {
                let mut x = value.as_real();
                if self.truncate_to_int() {
                    x = floor(x);
                }
                if let Some(bounds) = self.clamp() {
                    x = x.max(bounds.min.as_real()).min(bounds.max.as_real());
                }
                if x == 0.0 {
                    x = 0.0;
                }
                PropertyValue::from_real(x)
            }
            DataType::Integer => match self.clamp() {
                Some(bounds) => PropertyValue::from_int(
                    value.as_int().clamp(bounds.min.as_int(), bounds.max.as_int()),
                ),
                None => value,
            },
            _ => value,
        }
    }
}

/// `f32::floor` without `std`.
fn floor(x: f32) -> f32 {
    // Beyond 2^23 every f32 is already integral; also passes NaN through.
    if !(x > -8_388_608.0 && x < 8_388_608.0) {
        return x;
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the magnitude is below 2^23"
    )]
    let truncated = x as i32 as f32;
    if truncated > x { truncated - 1.0 } else { truncated }
}
