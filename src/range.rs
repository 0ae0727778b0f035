//! Splitting a value range into sub-ranges and stitching their results.
//!
//! ```
//! use opentick_client::range::split_range;
//!
//! let parts = split_range(0_i64, 10, 3).unwrap();
//! assert_eq!(parts, vec![(0, 3), (3, 6), (6, 10)]);
//! ```

use chrono::{DateTime, TimeDelta, Utc};

use crate::conversion::ToValue;
use crate::error::{Error, Result};
use crate::value::Row;

/// A value a range query can be split on.
pub trait RangeBound: Copy + ToValue {
    /// The `parts - 1` boundaries strictly inside `start..end`, in order.
    ///
    /// Each sub-range gets the same width, rounded towards `start`; the
    /// remainder is left to the last sub-range.
    fn interior(start: Self, end: Self, parts: usize) -> Result<Vec<Self>>;
}

macro_rules! impl_range_bound_int {
    ($($t:ty),*) => {
        $(
            impl RangeBound for $t {
                fn interior(start: Self, end: Self, parts: usize) -> Result<Vec<Self>> {
                    let count = i128::try_from(parts)
                        .map_err(|_| Error::InvalidUsage(format!("too many range parts: {}", parts)))?;
                    let base = i128::from(start);
                    let width = (i128::from(end) - base) / count;
                    Ok((1..count)
                        .map(|i| Self::try_from(base + width * i).unwrap_or(end))
                        .collect())
                }
            }
        )*
    };
}

impl_range_bound_int!(i32, i64);

macro_rules! impl_range_bound_float {
    ($($t:ty),*) => {
        $(
            impl RangeBound for $t {
                fn interior(start: Self, end: Self, parts: usize) -> Result<Vec<Self>> {
                    let width = (end - start) / parts as $t;
                    let mut at = start;
                    Ok((1..parts)
                        .map(|_| {
                            at += width;
                            at
                        })
                        .collect())
                }
            }
        )*
    };
}

impl_range_bound_float!(f32, f64);

impl RangeBound for DateTime<Utc> {
    fn interior(start: Self, end: Self, parts: usize) -> Result<Vec<Self>> {
        let divisor = i32::try_from(parts)
            .map_err(|_| Error::InvalidUsage(format!("too many range parts: {}", parts)))?;
        let width: TimeDelta = (end - start) / divisor;
        let mut at = start;
        Ok((1..parts)
            .map(|_| {
                at = at.checked_add_signed(width).unwrap_or(end);
                at
            })
            .collect())
    }
}

/// Split `start..end` into `parts` contiguous sub-ranges.
///
/// Consecutive sub-ranges share their boundary and the last one ends at
/// exactly `end`. `parts == 0` is an error.
pub fn split_range<T: RangeBound>(start: T, end: T, parts: usize) -> Result<Vec<(T, T)>> {
    if parts == 0 {
        return Err(Error::InvalidUsage(
            "range must be split into at least one part".into(),
        ));
    }
    let mut bounds = Vec::with_capacity(parts + 1);
    bounds.push(start);
    bounds.extend(T::interior(start, end, parts)?);
    bounds.push(end);
    Ok(bounds
        .iter()
        .copied()
        .zip(bounds.iter().copied().skip(1))
        .collect())
}

/// Concatenate per-range results in range order.
///
/// When a chunk starts with the row the previous chunks ended with (the
/// row sitting exactly on the shared boundary), that row is kept once.
pub fn stitch<I>(chunks: I) -> Vec<Row>
where
    I: IntoIterator<Item = Vec<Row>>,
{
    let mut out: Vec<Row> = Vec::new();
    for chunk in chunks {
        let duplicate = matches!(
            (out.last(), chunk.first()),
            (Some(last), Some(first)) if last == first
        );
        out.extend(chunk.into_iter().skip(usize::from(duplicate)));
    }
    out
}
