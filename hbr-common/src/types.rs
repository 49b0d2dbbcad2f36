//! # Time Types
//!
//! Cell timestamps and half-open time ranges.
//!
//! ## Design Principles
//!
//! 1. **Legacy In, Native Out**: Callers hand in milliseconds since the epoch
//!    (the legacy client's unit); the store works in microseconds. Conversion
//!    happens once, at the edge, in `Timestamp::from_millis`.
//!
//! 2. **Millisecond Granularity**: The backing store only accepts timestamps
//!    that are whole milliseconds, so every constructor keeps the micros value
//!    a multiple of 1000.
//!
//! 3. **Exclusive Upper Bounds**: `TimeRange::end` is exclusive. Legacy deletes
//!    are inclusive of their timestamp, so `Timestamp::delete_range` ends one
//!    millisecond later.
//!
//! ## Range Example
//!
//! ```text
//! batch timestamp = 1000ms
//!
//!   cells at:   999ms   1000ms   1001ms
//!   range:    [ -inf ............ 1001ms )
//!   deleted:     yes     yes      no
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{HbrError, HbrResult};

/// Microseconds per millisecond, the store's timestamp granularity.
pub const MICROS_PER_MILLI: i64 = 1_000;

/// A cell timestamp in microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Converts legacy milliseconds since the epoch.
    ///
    /// # Errors
    /// Returns `HbrError::InvalidArgument` if the value overflows microseconds.
    pub fn from_millis(millis: i64) -> HbrResult<Self> {
        millis
            .checked_mul(MICROS_PER_MILLI)
            .map(Timestamp)
            .ok_or_else(|| HbrError::InvalidArgument(format!("timestamp {millis}ms out of range")))
    }

    /// Wraps a microsecond value, truncating to millisecond granularity.
    /// Values within a millisecond of `i64::MIN` saturate to `i64::MIN`.
    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros.saturating_sub(micros.rem_euclid(MICROS_PER_MILLI)))
    }

    /// Current wall-clock time at millisecond granularity.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as i64)
            .unwrap_or(0);
        Timestamp::from_micros(micros)
    }

    /// Microseconds since the epoch.
    #[inline]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Milliseconds since the epoch.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / MICROS_PER_MILLI
    }

    /// The next representable timestamp (one millisecond later).
    #[inline]
    pub const fn next(&self) -> Self {
        Timestamp(self.0.saturating_add(MICROS_PER_MILLI))
    }

    /// Range covering every cell written at or before this timestamp.
    pub fn delete_range(&self) -> TimeRange {
        TimeRange::until(self.next())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

/// Half-open time range `[start, end)`; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: Option<Timestamp>,
    /// Exclusive upper bound.
    pub end: Option<Timestamp>,
}

impl TimeRange {
    /// Range with only an exclusive upper bound.
    pub const fn until(end: Timestamp) -> Self {
        TimeRange {
            start: None,
            end: Some(end),
        }
    }

    /// Returns true when `ts` falls inside the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        let after_start = self.start.map_or(true, |start| ts >= start);
        let before_end = self.end.map_or(true, |end| ts < end);
        after_start && before_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis_scales_to_micros() {
        let ts = Timestamp::from_millis(1_456_361_486_255).unwrap();
        assert_eq!(ts.as_micros(), 1_456_361_486_255_000);
        assert_eq!(ts.as_millis(), 1_456_361_486_255);
    }

    #[test]
    fn test_from_millis_overflow() {
        assert!(matches!(
            Timestamp::from_millis(i64::MAX),
            Err(HbrError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_micros_truncates() {
        assert_eq!(Timestamp::from_micros(1_999).as_micros(), 1_000);
        assert_eq!(Timestamp::from_micros(-1).as_micros(), -1_000);
    }

    #[test]
    fn test_from_micros_extremes_saturate() {
        assert_eq!(Timestamp::from_micros(i64::MIN).as_micros(), i64::MIN);
        assert_eq!(Timestamp::from_micros(i64::MAX).as_micros(), i64::MAX - 807);
    }

    #[test]
    fn test_delete_range_includes_timestamp() {
        let ts = Timestamp::from_millis(1000).unwrap();
        let range = ts.delete_range();
        assert_eq!(range.start, None);
        assert_eq!(range.end, Some(Timestamp::from_millis(1001).unwrap()));

        assert!(range.contains(Timestamp::from_millis(999).unwrap()));
        assert!(range.contains(ts));
        assert!(!range.contains(ts.next()));
    }

    #[test]
    fn test_unbounded_range() {
        let range = TimeRange::default();
        assert!(range.contains(Timestamp::from_micros(i64::MIN / 2)));
        assert!(range.contains(Timestamp::now()));
    }
}
