//! # Cells and Read Filters
//!
//! Read-side counterparts of `RowMutation`: the cells a backend hands back
//! for a row read, the filter narrowing that read, and the counter cell
//! encoding.
//!
//! ## Counter Cells
//!
//! ```text
//! value 5  ->  00 00 00 00 00 00 00 05   (big-endian i64, 8 bytes)
//! ```

use bytes::Bytes;

use crate::column::ColumnSpec;
use crate::error::{HbrError, HbrResult};
use crate::types::{TimeRange, Timestamp};

/// Width of a counter cell in bytes.
pub const COUNTER_WIDTH: usize = 8;

/// One version of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: String,
    pub qualifier: Vec<u8>,
    pub value: Bytes,
    pub timestamp: Timestamp,
}

impl Cell {
    /// The `family:qualifier` name legacy callers use for this cell.
    pub fn column(&self) -> Vec<u8> {
        let mut column = Vec::with_capacity(self.family.len() + 1 + self.qualifier.len());
        column.extend_from_slice(self.family.as_bytes());
        column.push(crate::column::COLUMN_SEPARATOR);
        column.extend_from_slice(&self.qualifier);
        column
    }
}

/// Narrows a row read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadFilter {
    /// Columns to return; empty selects every column. A spec without a
    /// qualifier selects its whole family.
    pub columns: Vec<ColumnSpec>,
    /// Only versions inside this range are returned.
    pub range: Option<TimeRange>,
    /// Newest versions kept per column; `None` keeps all of them.
    pub versions: Option<usize>,
}

impl ReadFilter {
    /// True when the cell at `family:qualifier` passes the column selection.
    pub fn selects(&self, family: &str, qualifier: &[u8]) -> bool {
        self.columns.is_empty()
            || self.columns.iter().any(|spec| {
                spec.family == family
                    && spec
                        .qualifier
                        .as_deref()
                        .map_or(true, |wanted| wanted == qualifier)
            })
    }

    /// True when a version written at `timestamp` passes the time range.
    pub fn admits(&self, timestamp: Timestamp) -> bool {
        self.range.map_or(true, |range| range.contains(timestamp))
    }
}

/// Encodes a counter value as stored in its cell.
pub fn encode_counter(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Decodes a counter cell.
///
/// # Errors
/// Returns `HbrError::InvalidArgument` unless `raw` is exactly
/// `COUNTER_WIDTH` bytes.
pub fn decode_counter(raw: &[u8]) -> HbrResult<i64> {
    let bytes: [u8; COUNTER_WIDTH] = raw.try_into().map_err(|_| {
        HbrError::InvalidArgument(format!(
            "counter cell holds {} bytes, expected {COUNTER_WIDTH}",
            raw.len()
        ))
    })?;
    Ok(i64::from_be_bytes(bytes))
}
