//! # Table Handle
//!
//! Legacy-style table object: single-shot `put`/`delete`, the `batch`
//! factory, row and cell reads, and counters. Every write goes through a
//! `Batch`, so the single-shot calls are just a one-mutation,
//! non-transactional batch scope.
//!
//! ## Read Timestamps
//!
//! A read `timestamp` is an exclusive upper bound: only versions written
//! strictly before it are returned. Deletes, by contrast, include their
//! timestamp (see `Timestamp::delete_range`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use hbr_common::{
    encode_counter, parse_columns, Cell, ColumnSpec, HbrError, HbrResult, ReadFilter, RowMutation,
    TimeRange, Timestamp,
};
use hbr_engine::StorageTable;

use crate::batch::{Batch, BatchOptions, WriteOptions};

/// Latest cell per column of one row, keyed by `family:qualifier`.
pub type RowData = BTreeMap<Vec<u8>, Cell>;

/// A table reached through a `Connection`.
#[derive(Clone)]
pub struct Table {
    backend: Arc<dyn StorageTable>,
}

impl Table {
    /// Wraps a backend table handle.
    pub fn new(backend: Arc<dyn StorageTable>) -> Self {
        Table { backend }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Empty row builder from the backend.
    pub fn row_mutation(&self, row_key: &[u8]) -> RowMutation {
        self.backend.row_mutation(row_key)
    }

    /// Submits row builders in one call (atomic per row only).
    pub fn commit(&self, rows: Vec<RowMutation>) -> HbrResult<()> {
        self.backend.commit(rows)
    }

    /// Creates a batch bound to this table.
    ///
    /// # Errors
    /// See `Batch::new`.
    pub fn batch(&self, options: BatchOptions) -> HbrResult<Batch<'_>> {
        Batch::new(self, options)
    }

    /// Creates a batch and runs `f` inside its scope (see `Batch::scope`).
    pub fn batch_scope<R, E, F>(&self, options: BatchOptions, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Batch<'_>) -> Result<R, E>,
        E: From<HbrError>,
    {
        let mut batch = self.batch(options)?;
        batch.scope(f)
    }

    /// Writes `data` (`family:qualifier` -> value) to one row immediately.
    pub fn put<I, C, V>(&self, row_key: &[u8], data: I, options: WriteOptions) -> HbrResult<()>
    where
        I: IntoIterator<Item = (C, V)>,
        C: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let batch_options = BatchOptions {
            timestamp: options.timestamp,
            ..Default::default()
        };
        self.batch_scope(batch_options, |batch| {
            batch.put_with(row_key, data, options.without_timestamp())
        })
    }

    /// Deletes `columns` (or the whole row when empty) immediately.
    pub fn delete<I, C>(&self, row_key: &[u8], columns: I, options: WriteOptions) -> HbrResult<()>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let batch_options = BatchOptions {
            timestamp: options.timestamp,
            ..Default::default()
        };
        self.batch_scope(batch_options, |batch| {
            batch.delete_with(row_key, columns, options.without_timestamp())
        })
    }
}

impl Table {
    /// Column families defined on the table.
    pub fn families(&self) -> Vec<String> {
        self.backend.column_families()
    }

    /// Latest cell of each selected column in `row_key`.
    ///
    /// An empty `columns` list selects every column; `fam` and `fam:` select
    /// a whole family. A missing row reads as an empty map.
    ///
    /// # Errors
    /// Returns `HbrError::MalformedColumn` for a malformed specifier and
    /// `HbrError::InvalidArgument` for an out-of-range timestamp.
    pub fn row<I, C>(&self, row_key: &[u8], columns: I, timestamp: Option<i64>) -> HbrResult<RowData>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let filter = latest_filter(columns, timestamp)?;
        let cells = self.backend.read_row(row_key, &filter)?;
        Ok(to_row_data(cells))
    }

    /// `row` for several keys at once.
    ///
    /// Keys are deduplicated and returned in key order; rows with no
    /// matching cells are left out. No backend call is made for an empty key
    /// list.
    pub fn rows<K, R, I, C>(&self, row_keys: K, columns: I, timestamp: Option<i64>) -> HbrResult<Vec<(Vec<u8>, RowData)>>
    where
        K: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let keys: Vec<Vec<u8>> = row_keys
            .into_iter()
            .map(|key| key.as_ref().to_vec())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let filter = latest_filter(columns, timestamp)?;
        let rows = self.backend.read_rows(&keys, &filter)?;
        Ok(rows
            .into_iter()
            .map(|(key, cells)| (key, to_row_data(cells)))
            .collect())
    }

    /// Versions of one `family:qualifier` cell, newest first.
    ///
    /// # Errors
    /// - `HbrError::MalformedColumn` when `column` has no qualifier.
    /// - `HbrError::InvalidArgument` when `versions` is zero.
    pub fn cells<C>(&self, row_key: &[u8], column: C, versions: Option<usize>, timestamp: Option<i64>) -> HbrResult<Vec<Cell>>
    where
        C: AsRef<[u8]>,
    {
        if versions == Some(0) {
            return Err(HbrError::InvalidArgument(
                "versions must be positive".to_string(),
            ));
        }
        let spec = ColumnSpec::parse(column.as_ref(), true)?;
        let filter = ReadFilter {
            columns: vec![spec],
            range: read_range(timestamp)?,
            versions,
        };
        self.backend.read_row(row_key, &filter)
    }

    /// Current counter value; a missing counter reads (and is created) as 0.
    pub fn counter_get<C: AsRef<[u8]>>(&self, row_key: &[u8], column: C) -> HbrResult<i64> {
        self.counter_inc(row_key, column, 0)
    }

    /// Overwrites a counter. Prefer `counter_inc` for anything concurrent.
    pub fn counter_set<C: AsRef<[u8]>>(&self, row_key: &[u8], column: C, value: i64) -> HbrResult<()> {
        self.put(row_key, [(column, encode_counter(value))], WriteOptions::default())
    }

    /// Atomically adds `value` to a counter and returns the new value.
    ///
    /// # Errors
    /// - `HbrError::MalformedColumn` when `column` has no qualifier.
    /// - `HbrError::InvalidArgument` when the cell is not a counter or the
    ///   sum overflows.
    pub fn counter_inc<C: AsRef<[u8]>>(&self, row_key: &[u8], column: C, value: i64) -> HbrResult<i64> {
        let spec = ColumnSpec::parse(column.as_ref(), true)?;
        let qualifier = spec.qualifier.unwrap_or_default();
        self.backend
            .increment_cell(row_key, &spec.family, &qualifier, value)
    }

    /// Atomically subtracts `value` from a counter and returns the new value.
    pub fn counter_dec<C: AsRef<[u8]>>(&self, row_key: &[u8], column: C, value: i64) -> HbrResult<i64> {
        let delta = value.checked_neg().ok_or_else(|| {
            HbrError::InvalidArgument(format!("cannot decrement by {value}"))
        })?;
        self.counter_inc(row_key, column, delta)
    }
}

fn read_range(timestamp: Option<i64>) -> HbrResult<Option<TimeRange>> {
    Ok(timestamp
        .map(Timestamp::from_millis)
        .transpose()?
        .map(TimeRange::until))
}

/// Filter keeping the newest version per column; family specs select the
/// whole family.
fn latest_filter<I, C>(columns: I, timestamp: Option<i64>) -> HbrResult<ReadFilter>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let columns = parse_columns(columns, false)?
        .into_iter()
        .map(|mut spec| {
            if spec.is_family() {
                spec.qualifier = None;
            }
            spec
        })
        .collect();
    Ok(ReadFilter {
        columns,
        range: read_range(timestamp)?,
        versions: Some(1),
    })
}

fn to_row_data(cells: Vec<Cell>) -> RowData {
    let mut row = RowData::new();
    for cell in cells {
        row.entry(cell.column()).or_insert(cell);
    }
    row
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Table({:?})", self.name())
    }
}
