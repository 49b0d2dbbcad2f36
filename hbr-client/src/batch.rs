//! # Mutation Batch
//!
//! Purpose: Buffer puts and deletes per row and commit them together, either
//! when an auto-flush threshold is reached or when the batch scope ends.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: One `RowMutation` per touched row, created lazily
//!    through the table and kept in first-touched order.
//! 2. **Validate Before Mutating**: Column specifiers and time constraints are
//!    checked up front, so a rejected call leaves the buffer untouched.
//! 3. **Drain on Send**: `send` empties the buffer before committing, so a
//!    failed commit is never replayed on top of newer mutations.
//! 4. **Scoped Flush**: `scope` flushes on exit; a transactional batch keeps
//!    its buffer when the scope fails.
//!
//! ## Counting
//!
//! The mutation counter tracks operations, not rows:
//!
//! ```text
//! put(row, {cf:a, cf:b})   -> +2
//! delete(row, [cf:a, cf])  -> +2
//! delete(row, [])          -> +1   (whole row)
//! ```

use std::mem;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use hbr_common::{parse_columns, ColumnSpec, HbrError, HbrResult, RowMutation, TimeRange, Timestamp};

use crate::table::Table;

const WAL_WARNING: &str = "the write-ahead-log flag is not supported by the backing store and is ignored";

/// Batch construction options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Fixed timestamp (milliseconds since the epoch) for every write.
    pub timestamp: Option<i64>,
    /// Auto-flush once this many mutations are buffered. Must be positive.
    pub batch_size: Option<usize>,
    /// Skip the flush when the batch scope fails.
    pub transaction: bool,
    /// Legacy write-ahead-log flag; `Some(false)` only logs a warning.
    pub write_ahead_log: Option<bool>,
}

/// Per-call options for `put_with` / `delete_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Overrides the batch timestamp for this call (milliseconds).
    pub timestamp: Option<i64>,
    /// Legacy write-ahead-log flag; `false` only logs a warning.
    pub write_ahead_log: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            timestamp: None,
            write_ahead_log: true,
        }
    }
}

impl WriteOptions {
    /// Same options with the timestamp override cleared.
    pub fn without_timestamp(self) -> Self {
        WriteOptions {
            timestamp: None,
            ..self
        }
    }
}

fn warn_wal_disabled(operation: &'static str) {
    warn!(operation, "{}", WAL_WARNING);
}

/// Buffer of row mutations bound to one table.
///
/// Not meant to be shared between threads; every mutating call takes
/// `&mut self`.
pub struct Batch<'t> {
    table: &'t Table,
    rows: Vec<RowMutation>,
    row_index: HashMap<Vec<u8>, usize>,
    mutation_count: usize,
    batch_size: Option<usize>,
    transaction: bool,
    timestamp: Option<Timestamp>,
    delete_range: Option<TimeRange>,
}

impl<'t> Batch<'t> {
    /// Creates an empty batch.
    ///
    /// # Errors
    /// - `HbrError::Usage` when `transaction` is combined with `batch_size`.
    /// - `HbrError::InvalidArgument` when `batch_size` is zero or the
    ///   timestamp is out of range.
    pub fn new(table: &'t Table, options: BatchOptions) -> HbrResult<Self> {
        if options.write_ahead_log == Some(false) {
            warn_wal_disabled("batch");
        }

        if let Some(size) = options.batch_size {
            if options.transaction {
                return Err(HbrError::Usage(
                    "when batch_size is set, a batch cannot be transactional".to_string(),
                ));
            }
            if size == 0 {
                return Err(HbrError::InvalidArgument(
                    "batch_size must be positive".to_string(),
                ));
            }
        }

        let timestamp = options.timestamp.map(Timestamp::from_millis).transpose()?;
        Ok(Batch {
            table,
            rows: Vec::new(),
            row_index: HashMap::new(),
            mutation_count: 0,
            batch_size: options.batch_size,
            transaction: options.transaction,
            timestamp,
            delete_range: timestamp.map(|ts| ts.delete_range()),
        })
    }

    pub fn table(&self) -> &'t Table {
        self.table
    }

    /// Mutations buffered since the last send.
    pub fn mutation_count(&self) -> usize {
        self.mutation_count
    }

    /// Buffered row builders, in first-touched order.
    pub fn rows(&self) -> &[RowMutation] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn is_transactional(&self) -> bool {
        self.transaction
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Range used to confine deletes, derived from the batch timestamp.
    pub fn delete_range(&self) -> Option<TimeRange> {
        self.delete_range
    }

    /// Inserts cells into `row_key`; `data` maps `family:qualifier` to values.
    pub fn put<I, C, V>(&mut self, row_key: &[u8], data: I) -> HbrResult<()>
    where
        I: IntoIterator<Item = (C, V)>,
        C: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.put_with(row_key, data, WriteOptions::default())
    }

    /// `put` with a per-call timestamp and WAL flag.
    ///
    /// # Errors
    /// Returns `HbrError::MalformedColumn` if any key lacks a qualifier or is
    /// malformed; nothing is buffered in that case. Auto-flush errors from the
    /// backend propagate unchanged.
    pub fn put_with<I, C, V>(&mut self, row_key: &[u8], data: I, options: WriteOptions) -> HbrResult<()>
    where
        I: IntoIterator<Item = (C, V)>,
        C: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        if !options.write_ahead_log {
            warn_wal_disabled("put");
        }

        let timestamp = match options.timestamp {
            Some(millis) => Some(Timestamp::from_millis(millis)?),
            None => self.timestamp,
        };

        let cells = data
            .into_iter()
            .map(|(column, value)| {
                let spec = ColumnSpec::parse(column.as_ref(), true)?;
                Ok::<_, HbrError>((spec, Bytes::copy_from_slice(value.as_ref())))
            })
            .collect::<HbrResult<Vec<_>>>()?;

        if !cells.is_empty() {
            let count = cells.len();
            let row = self.row_mut(row_key);
            for (spec, value) in cells {
                let qualifier = spec.qualifier.unwrap_or_default();
                row.set_cell(&spec.family, &qualifier, value, timestamp);
            }
            self.mutation_count += count;
        }

        self.try_send()
    }

    /// Deletes `columns` from `row_key`, or the whole row when `columns` is
    /// empty.
    pub fn delete<I, C>(&mut self, row_key: &[u8], columns: I) -> HbrResult<()>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        self.delete_with(row_key, columns, WriteOptions::default())
    }

    /// Deletes the whole row.
    pub fn delete_row(&mut self, row_key: &[u8]) -> HbrResult<()> {
        self.delete(row_key, std::iter::empty::<&[u8]>())
    }

    /// `delete` with a per-call timestamp and WAL flag.
    ///
    /// A family specifier (`fam` or `fam:`) removes the whole family; a
    /// qualified one removes that cell, limited to the delete range when a
    /// timestamp applies.
    ///
    /// # Errors
    /// - `HbrError::Usage` for a whole-row or whole-family delete while a
    ///   timestamp applies; nothing is buffered.
    /// - `HbrError::MalformedColumn` for a malformed specifier.
    pub fn delete_with<I, C>(&mut self, row_key: &[u8], columns: I, options: WriteOptions) -> HbrResult<()>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        if !options.write_ahead_log {
            warn_wal_disabled("delete");
        }

        let range = match options.timestamp {
            Some(millis) => Some(Timestamp::from_millis(millis)?.delete_range()),
            None => self.delete_range,
        };
        let columns = parse_columns(columns, false)?;

        if columns.is_empty() {
            if range.is_some() {
                return Err(HbrError::Usage(
                    "a whole-row delete cannot be limited to a timestamp".to_string(),
                ));
            }
            self.row_mut(row_key).delete_row();
            self.mutation_count += 1;
            return self.try_send();
        }

        if range.is_some() {
            if let Some(family) = columns.iter().find(|spec| spec.is_family()) {
                return Err(HbrError::Usage(format!(
                    "deleting column family {:?} cannot be limited to a timestamp",
                    family.family
                )));
            }
        }

        let count = columns.len();
        let row = self.row_mut(row_key);
        for spec in &columns {
            match spec.qualifier.as_deref() {
                Some(qualifier) if !qualifier.is_empty() => {
                    row.delete_cell(&spec.family, qualifier, range)
                }
                _ => row.delete_family(&spec.family),
            }
        }
        self.mutation_count += count;

        self.try_send()
    }

    /// Commits every buffered row in one call and empties the buffer.
    ///
    /// Always calls the backend, even with nothing buffered. The buffer and
    /// counter are reset whether or not the commit succeeds.
    pub fn send(&mut self) -> HbrResult<()> {
        let rows = mem::take(&mut self.rows);
        self.row_index.clear();
        let mutations = mem::replace(&mut self.mutation_count, 0);

        debug!(table = self.table.name(), rows = rows.len(), mutations, "sending batch");
        self.table.commit(rows)
    }

    /// Auto-flush: sends once the counter reaches `batch_size`.
    fn try_send(&mut self) -> HbrResult<()> {
        match self.batch_size {
            Some(size) if self.mutation_count >= size => self.send(),
            _ => Ok(()),
        }
    }

    /// Runs `f` against this batch, then flushes.
    ///
    /// | exit of `f`     | transactional     | otherwise                    |
    /// |-----------------|-------------------|------------------------------|
    /// | `Ok`            | send              | send                         |
    /// | `Err`           | keep buffer       | send, then return the error  |
    /// | panic           | keep buffer       | send, resume panic           |
    ///
    /// A commit error from the send always reaches the caller: on an `Err`
    /// exit it replaces the closure's error. On a panic exit it can only be
    /// logged before the panic resumes.
    pub fn scope<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
        E: From<HbrError>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        match outcome {
            Ok(Ok(value)) => {
                self.send()?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.flush_on_failure("error")?;
                Err(err)
            }
            Err(payload) => {
                if let Err(err) = self.flush_on_failure("panic") {
                    error!(table = self.table.name(), error = %err, "batch flush during panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    fn flush_on_failure(&mut self, cause: &'static str) -> HbrResult<()> {
        if self.transaction {
            debug!(
                table = self.table.name(),
                cause,
                mutations = self.mutation_count,
                "transactional batch not sent"
            );
            return Ok(());
        }
        self.send().map_err(|err| {
            warn!(table = self.table.name(), cause, error = %err, "commit failed while leaving batch scope");
            err
        })
    }

    fn row_mut(&mut self, row_key: &[u8]) -> &mut RowMutation {
        let index = match self.row_index.get(row_key) {
            Some(&index) => index,
            None => {
                self.rows.push(self.table.row_mutation(row_key));
                let index = self.rows.len() - 1;
                self.row_index.insert(row_key.to_vec(), index);
                index
            }
        };
        &mut self.rows[index]
    }
}

impl std::fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("table", &self.table.name())
            .field("rows", &self.rows.len())
            .field("mutation_count", &self.mutation_count)
            .field("batch_size", &self.batch_size)
            .field("transaction", &self.transaction)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
