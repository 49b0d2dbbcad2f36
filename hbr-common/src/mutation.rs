//! # Row Mutations
//!
//! Purpose: Accumulate the changes for one row so they can be committed
//! atomically by the backing store.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: `RowMutation` collects cell/family/row changes in
//!    call order; the store applies them in that order.
//! 2. **Per-Row Atomicity Only**: A commit of many `RowMutation`s is atomic per
//!    row, never across rows.
//! 3. **Cheap Values**: Cell values are `Bytes` so batches can be retried or
//!    inspected without copying payloads.

use bytes::Bytes;

use crate::types::{TimeRange, Timestamp};

/// One change inside a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Write a cell version. `None` lets the store pick "now".
    SetCell {
        family: String,
        qualifier: Vec<u8>,
        value: Bytes,
        timestamp: Option<Timestamp>,
    },
    /// Remove versions of one cell, optionally limited to a time range.
    DeleteCell {
        family: String,
        qualifier: Vec<u8>,
        range: Option<TimeRange>,
    },
    /// Remove every cell of a family.
    DeleteFamily { family: String },
    /// Remove the entire row.
    DeleteRow,
}

/// Ordered list of mutations for a single row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    row_key: Vec<u8>,
    mutations: Vec<Mutation>,
}

impl RowMutation {
    /// Creates an empty builder for `row_key`.
    pub fn new(row_key: impl Into<Vec<u8>>) -> Self {
        RowMutation {
            row_key: row_key.into(),
            mutations: Vec::new(),
        }
    }

    pub fn row_key(&self) -> &[u8] {
        &self.row_key
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Number of queued changes.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn set_cell(
        &mut self,
        family: &str,
        qualifier: &[u8],
        value: impl Into<Bytes>,
        timestamp: Option<Timestamp>,
    ) {
        self.mutations.push(Mutation::SetCell {
            family: family.to_string(),
            qualifier: qualifier.to_vec(),
            value: value.into(),
            timestamp,
        });
    }

    pub fn delete_cell(&mut self, family: &str, qualifier: &[u8], range: Option<TimeRange>) {
        self.mutations.push(Mutation::DeleteCell {
            family: family.to_string(),
            qualifier: qualifier.to_vec(),
            range,
        });
    }

    pub fn delete_family(&mut self, family: &str) {
        self.mutations.push(Mutation::DeleteFamily {
            family: family.to_string(),
        });
    }

    pub fn delete_row(&mut self) {
        self.mutations.push(Mutation::DeleteRow);
    }

    /// Splits the builder into its key and queued changes.
    pub fn into_parts(self) -> (Vec<u8>, Vec<Mutation>) {
        (self.row_key, self.mutations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_call_order() {
        let mut row = RowMutation::new(b"row-1".to_vec());
        assert!(row.is_empty());

        row.set_cell("cf", b"a", Bytes::from_static(b"v"), None);
        row.delete_family("other");
        row.delete_row();

        assert_eq!(row.row_key(), b"row-1");
        assert_eq!(row.len(), 3);
        assert!(matches!(row.mutations()[0], Mutation::SetCell { .. }));
        assert_eq!(
            row.mutations()[1],
            Mutation::DeleteFamily {
                family: "other".to_string()
            }
        );
        assert_eq!(row.mutations()[2], Mutation::DeleteRow);
    }

    #[test]
    fn delete_cell_carries_range() {
        let ts = Timestamp::from_millis(5).unwrap();
        let mut row = RowMutation::new(&b"r"[..]);
        row.delete_cell("cf", b"q", Some(ts.delete_range()));

        let (key, mutations) = row.into_parts();
        assert_eq!(key, b"r");
        match &mutations[0] {
            Mutation::DeleteCell { range, .. } => assert_eq!(*range, Some(ts.delete_range())),
            other => panic!("unexpected mutation {other:?}"),
        }
    }
}
