//! # Storage Collaborators
//!
//! Purpose: The narrow interface the compatibility layer needs from a backing
//! wide-column store. Anything that can hand out row builders and commit them
//! can sit behind a `Connection`.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: The client only sees these traits, so the
//!    in-memory backend and a networked one are interchangeable.
//! 2. **Trait Objects at the Seam**: Instances and tables are shared as
//!    `Arc<dyn ...>`; every pooled connection points at the same instance.
//! 3. **Discovery Is Explicit**: Finding "the" instance is a call on an
//!    `InstanceLocator`, never ambient global state.

use std::fmt;
use std::sync::Arc;

use hbr_common::{Cell, HbrError, HbrResult, ReadFilter, RowMutation};
use tracing::debug;

/// A table inside a backing instance.
pub trait StorageTable: Send + Sync {
    /// Fully qualified table name.
    fn name(&self) -> &str;

    /// Creates an empty builder for `row_key`.
    fn row_mutation(&self, row_key: &[u8]) -> RowMutation {
        RowMutation::new(row_key)
    }

    /// Commits `rows`. Each row is applied atomically; rows are independent,
    /// so a failure may leave some rows applied and others not.
    fn commit(&self, rows: Vec<RowMutation>) -> HbrResult<()>;

    /// Column families defined on the table.
    fn column_families(&self) -> Vec<String>;

    /// Reads the cells of `row_key` that pass `filter`, ordered by family,
    /// then qualifier, then newest version first. A missing row reads empty.
    fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> HbrResult<Vec<Cell>>;

    /// Reads several rows with one filter. Rows with no matching cells are
    /// left out.
    fn read_rows(&self, row_keys: &[Vec<u8>], filter: &ReadFilter) -> HbrResult<Vec<(Vec<u8>, Vec<Cell>)>> {
        let mut rows = Vec::with_capacity(row_keys.len());
        for row_key in row_keys {
            let cells = self.read_row(row_key, filter)?;
            if !cells.is_empty() {
                rows.push((row_key.clone(), cells));
            }
        }
        Ok(rows)
    }

    /// Adds `delta` to the big-endian i64 counter at `family:qualifier` in
    /// one atomic read-modify-write. A missing cell counts as zero.
    ///
    /// Returns the value after the increment.
    fn increment_cell(&self, row_key: &[u8], family: &str, qualifier: &[u8], delta: i64) -> HbrResult<i64>;
}

/// A backing-store instance that owns tables.
pub trait StorageInstance: Send + Sync {
    /// Stable identifier of the instance.
    fn id(&self) -> &str;

    /// Opens a handle to an existing table.
    fn table(&self, name: &str) -> HbrResult<Arc<dyn StorageTable>>;
}

impl fmt::Debug for dyn StorageInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageInstance({})", self.id())
    }
}

impl fmt::Debug for dyn StorageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageTable({})", self.name())
    }
}

/// Result of listing the instances visible to the environment.
#[derive(Default)]
pub struct InstanceListing {
    /// Instances that answered.
    pub instances: Vec<Arc<dyn StorageInstance>>,
    /// Locations that could not be queried.
    pub failed_locations: Vec<String>,
}

/// Environment-level lookup of backing instances.
pub trait InstanceLocator: Send + Sync {
    fn list_instances(&self) -> HbrResult<InstanceListing>;
}

/// Resolves the single instance visible through `locator`.
///
/// # Errors
/// Returns `HbrError::Discovery` when any location failed, or when zero or
/// more than one instance is visible.
pub fn discover_instance(locator: &dyn InstanceLocator) -> HbrResult<Arc<dyn StorageInstance>> {
    let listing = locator.list_instances()?;

    if !listing.failed_locations.is_empty() {
        return Err(HbrError::Discovery(format!(
            "listing instances encountered failed locations: {}",
            listing.failed_locations.join(", ")
        )));
    }

    let mut instances = listing.instances;
    match instances.len() {
        0 => Err(HbrError::Discovery(
            "no instances are visible to this client".to_string(),
        )),
        1 => {
            let instance = instances.remove(0);
            debug!(instance = instance.id(), "discovered backing instance");
            Ok(instance)
        }
        count => Err(HbrError::Discovery(format!(
            "{count} instances are visible; pass the instance explicitly"
        ))),
    }
}
