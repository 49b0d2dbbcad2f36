//! # HBridge Sync Client
//!
//! Purpose: Provide the legacy synchronous wide-column client API (pooled
//! connections, tables with reads and counters, mutation batches) on top of
//! a different backing store.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed set of pre-opened connections shared
//!    between threads, with re-entrant leases per thread.
//! 2. **Facade Pattern**: `Connection` and `Table` hide the backing instance.
//! 3. **Scoped Resources**: Leases release on drop; batches flush when their
//!    scope ends.
//!
//! ## Example
//!
//! ```rust,ignore
//! let pool = ConnectionPool::new(PoolConfig::default(), InstanceSource::Discover(&cluster))?;
//! let conn = pool.lease(Some(Duration::from_secs(1)))?;
//! let table = conn.table("events", true)?;
//! table.batch_scope(BatchOptions { batch_size: Some(100), ..Default::default() }, |batch| {
//!     batch.put(b"row-1", [("cf:kind", "click")])
//! })?;
//! ```

mod batch;
mod connection;
mod pool;
mod table;

pub use batch::{Batch, BatchOptions, WriteOptions};
pub use connection::{Connection, ConnectionConfig, InstanceSource, DEFAULT_TABLE_PREFIX_SEPARATOR};
pub use hbr_common::{Cell, HbrError, HbrResult};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection, DEFAULT_POOL_SIZE};
pub use table::{RowData, Table};
