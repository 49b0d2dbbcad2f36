//! # Connection Facade
//!
//! Purpose: Stand in for the legacy client's connection object while every
//! call actually lands on a backing `StorageInstance`.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Connection` hides the instance handle; callers only
//!    see tables named the legacy way (optional prefix + separator).
//! 2. **Explicit Discovery**: The instance is either handed in or resolved once
//!    through an `InstanceLocator`; there is no hidden global client.
//! 3. **Compatibility No-Ops**: `open`/`close` only flip a flag, since the
//!    backing client manages its own transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hbr_common::HbrResult;
use hbr_engine::{discover_instance, InstanceLocator, StorageInstance};

use crate::table::Table;

/// Default separator between table prefix and table name.
pub const DEFAULT_TABLE_PREFIX_SEPARATOR: &str = "_";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection settings mirroring the legacy constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Prefix prepended to table names, if any.
    pub table_prefix: Option<String>,
    /// Separator placed between prefix and table name.
    pub table_prefix_separator: String,
    /// Whether `Connection::new` opens the connection immediately.
    pub autoconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            table_prefix: None,
            table_prefix_separator: DEFAULT_TABLE_PREFIX_SEPARATOR.to_string(),
            autoconnect: true,
        }
    }
}

/// Where a connection gets its backing instance from.
pub enum InstanceSource<'a> {
    /// Use this instance as-is.
    Instance(Arc<dyn StorageInstance>),
    /// Ask the locator for the single visible instance.
    Discover(&'a dyn InstanceLocator),
}

impl InstanceSource<'_> {
    /// Produces the instance, running discovery if needed.
    pub fn resolve(self) -> HbrResult<Arc<dyn StorageInstance>> {
        match self {
            InstanceSource::Instance(instance) => Ok(instance),
            InstanceSource::Discover(locator) => discover_instance(locator),
        }
    }
}

/// One logical session with the backing store.
pub struct Connection {
    id: u64,
    instance: Arc<dyn StorageInstance>,
    table_prefix: Option<String>,
    table_prefix_separator: String,
    open: AtomicBool,
}

impl Connection {
    /// Creates a connection, discovering the instance if none is given.
    ///
    /// # Errors
    /// Propagates `HbrError::Discovery` from instance discovery.
    pub fn new(config: &ConnectionConfig, source: InstanceSource<'_>) -> HbrResult<Self> {
        let instance = source.resolve()?;
        let connection = Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            instance,
            table_prefix: config.table_prefix.clone(),
            table_prefix_separator: config.table_prefix_separator.clone(),
            open: AtomicBool::new(false),
        };
        if config.autoconnect {
            connection.open();
        }
        Ok(connection)
    }

    /// Process-unique identifier, stable for the connection's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The backing instance every table handle points at.
    pub fn instance(&self) -> &Arc<dyn StorageInstance> {
        &self.instance
    }

    pub fn table_prefix(&self) -> Option<&str> {
        self.table_prefix.as_deref()
    }

    pub fn table_prefix_separator(&self) -> &str {
        &self.table_prefix_separator
    }

    /// Marks the connection open. The backing client needs no handshake.
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::AcqRel) {
            debug!(connection = self.id, instance = self.instance.id(), "connection opened");
        }
    }

    /// Marks the connection closed.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!(connection = self.id, "connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Applies the configured prefix to `name`.
    pub fn table_name(&self, name: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}{}{name}", self.table_prefix_separator),
            None => name.to_string(),
        }
    }

    /// Opens a table handle, prefixing the name when `use_prefix` is set.
    ///
    /// # Errors
    /// Returns `HbrError::TableNotFound` when the instance has no such table.
    pub fn table(&self, name: &str, use_prefix: bool) -> HbrResult<Table> {
        let name = if use_prefix {
            self.table_name(name)
        } else {
            name.to_string()
        };
        Ok(Table::new(self.instance.table(&name)?))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("instance", &self.instance.id())
            .field("table_prefix", &self.table_prefix)
            .field("open", &self.is_open())
            .finish()
    }
}
