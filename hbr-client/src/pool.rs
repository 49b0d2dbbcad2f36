//! # Connection Pool
//!
//! Purpose: Share a fixed set of pre-opened connections between threads with
//! blocking, timeout-bounded leases.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: All `size` connections are built up front and
//!    live as long as the pool; nothing is created or evicted later.
//! 2. **LIFO Reuse**: The most recently returned connection is leased next, so
//!    warm connections stay hot.
//! 3. **Thread Affinity**: A thread that already holds a connection gets the
//!    same one back on a nested lease instead of waiting on itself.
//! 4. **Minimal Locking**: One mutex guards the free list and the loan map; a
//!    condition variable wakes waiters when a connection comes back.
//!
//! ## State Overview
//!
//! ```text
//! ConnectionPool ── Arc<PoolInner>
//!   ├── state: Mutex<PoolState>
//!   │     ├── idle:  Vec<Arc<Connection>>          (LIFO stack)
//!   │     └── loans: HashMap<ThreadId, Loan>       (connection + nesting depth)
//!   └── returned: Condvar
//!
//! invariant: idle.len() + loans.len() == size
//! ```

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use hbr_common::{HbrError, HbrResult};

use crate::connection::{Connection, ConnectionConfig, InstanceSource};

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of connections; must be positive.
    pub size: usize,
    /// Timeout used by `ConnectionPool::connection`; `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    /// Settings applied to every pooled connection (`autoconnect` is ignored).
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
            connection: ConnectionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Parses a JSON config. Missing fields fall back to defaults.
    ///
    /// # Errors
    /// Returns `HbrError::InvalidArgument` for malformed JSON or mistyped
    /// fields (e.g. a non-integer or negative `size`).
    pub fn from_json(raw: &str) -> HbrResult<Self> {
        serde_json::from_str(raw).map_err(|err| HbrError::InvalidArgument(format!("pool config: {err}")))
    }
}

struct Loan {
    connection: Arc<Connection>,
    /// Number of unreleased acquires by the owning thread.
    depth: usize,
}

struct PoolState {
    idle: Vec<Arc<Connection>>,
    loans: HashMap<ThreadId, Loan>,
}

struct PoolInner {
    size: usize,
    acquire_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    returned: Condvar,
}

/// Thread-safe, fixed-size connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Builds the pool and eagerly opens `config.size` connections.
    ///
    /// Discovery, if requested, runs once and the result is shared by every
    /// connection.
    ///
    /// # Errors
    /// Returns `HbrError::InvalidArgument` for a zero size (before any
    /// connection is built) and propagates discovery errors.
    pub fn new(config: PoolConfig, source: InstanceSource<'_>) -> HbrResult<Self> {
        if config.size == 0 {
            return Err(HbrError::InvalidArgument(
                "pool size must be positive".to_string(),
            ));
        }

        let instance = source.resolve()?;
        // The pool owns the open/closed lifecycle.
        let connection_config = ConnectionConfig {
            autoconnect: false,
            ..config.connection
        };

        let mut idle = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            let connection = Connection::new(
                &connection_config,
                InstanceSource::Instance(Arc::clone(&instance)),
            )?;
            connection.open();
            idle.push(Arc::new(connection));
        }

        debug!(size = config.size, instance = instance.id(), "connection pool ready");
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                size: config.size,
                acquire_timeout: config.acquire_timeout,
                state: Mutex::new(PoolState {
                    idle,
                    loans: HashMap::with_capacity(config.size),
                }),
                returned: Condvar::new(),
            }),
        })
    }

    /// Fixed number of connections owned by the pool.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Connections currently free.
    pub fn available(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections currently on loan.
    pub fn on_loan(&self) -> usize {
        self.inner.state.lock().loans.len()
    }

    /// The connection on loan to the calling thread, if any.
    pub fn current(&self) -> Option<Arc<Connection>> {
        let state = self.inner.state.lock();
        state
            .loans
            .get(&thread::current().id())
            .map(|loan| Arc::clone(&loan.connection))
    }

    /// Takes a connection for the calling thread.
    ///
    /// A thread that already holds one gets the same connection back without
    /// touching the free list. Otherwise waits up to `timeout` (forever when
    /// `None`). Every successful call must be paired with `release`.
    ///
    /// # Errors
    /// Returns `HbrError::NoConnectionsAvailable` when the timeout expires.
    pub fn acquire(&self, timeout: Option<Duration>) -> HbrResult<Arc<Connection>> {
        let thread = thread::current().id();
        let mut state = self.inner.state.lock();

        if let Some(loan) = state.loans.get_mut(&thread) {
            loan.depth += 1;
            return Ok(Arc::clone(&loan.connection));
        }

        // An overflowing deadline is as good as none.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            if let Some(connection) = state.idle.pop() {
                state.loans.insert(
                    thread,
                    Loan {
                        connection: Arc::clone(&connection),
                        depth: 1,
                    },
                );
                debug!(connection = connection.id(), ?thread, "connection leased");
                return Ok(connection);
            }

            match deadline {
                None => self.inner.returned.wait(&mut state),
                Some(deadline) => {
                    let timed_out = self.inner.returned.wait_until(&mut state, deadline).timed_out();
                    if timed_out && state.idle.is_empty() {
                        warn!(?timeout, size = self.inner.size, "no connection available");
                        return Err(HbrError::NoConnectionsAvailable { timeout });
                    }
                }
            }
        }
    }

    /// Returns a connection taken with `acquire`.
    ///
    /// Nested acquires are counted; the connection goes back on the free list
    /// only when the outermost acquire is released.
    ///
    /// # Errors
    /// Returns `HbrError::NotOnLoan` if `connection` is not on loan from this
    /// pool to the calling thread (including a double release).
    pub fn release(&self, connection: &Arc<Connection>) -> HbrResult<()> {
        let thread = thread::current().id();
        let mut state = self.inner.state.lock();

        let loan = match state.loans.get_mut(&thread) {
            Some(loan) if Arc::ptr_eq(&loan.connection, connection) => loan,
            _ => {
                return Err(HbrError::NotOnLoan {
                    connection_id: connection.id(),
                })
            }
        };

        loan.depth -= 1;
        if loan.depth > 0 {
            return Ok(());
        }

        if let Some(loan) = state.loans.remove(&thread) {
            state.idle.push(loan.connection);
        }
        drop(state);

        self.inner.returned.notify_one();
        debug!(connection = connection.id(), ?thread, "connection returned");
        Ok(())
    }

    /// Scoped acquire: the guard releases on drop, including during unwinding.
    ///
    /// # Errors
    /// Returns `HbrError::NoConnectionsAvailable` when the timeout expires.
    pub fn lease(&self, timeout: Option<Duration>) -> HbrResult<PooledConnection> {
        let connection = self.acquire(timeout)?;
        Ok(PooledConnection {
            pool: self.clone(),
            connection: Some(connection),
            _thread_bound: PhantomData,
        })
    }

    /// `lease` with the configured `acquire_timeout`.
    pub fn connection(&self) -> HbrResult<PooledConnection> {
        self.lease(self.inner.acquire_timeout)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("size", &self.inner.size)
            .field("idle", &state.idle.len())
            .field("on_loan", &state.loans.len())
            .finish()
    }
}

/// RAII lease returning the connection to the pool on drop.
///
/// Not `Send`: the loan belongs to the thread that took it.
pub struct PooledConnection {
    pool: ConnectionPool,
    connection: Option<Arc<Connection>>,
    _thread_bound: PhantomData<*const ()>,
}

impl PooledConnection {
    /// Shared handle to the leased connection.
    pub fn handle(&self) -> &Arc<Connection> {
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection is only taken in drop"))
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.handle()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if let Err(err) = self.pool.release(&connection) {
            error!(error = %err, "failed to return leased connection");
        }
    }
}
