//! # HBridge Storage Backends
//!
//! Purpose: Define the collaborator interface the compatibility client talks
//! to, plus an in-memory implementation for tests and local tooling.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `StorageInstance` / `StorageTable` keep the client
//!    decoupled from any concrete store.
//! 2. **Sharded Locks**: The memory backend shards rows across locks.
//! 3. **Per-Row Atomicity**: Commits never promise more than one row at a time.

mod engine;
mod memory;

pub use engine::{discover_instance, InstanceListing, InstanceLocator, StorageInstance, StorageTable};
pub use memory::{MemoryCluster, MemoryInstance, MemoryTable};
