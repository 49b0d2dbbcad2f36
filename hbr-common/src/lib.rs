// hbr-common - Shared types for HBridge
//
// Errors, timestamps, column specifiers, row mutations and read cells used by
// both the storage backends and the legacy-compatible client.

pub mod cell;
pub mod column;
pub mod error;
pub mod mutation;
pub mod types;

// Re-export for convenience
pub use cell::*;
pub use column::*;
pub use error::*;
pub use mutation::*;
pub use types::*;
