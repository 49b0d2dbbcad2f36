//! # Error Taxonomy
//!
//! One error enum shared by every HBridge crate so callers can match on the
//! failure class without caring which layer raised it.
//!
//! | Class              | Variants                                   | Retry? |
//! |--------------------|--------------------------------------------|--------|
//! | construction       | `InvalidArgument`                          | no     |
//! | usage              | `Usage`, `MalformedColumn`                 | no     |
//! | resource           | `NoConnectionsAvailable`                   | caller |
//! | pool bookkeeping   | `NotOnLoan`                                | no     |
//! | backing store      | `Discovery`, `TableNotFound`, `Commit`     | caller |

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the workspace.
pub type HbrResult<T> = Result<T, HbrError>;

/// Errors surfaced by the compatibility layer and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HbrError {
    /// A constructor argument was out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call is well-formed but not supported with the current settings.
    #[error("invalid usage: {0}")]
    Usage(String),

    /// A column specifier could not be split into family and qualifier.
    #[error("malformed column {column:?}: {reason}")]
    MalformedColumn {
        /// The offending specifier, lossily decoded.
        column: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// No pooled connection became free before the deadline.
    #[error("no connection available from pool within {}", describe_timeout(.timeout))]
    NoConnectionsAvailable {
        /// The timeout the caller asked for.
        timeout: Option<Duration>,
    },

    /// A connection was returned to a pool that had not lent it to this thread.
    #[error("connection {connection_id} is not on loan to the calling thread")]
    NotOnLoan {
        /// Identifier of the returned connection.
        connection_id: u64,
    },

    /// The backing instance could not be determined.
    #[error("instance discovery failed: {0}")]
    Discovery(String),

    /// The backing store has no table with this name.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The backing store rejected a commit.
    #[error("commit failed: {0}")]
    Commit(String),
}

fn describe_timeout(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(timeout) => format!("{}ms", timeout.as_millis()),
        None => "unbounded wait".to_string(),
    }
}

impl HbrError {
    /// Builds a `MalformedColumn` error from raw specifier bytes.
    pub fn malformed_column(column: &[u8], reason: &'static str) -> Self {
        HbrError::MalformedColumn {
            column: String::from_utf8_lossy(column).into_owned(),
            reason,
        }
    }

    /// Returns true when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HbrError::NoConnectionsAvailable { .. } | HbrError::Commit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_mentions_duration() {
        let err = HbrError::NoConnectionsAvailable {
            timeout: Some(Duration::from_millis(250)),
        };
        assert_eq!(
            err.to_string(),
            "no connection available from pool within 250ms"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn malformed_column_is_lossy() {
        let err = HbrError::malformed_column(b"cf::\xff", "too many separators");
        match err {
            HbrError::MalformedColumn { column, reason } => {
                assert!(column.starts_with("cf::"));
                assert_eq!(reason, "too many separators");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn usage_errors_are_not_retryable() {
        assert!(!HbrError::Usage("x".into()).is_retryable());
        assert!(!HbrError::InvalidArgument("x".into()).is_retryable());
    }
}
