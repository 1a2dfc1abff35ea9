//! Unified error type for the store, the strategies and the dispatcher.
//!
//! Every layer returns the same [`Error`], so a failure raised deep inside a
//! transaction reaches the caller of [`Dispatcher::handle`] unchanged. The
//! only error a strategy ever swallows is [`Error::LockUnavailable`], and
//! only the non-blocking row-lock strategy does it.
//!
//! [`Dispatcher::handle`]: crate::dispatcher::Dispatcher::handle
//!
//! # Example
//!
//! ```rust
//! use contesa::error::Error;
//!
//! let err = Error::UniqueViolation { id: 1 };
//! assert!(err.is_unique_violation());
//! assert_eq!(
//!     err.to_string(),
//!     "duplicate key value violates unique constraint: id=1 already exists"
//! );
//! ```

use std::fmt::{self, Display};

use thiserror::Error;

use crate::store::TxnId;

/// What a lock request was aimed at when it could not be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    /// A single committed row, by id.
    Row(i64),
    /// The end-of-range marker that follows the last row.
    Tail,
    /// The whole table.
    Table,
}

impl Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::Row(id) => write!(f, "row id={}", id),
            LockTarget::Tail => write!(f, "table tail"),
            LockTarget::Table => write!(f, "table"),
        }
    }
}

/// Error type for every operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Two allocations computed the same id; the second insert lost.
    #[error("duplicate key value violates unique constraint: id={id} already exists")]
    UniqueViolation { id: i64 },

    /// A `NoWait` lock request found a conflicting lock.
    #[error("could not obtain lock on {target}")]
    LockUnavailable { target: LockTarget },

    /// Waiting would close a cycle in the waits-for graph.
    #[error("deadlock detected: transaction {waiter} waits for transaction {holder}")]
    Deadlock { waiter: TxnId, holder: TxnId },

    /// No strategy is registered under this name.
    #[error("unknown allocation strategy: {0}")]
    UnknownStrategy(String),

    /// The serial lane's worker thread is gone.
    #[error("serial lane is closed")]
    LaneClosed,
}

impl Error {
    /// Returns `true` for [`Error::UniqueViolation`].
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::UniqueViolation { .. })
    }

    /// Returns `true` for [`Error::LockUnavailable`].
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, Error::LockUnavailable { .. })
    }
}

/// Result type for every operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_target_display() {
        assert_eq!(LockTarget::Row(7).to_string(), "row id=7");
        assert_eq!(LockTarget::Tail.to_string(), "table tail");
        assert_eq!(LockTarget::Table.to_string(), "table");
    }

    #[test]
    fn test_lock_unavailable_display() {
        let err = Error::LockUnavailable {
            target: LockTarget::Tail,
        };
        assert_eq!(err.to_string(), "could not obtain lock on table tail");
        assert!(err.is_lock_unavailable());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_deadlock_display() {
        let err = Error::Deadlock {
            waiter: 2,
            holder: 1,
        };
        assert_eq!(
            err.to_string(),
            "deadlock detected: transaction 2 waits for transaction 1"
        );
    }
}
