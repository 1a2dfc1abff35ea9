//! Contention strategies: interchangeable ways of allocating the next id.
//!
//! Every strategy runs the same three steps against the counter table and
//! differs only in what isolation it holds across the middle one:
//!
//! ```text
//!   READ ──────────► STALL ──────────► WRITE ──► commit
//!   count / max id   simulated work    insert(next, 0)
//!   └────────── contention window ───────────┘
//! ```
//!
//! | Kind | Held across the window | Concurrent callers |
//! |------|------------------------|--------------------|
//! | [`None`](StrategyKind::None) | nothing | collide: `UniqueViolation` |
//! | [`RowLockNowait`](StrategyKind::RowLockNowait) | row + tail locks | second caller is `Busy` |
//! | [`RowLockBlock`](StrategyKind::RowLockBlock) | row + tail locks of the read set | waiter reads a stale set and collides |
//! | [`TableLock`](StrategyKind::TableLock) | exclusive table lock | serialized |
//! | [`ProcessMutex`](StrategyKind::ProcessMutex) | in-process mutex | serialized within one dispatcher |
//! | [`ForcedSerial`](StrategyKind::ForcedSerial) | one sequential lane | serialized within one lane |
//!
//! No strategy retries. A `UniqueViolation` always reaches the caller.
//!
//! # Lock ordering
//!
//! Each strategy takes at most one kind of lock. `TableLock` takes the table
//! lock before any other statement; a transaction that reads the table and
//! only then asks for the table lock can deadlock with a peer doing the
//! same, which the store reports as [`Error::Deadlock`](crate::error::Error::Deadlock).
//! Code that combines the table lock with other resources must acquire the
//! table lock first.

pub mod process_mutex;
pub mod row_lock;
pub mod serial_lane;
pub mod table_lock;
pub mod unguarded;

pub use process_mutex::{CriticalSection, ProcessMutex};
pub use row_lock::RowLock;
pub use serial_lane::{ForcedSerial, SerialLane};
pub use table_lock::TableLock;
pub use unguarded::Unguarded;

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stall::Stall;
use crate::store::{CounterRow, RowStore, Transaction};

/// Tag of a contention strategy.
///
/// # Examples
///
/// ```rust
/// use contesa::strategy::StrategyKind;
///
/// let kind: StrategyKind = "table-lock".parse().unwrap();
/// assert_eq!(kind, StrategyKind::TableLock);
/// assert_eq!(kind.to_string(), "table-lock");
///
/// // Route-style names are accepted too.
/// assert_eq!("/nowait".parse::<StrategyKind>().unwrap(), StrategyKind::RowLockNowait);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Plain read-then-insert with no isolation.
    None,
    /// Locking read that fails fast when the rows are taken.
    RowLockNowait,
    /// Locking read that waits for the rows.
    RowLockBlock,
    /// Exclusive table lock around the whole allocation.
    TableLock,
    /// In-process mutex around the whole allocation.
    ProcessMutex,
    /// Allocation handed to a dedicated sequential worker.
    ForcedSerial,
}

impl StrategyKind {
    /// Every strategy, in declaration order.
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::None,
        StrategyKind::RowLockNowait,
        StrategyKind::RowLockBlock,
        StrategyKind::TableLock,
        StrategyKind::ProcessMutex,
        StrategyKind::ForcedSerial,
    ];

    /// Canonical kebab-case name.
    pub const fn name(&self) -> &'static str {
        match self {
            StrategyKind::None => "none",
            StrategyKind::RowLockNowait => "row-lock-nowait",
            StrategyKind::RowLockBlock => "row-lock-block",
            StrategyKind::TableLock => "table-lock",
            StrategyKind::ProcessMutex => "process-mutex",
            StrategyKind::ForcedSerial => "forced-serial",
        }
    }

    /// Returns `true` if at most one allocation of this kind can be in
    /// flight at a time, within one dispatcher.
    ///
    /// `ProcessMutex` and `ForcedSerial` only serialize callers of the same
    /// dispatcher; two dispatchers sharing a store race again.
    pub const fn serializes(&self) -> bool {
        !matches!(self, StrategyKind::None | StrategyKind::RowLockBlock)
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed == "/" {
            return Ok(StrategyKind::None);
        }
        let normalized = trimmed
            .trim_start_matches('/')
            .to_ascii_lowercase()
            .replace('_', "-");
        match normalized.as_str() {
            "none" => Ok(StrategyKind::None),
            "row-lock-nowait" | "nowait" => Ok(StrategyKind::RowLockNowait),
            "row-lock-block" | "for-update" => Ok(StrategyKind::RowLockBlock),
            "table-lock" => Ok(StrategyKind::TableLock),
            "process-mutex" | "asyncio-lock" => Ok(StrategyKind::ProcessMutex),
            "forced-serial" | "sync" => Ok(StrategyKind::ForcedSerial),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

/// A successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The id that was inserted.
    pub id: i64,
    /// The value read in the READ step (row count or max id).
    pub observed: i64,
}

/// Non-error result of one allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A row was inserted and committed.
    Allocated(Allocation),
    /// A non-blocking lock could not be taken; nothing was written.
    Busy,
}

impl Outcome {
    /// Returns the allocation, if any.
    pub fn allocation(&self) -> Option<Allocation> {
        match self {
            Outcome::Allocated(allocation) => Some(*allocation),
            Outcome::Busy => None,
        }
    }

    /// Returns `true` for [`Outcome::Busy`].
    pub fn is_busy(&self) -> bool {
        matches!(self, Outcome::Busy)
    }
}

/// The common interface of every contention strategy.
pub trait Allocate: Send + Sync {
    /// The tag of this strategy.
    fn kind(&self) -> StrategyKind;

    /// Allocates the next id and inserts its row.
    ///
    /// `stall` is paused between READ and WRITE.
    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome>;
}

/// READ by count, STALL, WRITE `count + 1`, inside an already open
/// transaction. The caller commits.
pub(crate) fn count_and_insert(
    txn: &mut (dyn Transaction + '_),
    stall: Stall,
) -> Result<Allocation> {
    let observed = txn.count()?;
    stall.pause();
    let id = observed + 1;
    txn.insert(CounterRow::placeholder(id))?;
    Ok(Allocation { id, observed })
}

/// Runs `f` on `callers` threads released together by a barrier.
#[cfg(test)]
pub(crate) fn race<T: Send>(callers: usize, f: impl Fn() -> T + Sync) -> Vec<T> {
    let barrier = std::sync::Barrier::new(callers);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    f()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_route_aliases() {
        let cases = [
            ("/", StrategyKind::None),
            ("/nowait", StrategyKind::RowLockNowait),
            ("/for-update", StrategyKind::RowLockBlock),
            ("/table-lock", StrategyKind::TableLock),
            ("/asyncio-lock", StrategyKind::ProcessMutex),
            ("/sync", StrategyKind::ForcedSerial),
        ];
        for (name, kind) in cases {
            assert_eq!(name.parse::<StrategyKind>().unwrap(), kind, "{}", name);
        }
    }

    #[test]
    fn test_screaming_snake_names() {
        assert_eq!(
            "ROW_LOCK_NOWAIT".parse::<StrategyKind>().unwrap(),
            StrategyKind::RowLockNowait
        );
        assert_eq!(
            "PROCESS_MUTEX".parse::<StrategyKind>().unwrap(),
            StrategyKind::ProcessMutex
        );
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(
            "items".parse::<StrategyKind>(),
            Err(Error::UnknownStrategy("items".to_string()))
        );
    }

    #[test]
    fn test_serializes() {
        assert!(!StrategyKind::None.serializes());
        assert!(!StrategyKind::RowLockBlock.serializes());
        assert!(StrategyKind::RowLockNowait.serializes());
        assert!(StrategyKind::TableLock.serializes());
        assert!(StrategyKind::ProcessMutex.serializes());
        assert!(StrategyKind::ForcedSerial.serializes());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&StrategyKind::RowLockBlock).unwrap();
        assert_eq!(json, r#""row-lock-block""#);
    }

    #[test]
    fn test_outcome_accessors() {
        let allocation = Allocation { id: 1, observed: 0 };
        assert_eq!(Outcome::Allocated(allocation).allocation(), Some(allocation));
        assert!(Outcome::Busy.is_busy());
        assert_eq!(Outcome::Busy.allocation(), None);
    }
}
