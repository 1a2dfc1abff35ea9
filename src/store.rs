//! Row store gateway: a thin transactional interface over the counter table.
//!
//! The strategies never touch table state directly. They open a
//! [`Transaction`] through a [`RowStore`] and issue at most four kinds of
//! statement against it:
//!
//! | Statement | Effect |
//! |-----------|--------|
//! | [`count`](Transaction::count) | cardinality of the visible rows |
//! | [`select_ids_for_update`](Transaction::select_ids_for_update) | read ids, lock every row read plus the table tail |
//! | [`lock_table`](Transaction::lock_table) | exclusive table lock until the transaction ends |
//! | [`insert`](Transaction::insert) | add a row, enforcing id uniqueness |
//!
//! Everything a transaction holds is released by [`commit`](Transaction::commit),
//! [`rollback`](Transaction::rollback), or by dropping it while still open.
//!
//! The crate ships one implementation, [`MemoryStore`], an in-memory table
//! with the locking behavior of a relational engine.
//!
//! # Example
//!
//! ```rust
//! use contesa::store::{CounterRow, MemoryStore, RowStore};
//!
//! let store = MemoryStore::new();
//!
//! let mut txn = store.begin();
//! let next = txn.count().unwrap() + 1;
//! txn.insert(CounterRow::placeholder(next)).unwrap();
//! txn.commit().unwrap();
//!
//! assert_eq!(store.list_rows().unwrap(), vec![CounterRow { id: 1, value: 0 }]);
//! ```

pub mod memory;

pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier of a transaction, unique for the lifetime of a store.
pub type TxnId = u64;

/// The only persisted entity: one row of the counter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterRow {
    /// Unique key, chosen by the allocating strategy.
    pub id: i64,
    /// Payload. Always `0` for rows written by this crate.
    pub value: i64,
}

impl CounterRow {
    /// Creates a row with an explicit payload.
    pub const fn new(id: i64, value: i64) -> Self {
        Self { id, value }
    }

    /// Creates a row carrying the placeholder payload `0`.
    pub const fn placeholder(id: i64) -> Self {
        Self { id, value: 0 }
    }
}

/// How a locking read reacts to a lock held by another transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Suspend until the holder commits or rolls back.
    #[default]
    Block,
    /// Fail at once with [`Error::LockUnavailable`](crate::error::Error::LockUnavailable).
    NoWait,
}

/// Which committed rows a read statement can see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Isolation {
    /// Every statement sees all rows committed before it started.
    #[default]
    ReadCommitted,
    /// The first read statement fixes the snapshot for the whole transaction.
    RepeatableRead,
}

/// One open transaction against the counter table.
///
/// A transaction's own inserts are always visible to itself, whatever the
/// isolation level.
pub trait Transaction {
    /// Returns this transaction's identifier.
    fn id(&self) -> TxnId;

    /// Returns the number of rows visible to this transaction.
    fn count(&mut self) -> Result<i64>;

    /// Reads the visible ids and locks every row read plus the table tail.
    ///
    /// The ids returned are those of the snapshot taken when the statement
    /// started. Rows committed by a transaction this call had to wait for
    /// are not in the result.
    fn select_ids_for_update(&mut self, policy: WaitPolicy) -> Result<Vec<i64>>;

    /// Takes the exclusive table lock, held until the transaction ends.
    fn lock_table(&mut self) -> Result<()>;

    /// Inserts a row, failing if its id is already taken.
    fn insert(&mut self, row: CounterRow) -> Result<()>;

    /// Returns the visible rows in insertion order.
    fn rows(&mut self) -> Result<Vec<CounterRow>>;

    /// Publishes this transaction's inserts and releases its locks.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards this transaction's inserts and releases its locks.
    fn rollback(self: Box<Self>);
}

/// A shared table that hands out transactions.
pub trait RowStore: Send + Sync {
    /// Opens a new transaction.
    fn begin(&self) -> Box<dyn Transaction + '_>;

    /// Returns every committed row in insertion order.
    fn list_rows(&self) -> Result<Vec<CounterRow>> {
        let mut txn = self.begin();
        let rows = txn.rows()?;
        txn.commit()?;
        Ok(rows)
    }
}
