//! Locking reads: `SELECT ... FOR UPDATE` with and without `NOWAIT`.
//!
//! Both variants lock every row they read plus the table tail, then insert
//! `max(id) + 1`. They differ in what happens to the second caller:
//!
//! - **NoWait**: the lock request fails at once. The strategy turns that
//!   into [`Outcome::Busy`] and writes nothing, so the table stays correct.
//! - **Block**: the second caller waits, then gets the ids of the snapshot
//!   it started with. The row the first caller inserted in the meantime is a
//!   phantom it never sees, so both compute the same id and the second
//!   insert fails with `UniqueViolation`. Locking the read set does not
//!   protect rows that did not exist when it was read.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::stall::Stall;
use crate::store::{CounterRow, RowStore, WaitPolicy};
use crate::strategy::{Allocate, Allocation, Outcome, StrategyKind};

/// Allocation guarded by row locks on the read set.
///
/// # Examples
///
/// ```rust
/// use contesa::stall::Stall;
/// use contesa::store::{MemoryStore, RowStore};
/// use contesa::strategy::{Allocate, RowLock, StrategyKind};
/// use std::sync::Arc;
///
/// let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
/// let strategy = RowLock::nowait();
/// assert_eq!(strategy.kind(), StrategyKind::RowLockNowait);
///
/// let outcome = strategy.allocate(&store, Stall::none()).unwrap();
/// assert_eq!(outcome.allocation().unwrap().observed, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLock {
    policy: WaitPolicy,
}

impl RowLock {
    /// Creates the variant that fails fast with `Busy`.
    pub const fn nowait() -> Self {
        Self {
            policy: WaitPolicy::NoWait,
        }
    }

    /// Creates the variant that waits for the locks.
    pub const fn blocking() -> Self {
        Self {
            policy: WaitPolicy::Block,
        }
    }

    /// Returns the wait policy of the locking read.
    pub const fn policy(&self) -> WaitPolicy {
        self.policy
    }
}

impl Allocate for RowLock {
    fn kind(&self) -> StrategyKind {
        match self.policy {
            WaitPolicy::NoWait => StrategyKind::RowLockNowait,
            WaitPolicy::Block => StrategyKind::RowLockBlock,
        }
    }

    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome> {
        let mut txn = store.begin();
        let ids = match txn.select_ids_for_update(self.policy) {
            Ok(ids) => ids,
            Err(Error::LockUnavailable { target }) if self.policy == WaitPolicy::NoWait => {
                txn.rollback();
                debug!(strategy = %self.kind(), %target, "table busy");
                return Ok(Outcome::Busy);
            }
            Err(err) => return Err(err),
        };

        let observed = ids.iter().copied().max().unwrap_or(0);
        stall.pause();
        let id = observed + 1;
        txn.insert(CounterRow::placeholder(id))?;
        txn.commit()?;

        debug!(strategy = %self.kind(), id, "allocated");
        Ok(Outcome::Allocated(Allocation { id, observed }))
    }
}
