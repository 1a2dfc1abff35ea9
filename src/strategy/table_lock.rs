//! Exclusive table lock around the whole allocation.
//!
//! The lock is taken before the READ step, so a second caller parks in
//! `lock_table` until the first commits and then counts the row the first
//! one inserted. Taking it after reading would let two callers each hold a
//! shared access the other's lock request waits on.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::stall::Stall;
use crate::store::RowStore;
use crate::strategy::{count_and_insert, Allocate, Outcome, StrategyKind};

/// Fully serialized allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableLock;

impl Allocate for TableLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TableLock
    }

    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome> {
        let mut txn = store.begin();
        txn.lock_table()?;
        let allocation = count_and_insert(txn.as_mut(), stall)?;
        txn.commit()?;
        debug!(strategy = %self.kind(), id = allocation.id, "allocated");
        Ok(Outcome::Allocated(allocation))
    }
}
