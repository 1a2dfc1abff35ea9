//! Read-then-insert with no isolation at all.
//!
//! Two callers whose READ steps both land before either WRITE compute the
//! same id. The store's unique index lets the first insert through and
//! fails the second with `UniqueViolation`, which is returned as is.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::stall::Stall;
use crate::store::RowStore;
use crate::strategy::{count_and_insert, Allocate, Outcome, StrategyKind};

/// The racy baseline strategy.
///
/// # Examples
///
/// ```rust
/// use contesa::stall::Stall;
/// use contesa::store::{MemoryStore, RowStore};
/// use contesa::strategy::{Allocate, Outcome, Unguarded};
/// use std::sync::Arc;
///
/// let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
/// let outcome = Unguarded.allocate(&store, Stall::none()).unwrap();
/// assert_eq!(outcome.allocation().unwrap().id, 1);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl Allocate for Unguarded {
    fn kind(&self) -> StrategyKind {
        StrategyKind::None
    }

    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome> {
        let mut txn = store.begin();
        let allocation = count_and_insert(txn.as_mut(), stall)?;
        txn.commit()?;
        debug!(strategy = %self.kind(), id = allocation.id, "allocated");
        Ok(Outcome::Allocated(allocation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use crate::strategy::{race, Allocation};
    use std::time::Duration;

    fn store() -> Arc<dyn RowStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn test_sequential_allocations() {
        let store = store();
        for expected in 1..=3 {
            let outcome = Unguarded.allocate(&store, Stall::none()).unwrap();
            assert_eq!(
                outcome,
                Outcome::Allocated(Allocation {
                    id: expected,
                    observed: expected - 1
                })
            );
        }
        assert_eq!(store.list_rows().unwrap().len(), 3);
    }

    #[test]
    fn test_concurrent_callers_collide() {
        let store = store();
        let stall = Stall::new(Duration::from_millis(300));

        let results = race(2, || Unguarded.allocate(&store, stall));

        let allocated: Vec<Outcome> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().copied())
            .collect();
        assert_eq!(
            allocated,
            vec![Outcome::Allocated(Allocation { id: 1, observed: 0 })]
        );
        assert!(results
            .iter()
            .any(|r| r == &Err(Error::UniqueViolation { id: 1 })));
        assert_eq!(store.list_rows().unwrap().len(), 1);
    }
}
