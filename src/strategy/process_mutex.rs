//! In-process mutual exclusion around the whole allocation.
//!
//! [`CriticalSection`] is an explicit exclusive-access guard. It is
//! **process-local**: it serializes the callers that share this object, and
//! nothing else. Each [`Dispatcher`](crate::dispatcher::Dispatcher) models
//! one service process and owns its own section, so two dispatchers over the
//! same store run their critical sections in parallel and race exactly like
//! [`Unguarded`](crate::strategy::Unguarded).

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::Result;
use crate::stall::Stall;
use crate::store::RowStore;
use crate::strategy::{count_and_insert, Allocate, Outcome, StrategyKind};

/// A process-local exclusive-access guard.
///
/// # Examples
///
/// ```rust
/// use contesa::strategy::CriticalSection;
///
/// let section = CriticalSection::new();
/// {
///     let _guard = section.enter();
///     assert!(section.is_held());
/// }
/// assert!(!section.is_held());
/// ```
#[derive(Default)]
pub struct CriticalSection {
    lock: Mutex<()>,
}

/// Proof of being inside a [`CriticalSection`]. Leaving scope exits it.
pub struct CriticalGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl CriticalSection {
    /// Creates an unheld section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the section is free, then enters it.
    pub fn enter(&self) -> CriticalGuard<'_> {
        CriticalGuard {
            _guard: self.lock.lock(),
        }
    }

    /// Returns `true` if some caller is inside the section.
    pub fn is_held(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Debug for CriticalSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("held", &self.is_held())
            .finish()
    }
}

/// Allocation serialized by a [`CriticalSection`] held until commit.
#[derive(Debug, Default)]
pub struct ProcessMutex {
    section: CriticalSection,
}

impl ProcessMutex {
    /// Creates the strategy with a fresh section of its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the section this strategy enters.
    pub fn section(&self) -> &CriticalSection {
        &self.section
    }
}

impl Allocate for ProcessMutex {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProcessMutex
    }

    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome> {
        let guard = self.section.enter();
        trace!(strategy = %self.kind(), "entered critical section");

        let mut txn = store.begin();
        let allocation = count_and_insert(txn.as_mut(), stall)?;
        txn.commit()?;
        drop(guard);

        debug!(strategy = %self.kind(), id = allocation.id, "allocated");
        Ok(Outcome::Allocated(allocation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{CounterRow, MemoryStore};
    use crate::strategy::race;
    use std::time::Duration;

    #[test]
    fn test_section_release_on_drop() {
        let section = CriticalSection::new();
        let guard = section.enter();
        assert!(section.is_held());
        drop(guard);
        assert!(!section.is_held());
        assert_eq!(format!("{:?}", section), "CriticalSection { held: false }");
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
        let strategy = ProcessMutex::new();
        let stall = Stall::new(Duration::from_millis(10));

        let results = race(6, || strategy.allocate(&store, stall));

        let mut ids: Vec<i64> = results
            .into_iter()
            .map(|r| r.unwrap().allocation().unwrap().id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert!(!strategy.section().is_held());
    }

    #[test]
    fn test_section_is_released_after_failure() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
        let strategy = ProcessMutex::new();

        // Occupy id 1 behind the strategy's back.
        let mut txn = store.begin();
        txn.insert(CounterRow::placeholder(1)).unwrap();
        txn.commit().unwrap();

        // count() = 1 -> id 2; no failure expected.
        assert!(strategy.allocate(&store, Stall::none()).is_ok());

        // A row the counter cannot account for: ids are no longer dense.
        let mut txn = store.begin();
        txn.insert(CounterRow::placeholder(4)).unwrap();
        txn.commit().unwrap();

        // count() = 3 -> id 4 is taken.
        assert_eq!(
            strategy.allocate(&store, Stall::none()),
            Err(Error::UniqueViolation { id: 4 })
        );
        assert!(!strategy.section().is_held());
    }

    #[test]
    fn test_separate_sections_race() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
        let sections = [ProcessMutex::new(), ProcessMutex::new()];
        let stall = Stall::new(Duration::from_millis(300));

        let barrier = std::sync::Barrier::new(2);
        let results: Vec<Result<Outcome>> = std::thread::scope(|s| {
            let handles: Vec<_> = sections
                .iter()
                .map(|strategy| {
                    let (store, barrier) = (&store, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        strategy.allocate(store, stall)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().any(|r| r.is_ok()));
        assert!(results
            .iter()
            .any(|r| r == &Err(Error::UniqueViolation { id: 1 })));
    }
}
