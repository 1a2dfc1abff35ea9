//! In-memory counter table with row locks, a table lock and a unique index.
//!
//! [`MemoryStore`] stands in for the relational database behind the
//! counter. It reproduces the behaviors the strategies depend on:
//!
//! - **Unique index**: an insert whose id is committed fails with
//!   `UniqueViolation`; an insert whose id is pending in another open
//!   transaction waits for that transaction, then re-checks.
//! - **Row locks**: `select_ids_for_update` locks each row it read plus the
//!   table tail, a pseudo row standing for the range after the last row.
//!   Locks are held until the transaction ends.
//! - **Phantoms**: a locking read that had to wait still returns the ids of
//!   the snapshot it started with.
//! - **Table lock**: every statement registers the transaction as a user of
//!   the table until it ends. `lock_table` waits until it is the only user
//!   and then blocks every other statement.
//! - **Deadlock detection**: each blocking wait adds a waits-for edge. A
//!   wait that would close a cycle fails with `Deadlock`.
//!
//! All state lives behind one [`parking_lot::Mutex`]; blocked statements
//! park on a [`parking_lot::Condvar`] that is notified whenever a
//! transaction ends.
//!
//! ```text
//!   txn A ── select_ids_for_update ──► locks { Row(1), Row(2), Tail }
//!   txn B ── select_ids_for_update(Block) ──► waits on Tail (B → A)
//!   txn A ── insert(3), commit ──► releases, notify_all
//!   txn B ── wakes, locks, returns [1, 2]   (row 3 is a phantom)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{Error, LockTarget, Result};
use crate::store::{CounterRow, Isolation, RowStore, Transaction, TxnId, WaitPolicy};

/// A committed row and the commit version that published it.
#[derive(Debug, Clone, Copy)]
struct StoredRow {
    row: CounterRow,
    version: u64,
}

#[derive(Debug, Default)]
struct TableState {
    /// Committed rows in commit order.
    rows: Vec<StoredRow>,
    /// Unique index over committed ids: id -> position in `rows`.
    committed: HashMap<i64, usize>,
    /// Uncommitted inserts: id -> inserting transaction.
    pending: HashMap<i64, TxnId>,
    /// Row and tail locks: target -> holder.
    row_locks: HashMap<LockTarget, TxnId>,
    table_lock: Option<TxnId>,
    /// Open transactions that have issued a statement on the table.
    users: BTreeSet<TxnId>,
    /// Blocked transaction -> transaction it waits for.
    waits_for: HashMap<TxnId, TxnId>,
    /// Last published commit version.
    version: u64,
}

impl TableState {
    /// Holder of the table lock, if it is someone other than `me`.
    fn table_conflict(&self, me: TxnId) -> Option<TxnId> {
        self.table_lock.filter(|holder| *holder != me)
    }

    /// First transaction other than `me` that prevents an exclusive table lock.
    fn exclusive_conflict(&self, me: TxnId) -> Option<TxnId> {
        self.table_conflict(me)
            .or_else(|| self.users.iter().copied().find(|user| *user != me))
    }

    fn visible(&self, snapshot: u64) -> impl Iterator<Item = CounterRow> + '_ {
        self.rows
            .iter()
            .filter(move |stored| stored.version <= snapshot)
            .map(|stored| stored.row)
    }

    /// Returns `true` if `waiter` blocking on `holder` closes a cycle.
    fn would_deadlock(&self, waiter: TxnId, holder: TxnId) -> bool {
        let mut current = holder;
        for _ in 0..=self.waits_for.len() {
            if current == waiter {
                return true;
            }
            match self.waits_for.get(&current) {
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }

    fn publish(&mut self, rows: impl IntoIterator<Item = CounterRow>) {
        self.version += 1;
        let version = self.version;
        for row in rows {
            self.pending.remove(&row.id);
            self.committed.insert(row.id, self.rows.len());
            self.rows.push(StoredRow { row, version });
        }
    }

    fn release(&mut self, me: TxnId) {
        self.pending.retain(|_, holder| *holder != me);
        self.row_locks.retain(|_, holder| *holder != me);
        if self.table_lock == Some(me) {
            self.table_lock = None;
        }
        self.users.remove(&me);
        self.waits_for.remove(&me);
    }
}

/// An in-memory counter table shared by concurrent transactions.
///
/// # Examples
///
/// A non-blocking locking read fails while another transaction holds the
/// table tail:
///
/// ```rust
/// use contesa::error::{Error, LockTarget};
/// use contesa::store::{MemoryStore, RowStore, WaitPolicy};
///
/// let store = MemoryStore::new();
///
/// let mut first = store.begin();
/// assert_eq!(first.select_ids_for_update(WaitPolicy::NoWait).unwrap(), Vec::<i64>::new());
///
/// let mut second = store.begin();
/// assert_eq!(
///     second.select_ids_for_update(WaitPolicy::NoWait),
///     Err(Error::LockUnavailable { target: LockTarget::Tail })
/// );
/// ```
pub struct MemoryStore {
    isolation: Isolation,
    state: Mutex<TableState>,
    released: Condvar,
    next_txn: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty table with [`Isolation::ReadCommitted`].
    pub fn new() -> Self {
        Self {
            isolation: Isolation::default(),
            state: Mutex::new(TableState::default()),
            released: Condvar::new(),
            next_txn: AtomicU64::new(1),
        }
    }

    /// Sets the isolation level used by transactions of this store.
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Returns the isolation level of this store.
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Returns the number of committed rows.
    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Returns `true` if no row has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a transaction with its concrete type.
    pub fn transaction(&self) -> MemoryTransaction<'_> {
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        trace!(txn = id, "begin");
        MemoryTransaction {
            store: self,
            id,
            snapshot: None,
            inserted: Vec::new(),
            open: true,
        }
    }

    /// Parks `waiter` until some transaction ends.
    ///
    /// Fails instead of parking if `waiter` is already (transitively) waited
    /// on by `holder`.
    fn wait_for(
        &self,
        state: &mut MutexGuard<'_, TableState>,
        waiter: TxnId,
        holder: TxnId,
        target: LockTarget,
    ) -> Result<()> {
        if state.would_deadlock(waiter, holder) {
            warn!(txn = waiter, holder, %target, "deadlock detected");
            return Err(Error::Deadlock { waiter, holder });
        }
        state.waits_for.insert(waiter, holder);
        debug!(txn = waiter, holder, %target, "waiting for lock");
        self.released.wait(state);
        state.waits_for.remove(&waiter);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryStore")
            .field("isolation", &self.isolation)
            .field("rows", &state.rows.len())
            .field("open", &state.users.len())
            .field("version", &state.version)
            .finish()
    }
}

impl RowStore for MemoryStore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(self.transaction())
    }
}

/// A transaction on a [`MemoryStore`].
///
/// Dropping an open transaction rolls it back.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    id: TxnId,
    snapshot: Option<u64>,
    inserted: Vec<CounterRow>,
    open: bool,
}

impl<'a> MemoryTransaction<'a> {
    /// Locks the table state once no other transaction holds the table lock,
    /// and registers this transaction as a user of the table.
    fn enter(&self) -> Result<MutexGuard<'a, TableState>> {
        let mut state = self.store.state.lock();
        while let Some(holder) = state.table_conflict(self.id) {
            self.store
                .wait_for(&mut state, self.id, holder, LockTarget::Table)?;
        }
        state.users.insert(self.id);
        Ok(state)
    }

    /// Commit version this statement reads at.
    fn snapshot_for(&mut self, state: &TableState) -> u64 {
        match self.store.isolation {
            Isolation::ReadCommitted => state.version,
            Isolation::RepeatableRead => *self.snapshot.get_or_insert(state.version),
        }
    }

    fn owns(&self, id: i64) -> bool {
        self.inserted.iter().any(|row| row.id == id)
    }

    fn finish(&mut self, publish: bool) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut state = self.store.state.lock();
        if publish && !self.inserted.is_empty() {
            state.publish(self.inserted.drain(..));
        }
        state.release(self.id);
        drop(state);

        self.store.released.notify_all();
        trace!(txn = self.id, publish, "end");
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn id(&self) -> TxnId {
        self.id
    }

    fn count(&mut self) -> Result<i64> {
        let state = self.enter()?;
        let snapshot = self.snapshot_for(&state);
        let committed = state.visible(snapshot).count();
        Ok((committed + self.inserted.len()) as i64)
    }

    fn select_ids_for_update(&mut self, policy: WaitPolicy) -> Result<Vec<i64>> {
        let mut state = self.enter()?;
        let snapshot = self.snapshot_for(&state);
        let ids: Vec<i64> = state
            .visible(snapshot)
            .map(|row| row.id)
            .chain(self.inserted.iter().map(|row| row.id))
            .collect();

        let targets: Vec<LockTarget> = ids
            .iter()
            .map(|id| LockTarget::Row(*id))
            .chain(std::iter::once(LockTarget::Tail))
            .collect();

        loop {
            let conflict = targets.iter().find_map(|target| {
                state
                    .row_locks
                    .get(target)
                    .filter(|holder| **holder != self.id)
                    .map(|holder| (*target, *holder))
            });
            match (conflict, policy) {
                (None, _) => break,
                (Some((target, holder)), WaitPolicy::NoWait) => {
                    debug!(txn = self.id, holder, %target, "lock unavailable");
                    return Err(Error::LockUnavailable { target });
                }
                (Some((target, holder)), WaitPolicy::Block) => {
                    self.store.wait_for(&mut state, self.id, holder, target)?;
                }
            }
        }

        for target in targets {
            state.row_locks.insert(target, self.id);
        }
        Ok(ids)
    }

    fn lock_table(&mut self) -> Result<()> {
        let mut state = self.store.state.lock();
        while let Some(holder) = state.exclusive_conflict(self.id) {
            self.store
                .wait_for(&mut state, self.id, holder, LockTarget::Table)?;
        }
        state.table_lock = Some(self.id);
        state.users.insert(self.id);
        trace!(txn = self.id, "table locked");
        Ok(())
    }

    fn insert(&mut self, row: CounterRow) -> Result<()> {
        let mut state = self.enter()?;
        loop {
            if state.committed.contains_key(&row.id) || self.owns(row.id) {
                debug!(txn = self.id, id = row.id, "unique violation");
                return Err(Error::UniqueViolation { id: row.id });
            }
            match state.pending.get(&row.id).copied() {
                Some(holder) if holder != self.id => {
                    self.store
                        .wait_for(&mut state, self.id, holder, LockTarget::Row(row.id))?;
                }
                _ => break,
            }
        }
        state.pending.insert(row.id, self.id);
        self.inserted.push(row);
        Ok(())
    }

    fn rows(&mut self) -> Result<Vec<CounterRow>> {
        let state = self.enter()?;
        let snapshot = self.snapshot_for(&state);
        Ok(state
            .visible(snapshot)
            .chain(self.inserted.iter().copied())
            .collect())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish(true);
        Ok(())
    }

    fn rollback(mut self: Box<Self>) {
        self.finish(false);
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.open {
            trace!(txn = self.id, "rolled back on drop");
            self.finish(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    const HOLD: Duration = Duration::from_millis(100);

    fn seed(store: &MemoryStore, ids: &[i64]) {
        let mut txn = store.begin();
        for id in ids {
            txn.insert(CounterRow::placeholder(*id)).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.list_rows().unwrap(), vec![]);
        assert_eq!(store.isolation(), Isolation::ReadCommitted);
    }

    #[test]
    fn test_commit_publishes_rows_in_order() {
        let store = MemoryStore::new();
        seed(&store, &[1, 2]);
        seed(&store, &[3]);
        let ids: Vec<i64> = store.list_rows().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_own_inserts_are_visible() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.insert(CounterRow::placeholder(1)).unwrap();
        assert_eq!(txn.count().unwrap(), 1);
        assert_eq!(txn.rows().unwrap(), vec![CounterRow::placeholder(1)]);

        let mut other = store.begin();
        assert_eq!(other.count().unwrap(), 0);
    }

    #[test]
    fn test_rollback_discards_rows() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.insert(CounterRow::placeholder(1)).unwrap();
        txn.rollback();
        assert!(store.is_empty());
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin();
            txn.insert(CounterRow::placeholder(1)).unwrap();
        }
        assert!(store.is_empty());

        // The id is free again.
        seed(&store, &[1]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unique_violation_on_committed_id() {
        let store = MemoryStore::new();
        seed(&store, &[1]);

        let mut txn = store.begin();
        assert_eq!(
            txn.insert(CounterRow::placeholder(1)),
            Err(Error::UniqueViolation { id: 1 })
        );
    }

    #[test]
    fn test_unique_violation_on_own_insert() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        txn.insert(CounterRow::placeholder(5)).unwrap();
        assert_eq!(
            txn.insert(CounterRow::placeholder(5)),
            Err(Error::UniqueViolation { id: 5 })
        );
    }

    #[test]
    fn test_pending_insert_waits_then_fails_after_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        first.insert(CounterRow::placeholder(1)).unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                let mut txn = store.begin();
                txn.insert(CounterRow::placeholder(1))
            });
            thread::sleep(HOLD);
            first.commit().unwrap();
            assert_eq!(
                second.join().unwrap(),
                Err(Error::UniqueViolation { id: 1 })
            );
        });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pending_insert_proceeds_after_rollback() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        first.insert(CounterRow::placeholder(1)).unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                let mut txn = store.begin();
                txn.insert(CounterRow::placeholder(1))?;
                txn.commit()
            });
            thread::sleep(HOLD);
            first.rollback();
            assert_eq!(second.join().unwrap(), Ok(()));
        });
        assert_eq!(store.list_rows().unwrap(), vec![CounterRow::placeholder(1)]);
    }

    #[test]
    fn test_select_for_update_locks_rows_and_tail() {
        let store = MemoryStore::new();
        seed(&store, &[1, 2]);

        let mut first = store.begin();
        assert_eq!(
            first.select_ids_for_update(WaitPolicy::NoWait).unwrap(),
            vec![1, 2]
        );

        let mut second = store.begin();
        assert_eq!(
            second.select_ids_for_update(WaitPolicy::NoWait),
            Err(Error::LockUnavailable {
                target: LockTarget::Row(1)
            })
        );
    }

    #[test]
    fn test_select_for_update_nowait_on_empty_table() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        assert!(first
            .select_ids_for_update(WaitPolicy::NoWait)
            .unwrap()
            .is_empty());

        let mut second = store.begin();
        assert_eq!(
            second.select_ids_for_update(WaitPolicy::NoWait),
            Err(Error::LockUnavailable {
                target: LockTarget::Tail
            })
        );

        first.commit().unwrap();
        assert!(second
            .select_ids_for_update(WaitPolicy::NoWait)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_blocking_select_returns_phantom_free_snapshot() {
        let store = MemoryStore::new();
        seed(&store, &[1]);

        let mut first = store.begin();
        assert_eq!(first.select_ids_for_update(WaitPolicy::Block).unwrap(), vec![1]);
        first.insert(CounterRow::placeholder(2)).unwrap();

        thread::scope(|s| {
            let second = s.spawn(|| {
                let mut txn = store.begin();
                txn.select_ids_for_update(WaitPolicy::Block)
            });
            thread::sleep(HOLD);
            first.commit().unwrap();
            // Row 2 was committed while the second reader waited: not returned.
            assert_eq!(second.join().unwrap(), Ok(vec![1]));
        });
    }

    #[test]
    fn test_table_lock_blocks_other_statements() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        first.lock_table().unwrap();
        first.insert(CounterRow::placeholder(1)).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut txn = store.begin();
                txn.count()
            });
            thread::sleep(HOLD);
            first.commit().unwrap();
            assert_eq!(reader.join().unwrap(), Ok(1));
        });
    }

    #[test]
    fn test_table_lock_waits_for_other_users() {
        let store = MemoryStore::new();
        let mut reader = store.begin();
        assert_eq!(reader.count().unwrap(), 0);

        thread::scope(|s| {
            let locker = s.spawn(|| {
                let mut txn = store.begin();
                txn.lock_table()?;
                txn.count()
            });
            thread::sleep(HOLD);
            reader.insert(CounterRow::placeholder(1)).unwrap();
            reader.commit().unwrap();
            assert_eq!(locker.join().unwrap(), Ok(1));
        });
    }

    #[test]
    fn test_lock_upgrade_deadlock_is_detected() {
        let store = MemoryStore::new();
        let barrier = Barrier::new(2);

        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        let mut txn = store.begin();
                        txn.count()?;
                        barrier.wait();
                        txn.lock_table()?;
                        txn.commit()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let deadlocks = results
            .iter()
            .filter(|r| matches!(r, Err(Error::Deadlock { .. })))
            .count();
        assert_eq!(deadlocks, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn test_read_committed_sees_new_commits() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        assert_eq!(txn.count().unwrap(), 0);
        seed(&store, &[1]);
        assert_eq!(txn.count().unwrap(), 1);
    }

    #[test]
    fn test_repeatable_read_count_is_stale() {
        let store = MemoryStore::new().with_isolation(Isolation::RepeatableRead);
        let mut txn = store.begin();
        assert_eq!(txn.count().unwrap(), 0);

        seed(&store, &[1]);

        assert_eq!(txn.count().unwrap(), 0);
        // Uniqueness is checked against the latest state, not the snapshot.
        assert_eq!(
            txn.insert(CounterRow::placeholder(1)),
            Err(Error::UniqueViolation { id: 1 })
        );
    }

    #[test]
    fn test_repeatable_read_snapshot_starts_after_table_lock() {
        let store = MemoryStore::new().with_isolation(Isolation::RepeatableRead);
        seed(&store, &[1]);

        let mut txn = store.begin();
        txn.lock_table().unwrap();
        assert_eq!(txn.count().unwrap(), 1);
    }

    #[test]
    fn test_debug_format() {
        let store = MemoryStore::new();
        seed(&store, &[1]);
        let debug_str = format!("{:?}", store);
        assert!(debug_str.starts_with("MemoryStore"));
        assert!(debug_str.contains("rows: 1"));
    }
}
