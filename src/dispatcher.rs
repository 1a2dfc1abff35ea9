//! Request dispatch: pick a strategy, run it, shape the result.
//!
//! A [`Dispatcher`] stands for one service process. It owns the
//! process-scoped resources of the strategies that need them, one
//! [`CriticalSection`](crate::strategy::CriticalSection) and one
//! [`SerialLane`](crate::strategy::SerialLane), and shares the
//! [`RowStore`] with any other dispatcher built over the same `Arc`.
//!
//! ```text
//!                ┌──────────────── Dispatcher ────────────────┐
//!   handle(kind) │ strategy(kind) ──► allocate(store, stall)  │ ──► RowStore
//!                │      │                                     │       ▲
//!                │      └──► stats (allocated / busy / failed)│       │
//!                └────────────────────────────────────────────┘       │
//!                ┌──────────────── Dispatcher ────────────────┐       │
//!                │ its own mutex and lane                     │ ──────┘
//!                └────────────────────────────────────────────┘
//! ```
//!
//! Errors are never retried or swallowed: the only failure a strategy turns
//! into a normal result is the busy outcome of `ROW_LOCK_NOWAIT`.

use std::fmt::{self, Debug};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::response::Response;
use crate::stats::{DispatchStats, StatsSnapshot};
use crate::store::{CounterRow, RowStore};
use crate::strategy::{
    Allocate, ForcedSerial, Outcome, ProcessMutex, RowLock, StrategyKind, TableLock, Unguarded,
};

/// Routes requests to contention strategies over a shared store.
///
/// # Examples
///
/// ```rust
/// use contesa::config::Config;
/// use contesa::dispatcher::Dispatcher;
/// use contesa::stall::Stall;
/// use contesa::store::MemoryStore;
/// use contesa::strategy::StrategyKind;
/// use std::sync::Arc;
///
/// let dispatcher = Dispatcher::new(
///     Arc::new(MemoryStore::new()),
///     Config::new().with_stall(Stall::none()),
/// );
///
/// let response = dispatcher.respond(StrategyKind::TableLock).unwrap();
/// assert_eq!(response.to_json().unwrap(), r#"{"hello":"0"}"#);
///
/// let outcome = dispatcher.handle_named("/nowait").unwrap();
/// assert_eq!(outcome.allocation().unwrap().id, 2);
/// ```
pub struct Dispatcher {
    store: Arc<dyn RowStore>,
    config: Config,
    unguarded: Unguarded,
    nowait: RowLock,
    blocking: RowLock,
    table_lock: TableLock,
    process_mutex: ProcessMutex,
    forced_serial: ForcedSerial,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher over `store`, starting its serial lane.
    pub fn new(store: Arc<dyn RowStore>, config: Config) -> Self {
        info!(
            stall = ?config.stall.duration(),
            lane_capacity = config.lane_capacity,
            "dispatcher started"
        );
        Self {
            forced_serial: ForcedSerial::new(config.lane_capacity),
            store,
            config,
            unguarded: Unguarded,
            nowait: RowLock::nowait(),
            blocking: RowLock::blocking(),
            table_lock: TableLock,
            process_mutex: ProcessMutex::new(),
            stats: DispatchStats::new(),
        }
    }

    /// Returns the strategy registered for `kind`.
    pub fn strategy(&self, kind: StrategyKind) -> &dyn Allocate {
        match kind {
            StrategyKind::None => &self.unguarded,
            StrategyKind::RowLockNowait => &self.nowait,
            StrategyKind::RowLockBlock => &self.blocking,
            StrategyKind::TableLock => &self.table_lock,
            StrategyKind::ProcessMutex => &self.process_mutex,
            StrategyKind::ForcedSerial => &self.forced_serial,
        }
    }

    /// Runs one allocation with the strategy `kind`.
    pub fn handle(&self, kind: StrategyKind) -> Result<Outcome> {
        debug!(strategy = %kind, "dispatching");
        match self.strategy(kind).allocate(&self.store, self.config.stall) {
            Ok(outcome) => {
                match outcome {
                    Outcome::Allocated(allocation) => {
                        self.stats.record_allocated(kind);
                        info!(
                            strategy = %kind,
                            id = allocation.id,
                            observed = allocation.observed,
                            "allocated"
                        );
                    }
                    Outcome::Busy => {
                        self.stats.record_busy(kind);
                        info!(strategy = %kind, "busy");
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                self.stats.record_failed(kind);
                warn!(strategy = %kind, error = %err, "allocation failed");
                Err(err)
            }
        }
    }

    /// Like [`handle`](Self::handle), selecting the strategy by name or route.
    pub fn handle_named(&self, name: &str) -> Result<Outcome> {
        let kind = name.parse::<StrategyKind>()?;
        self.handle(kind)
    }

    /// Runs one allocation and shapes its result as a response body.
    ///
    /// `FORCED_SERIAL` answers with every committed row; the others with
    /// the value they read, or the busy message.
    pub fn respond(&self, kind: StrategyKind) -> Result<Response> {
        let outcome = self.handle(kind)?;
        match (kind, outcome) {
            (StrategyKind::ForcedSerial, Outcome::Allocated(_)) => {
                Ok(Response::Records(self.list_rows()?))
            }
            (_, outcome) => Ok(Response::from_outcome(&outcome)),
        }
    }

    /// Returns every committed row in insertion order.
    pub fn list_rows(&self) -> Result<Vec<CounterRow>> {
        self.store.list_rows()
    }

    /// Reads the per-strategy outcome tallies.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("section", self.process_mutex.section())
            .field("lane", self.forced_serial.lane())
            .finish_non_exhaustive()
    }
}
