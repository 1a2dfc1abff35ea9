//! # Contesa - Contention Control for a Shared Counter Table
//!
//! A Rust library of interchangeable strategies for the classic
//! read-then-write race: read how many rows a table holds, do some work,
//! insert the next id. Run concurrently without protection, two callers
//! read the same value and one of them hits a primary-key violation. Each
//! strategy in this crate closes (or fails to close) that window in a
//! different way, with different failure, latency and scalability
//! trade-offs.
//!
//! ## The Problem
//!
//! ```text
//!   caller A: count() = 0 ───── stall ───── insert(1) ✓
//!   caller B:   count() = 0 ───── stall ───── insert(1) ✗ UniqueViolation
//! ```
//!
//! Nothing in the READ step tells B that A is about to write. A lock taken
//! on what was *read* does not help either when the conflicting row does
//! not exist yet.
//!
//! ## Strategies
//!
//! | Kind | Mechanism | Concurrent callers |
//! |------|-----------|--------------------|
//! | `none` | nothing | race: `UniqueViolation` |
//! | `row-lock-nowait` | `FOR UPDATE NOWAIT` on the read set | first wins, others get `Busy` |
//! | `row-lock-block` | blocking `FOR UPDATE` on the read set | waiter reads a stale set: race |
//! | `table-lock` | exclusive table lock | fully serialized |
//! | `process-mutex` | in-process mutex | serialized within one dispatcher |
//! | `forced-serial` | one sequential worker lane | serialized within one dispatcher |
//!
//! A [`Dispatcher`](dispatcher::Dispatcher) models one service process.
//! The last two strategies only hold within it: two dispatchers over one
//! store race again, like two processes behind one database.
//!
//! ## Quick Start
//!
//! ```rust
//! use contesa::config::Config;
//! use contesa::dispatcher::Dispatcher;
//! use contesa::store::MemoryStore;
//! use contesa::strategy::{Outcome, StrategyKind};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let dispatcher = Dispatcher::new(
//!     Arc::new(MemoryStore::new()),
//!     Config::new().with_stall(Duration::from_millis(1)),
//! );
//!
//! match dispatcher.handle(StrategyKind::RowLockNowait).unwrap() {
//!     Outcome::Allocated(allocation) => assert_eq!(allocation.id, 1),
//!     Outcome::Busy => unreachable!("no other caller"),
//! }
//!
//! let rows = dispatcher.list_rows().unwrap();
//! assert_eq!(rows.len(), 1);
//! ```
//!
//! ## The Store
//!
//! Strategies talk to the table only through the [`RowStore`](store::RowStore)
//! gateway. [`MemoryStore`](store::MemoryStore) implements it in memory with
//! the behavior of a relational engine: row and table locks, a unique index
//! that makes colliding inserters wait for each other, read-committed or
//! repeatable-read snapshots, and deadlock detection.
//!
//! ## Errors
//!
//! Every fallible operation returns [`error::Result`]. Strategies never
//! retry: a `UniqueViolation` reaches the caller as is, and the only error
//! turned into a normal result is the lock conflict of `row-lock-nowait`.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `table` | [`render`] module: rows and statistics as `tabled` tables |
//! | `demo` | the `race` example binary (`clap`, `tracing-subscriber`) |

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod response;
pub mod stall;
pub mod stats;
pub mod store;
pub mod strategy;

#[cfg(feature = "table")]
pub mod render;
