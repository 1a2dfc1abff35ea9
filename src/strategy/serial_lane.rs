//! A dedicated sequential execution lane.
//!
//! [`SerialLane`] owns one worker thread fed by a bounded channel. Jobs run
//! one after another on that thread, so no two allocations submitted to the
//! same lane ever overlap, however many callers submit concurrently.
//!
//! The guarantee covers one lane only. Every
//! [`Dispatcher`](crate::dispatcher::Dispatcher) starts exactly one lane of
//! its own; two dispatchers over the same store mean two lanes with no
//! ordering between them, and the race comes back.
//!
//! ```text
//!   caller A ──┐                      ┌──► reply A
//!   caller B ──┼──► [ job queue ] ──► worker ──► reply B
//!   caller C ──┘      (bounded)        (one thread)
//! ```

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::stall::Stall;
use crate::store::RowStore;
use crate::strategy::{count_and_insert, Allocate, Allocation, Outcome, StrategyKind};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One worker thread that runs submitted jobs strictly in order.
///
/// Dropping the lane closes its queue and joins the worker after the queued
/// jobs have run.
///
/// # Examples
///
/// ```rust
/// use contesa::strategy::SerialLane;
///
/// let lane = SerialLane::start(4);
/// assert_eq!(lane.run(|| 20 + 22).unwrap(), 42);
/// ```
pub struct SerialLane {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SerialLane {
    /// Spawns the worker thread. At most `capacity` jobs wait in the queue;
    /// further submitters block.
    pub fn start(capacity: usize) -> Self {
        let (jobs, queue) = bounded::<Job>(capacity.max(1));
        let worker = thread::spawn(move || {
            trace!("serial lane started");
            for job in queue {
                job();
            }
            trace!("serial lane stopped");
        });
        Self {
            jobs: Some(jobs),
            worker: Some(worker),
        }
    }

    /// Runs `job` on the lane and waits for its result.
    ///
    /// Fails with [`Error::LaneClosed`] if the worker is gone, including when
    /// it died running this job.
    pub fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, response) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = reply.send(job());
        });

        self.jobs
            .as_ref()
            .ok_or(Error::LaneClosed)?
            .send(job)
            .map_err(|_| Error::LaneClosed)?;
        response.recv().map_err(|_| Error::LaneClosed)
    }

    /// Identifier of the worker thread.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(|worker| worker.thread().id())
    }
}

impl Drop for SerialLane {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Debug for SerialLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLane")
            .field("thread", &self.thread_id())
            .field(
                "queued",
                &self.jobs.as_ref().map(|jobs| jobs.len()).unwrap_or(0),
            )
            .finish()
    }
}

/// Allocation handed to a [`SerialLane`] and run there without locks.
#[derive(Debug)]
pub struct ForcedSerial {
    lane: SerialLane,
}

impl ForcedSerial {
    /// Creates the strategy with a lane of its own.
    pub fn new(capacity: usize) -> Self {
        Self {
            lane: SerialLane::start(capacity),
        }
    }

    /// Returns the lane allocations run on.
    pub fn lane(&self) -> &SerialLane {
        &self.lane
    }
}

impl Allocate for ForcedSerial {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ForcedSerial
    }

    fn allocate(&self, store: &Arc<dyn RowStore>, stall: Stall) -> Result<Outcome> {
        let store = Arc::clone(store);
        let allocation = self.lane.run(move || -> Result<Allocation> {
            let mut txn = store.begin();
            let allocation = count_and_insert(txn.as_mut(), stall)?;
            txn.commit()?;
            Ok(allocation)
        })??;

        debug!(strategy = %self.kind(), id = allocation.id, "allocated");
        Ok(Outcome::Allocated(allocation))
    }
}
