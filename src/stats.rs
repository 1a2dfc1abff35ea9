//! Per-strategy outcome statistics.
//!
//! Every call through the dispatcher bumps one [`Tally`]: allocated, busy
//! or failed, per strategy. Tallies are bumped on the hot path by many
//! threads at once, so each one is sharded across cache-line-padded slots,
//! one slot per thread (modulo [`NUM_SLOTS`]), and summed on read.
//!
//! ```text
//!                 ┌────────────────────────────┐
//!   Thread 0 ──►  │ [Slot 0] (CachePadded)     │
//!   Thread 1 ──►  │ [Slot 1] (CachePadded)     │
//!        ...      │    ...                     │      value() sums
//!   Thread 63 ─►  │ [Slot 63] (CachePadded)    │ ───► every slot
//!                 └────────────────────────────┘
//! ```

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

/// Number of slots each tally is sharded across.
pub const NUM_SLOTS: usize = 64;

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot assigned to the current thread on first use.
    static THREAD_SLOT: usize = NEXT_SLOT.fetch_add(1, Ordering::Relaxed) % NUM_SLOTS;
}

/// A monotonically increasing sharded event count.
///
/// # Examples
///
/// ```rust
/// use contesa::stats::Tally;
///
/// let tally = Tally::new();
/// tally.incr();
/// tally.incr();
/// assert_eq!(tally.value(), 2);
/// ```
pub struct Tally {
    slots: [CachePadded<AtomicU64>; NUM_SLOTS],
}

impl Tally {
    /// Creates a tally at zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        Tally {
            slots: [ZERO; NUM_SLOTS],
        }
    }

    /// Adds one to the current thread's slot.
    #[inline]
    pub fn incr(&self) {
        THREAD_SLOT.with(|slot| self.slots[*slot].fetch_add(1, Ordering::Relaxed));
    }

    /// Returns the sum of all slots.
    pub fn value(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Tally {
    /// Shows only the non-zero slots: `{ [slot]:value ... }`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, slot) in self.slots.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

#[derive(Debug, Default)]
struct KindTallies {
    allocated: Tally,
    busy: Tally,
    failed: Tally,
}

/// Outcome tallies for every strategy.
#[derive(Debug, Default)]
pub struct DispatchStats {
    kinds: [KindTallies; StrategyKind::ALL.len()],
}

impl DispatchStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    fn tallies(&self, kind: StrategyKind) -> &KindTallies {
        &self.kinds[kind as usize]
    }

    /// Records a committed allocation.
    pub fn record_allocated(&self, kind: StrategyKind) {
        self.tallies(kind).allocated.incr();
    }

    /// Records a busy outcome.
    pub fn record_busy(&self, kind: StrategyKind) {
        self.tallies(kind).busy.incr();
    }

    /// Records a call that returned an error.
    pub fn record_failed(&self, kind: StrategyKind) {
        self.tallies(kind).failed.incr();
    }

    /// Reads every tally.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            strategies: StrategyKind::ALL
                .iter()
                .map(|kind| {
                    let tallies = self.tallies(*kind);
                    StrategyStats {
                        strategy: *kind,
                        allocated: tallies.allocated.value(),
                        busy: tallies.busy.value(),
                        failed: tallies.failed.value(),
                    }
                })
                .collect(),
        }
    }
}

/// Tallies of one strategy at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: StrategyKind,
    pub allocated: u64,
    pub busy: u64,
    pub failed: u64,
}

impl StrategyStats {
    /// Total number of calls.
    pub fn calls(&self) -> u64 {
        self.allocated + self.busy + self.failed
    }
}

/// Tallies of every strategy at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub strategies: Vec<StrategyStats>,
}

impl StatsSnapshot {
    /// Finds the entry of one strategy.
    pub fn get(&self, kind: StrategyKind) -> Option<&StrategyStats> {
        self.strategies.iter().find(|s| s.strategy == kind)
    }

    /// Serializes the snapshot to JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}
