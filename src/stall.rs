//! Simulated work between READ and WRITE.
//!
//! A [`Stall`] widens the contention window of an allocation so that
//! concurrent callers reliably overlap. It suspends only the calling
//! thread; other callers wait on it only through a lock the strategy
//! itself holds.

use std::thread;
use std::time::Duration;

use tracing::trace;

/// A fixed pause inserted inside a strategy's critical section.
///
/// # Examples
///
/// ```rust
/// use contesa::stall::Stall;
/// use std::time::Duration;
///
/// let stall = Stall::new(Duration::from_millis(5));
/// assert_eq!(stall.duration(), Duration::from_millis(5));
///
/// // A zero stall returns immediately.
/// Stall::none().pause();
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stall {
    duration: Duration,
}

impl Stall {
    /// Creates a stall of the given duration.
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a stall that does not pause.
    pub const fn none() -> Self {
        Self {
            duration: Duration::ZERO,
        }
    }

    /// Returns the configured duration.
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Suspends the calling thread for the configured duration.
    pub fn pause(&self) {
        if self.duration.is_zero() {
            return;
        }
        trace!(duration = ?self.duration, "stall");
        thread::sleep(self.duration);
    }
}

impl From<Duration> for Stall {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}
