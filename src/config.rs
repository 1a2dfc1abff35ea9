//! Dispatcher configuration.

use std::time::Duration;

use crate::stall::Stall;

/// Default stall between READ and WRITE.
pub const DEFAULT_STALL: Duration = Duration::from_secs(5);

/// Default number of requests that can queue on the serial lane.
pub const DEFAULT_LANE_CAPACITY: usize = 64;

/// Configuration for a [`Dispatcher`](crate::dispatcher::Dispatcher).
///
/// # Examples
///
/// ```rust
/// use contesa::config::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_stall(Duration::from_millis(50))
///     .with_lane_capacity(8);
///
/// assert_eq!(config.stall.duration(), Duration::from_millis(50));
/// assert_eq!(config.lane_capacity, 8);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Simulated work inside every strategy's critical section.
    pub stall: Stall,
    /// Bound of the serial lane's request queue. Senders block when full.
    pub lane_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stall: Stall::new(DEFAULT_STALL),
            lane_capacity: DEFAULT_LANE_CAPACITY,
        }
    }
}

impl Config {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stall duration.
    pub fn with_stall(mut self, stall: impl Into<Stall>) -> Self {
        self.stall = stall.into();
        self
    }

    /// Sets the serial lane queue bound. Zero is raised to one.
    pub fn with_lane_capacity(mut self, capacity: usize) -> Self {
        self.lane_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.stall.duration(), DEFAULT_STALL);
        assert_eq!(config.lane_capacity, DEFAULT_LANE_CAPACITY);
    }

    #[test]
    fn test_zero_lane_capacity_is_raised() {
        assert_eq!(Config::new().with_lane_capacity(0).lane_capacity, 1);
    }

    #[test]
    fn test_with_stall_accepts_stall() {
        let config = Config::new().with_stall(Stall::none());
        assert_eq!(config.stall, Stall::none());
    }
}
