//! Database configuration.

use std::time::Duration;

/// Configuration for a [`Database`](crate::Database).
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum interval between graveyard GC sweeps.
    ///
    /// Can be overridden at runtime with
    /// `Database::set_gc_rate_limit_interval`.
    pub gc_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum interval between graveyard GC sweeps.
    #[must_use]
    pub const fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }
}
