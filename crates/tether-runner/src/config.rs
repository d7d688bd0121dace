//! Runner configuration.
//!
//! # Environment Variables
//!
//! - `TETHER_FEED_TICK_MS`: feed loop polling interval
//! - `TETHER_WAIT_TICK_MS`: `wait_for` re-check interval
//! - `TETHER_START_GRACE_MS`: how long `submit` waits for the feed to start
//! - `TETHER_SHUTDOWN_GRACE_MS`: how long `shutdown` waits for feeds to settle
//! - `TETHER_WORKERS`: worker threads of an owned pool

use std::time::Duration;

use tracing::warn;

/// Environment variable for the feed tick.
pub const FEED_TICK_ENV: &str = "TETHER_FEED_TICK_MS";

/// Environment variable for the wait tick.
pub const WAIT_TICK_ENV: &str = "TETHER_WAIT_TICK_MS";

/// Environment variable for the start grace period.
pub const START_GRACE_ENV: &str = "TETHER_START_GRACE_MS";

/// Environment variable for the shutdown grace period.
pub const SHUTDOWN_GRACE_ENV: &str = "TETHER_SHUTDOWN_GRACE_MS";

/// Environment variable for the worker count.
pub const WORKERS_ENV: &str = "TETHER_WORKERS";

/// Configuration shared by all runner backends.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How often a feed loop checks its observer.
    pub feed_tick: Duration,
    /// How often `wait_for` re-reads the observer timeout.
    pub wait_tick: Duration,
    /// How long `submit` waits for the feed loop to confirm it started.
    pub start_grace: Duration,
    /// How long `shutdown` waits for active feeds to settle.
    pub shutdown_grace: Duration,
    /// Worker threads of an owned pool.
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            feed_tick: Duration::from_millis(10),
            wait_tick: Duration::from_millis(100),
            start_grace: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(1),
            workers: cpus * 5,
        }
    }
}

impl RunnerConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `TETHER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, FEED_TICK_ENV) {
            config.feed_tick = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, WAIT_TICK_ENV) {
            config.wait_tick = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, START_GRACE_ENV) {
            config.start_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, SHUTDOWN_GRACE_ENV) {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_var::<usize>(&lookup, WORKERS_ENV) {
            config.workers = workers;
        }
        config
    }

    /// Sets the feed tick.
    pub fn with_feed_tick(mut self, tick: Duration) -> Self {
        self.feed_tick = tick;
        self
    }

    /// Sets the wait tick.
    pub fn with_wait_tick(mut self, tick: Duration) -> Self {
        self.wait_tick = tick;
        self
    }

    /// Sets the start grace period.
    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

// Zero ticks and zero workers are rejected along with unparsable values.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Some(value),
        _ => {
            warn!(var = key, value = %raw, "ignoring invalid runner setting");
            None
        }
    }
}
