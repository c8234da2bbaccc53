//! Configuration for the session store.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of sessions held in memory before LRU eviction.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default idle timeout for new sessions, in seconds.
pub const DEFAULT_MAX_INACTIVE_SECS: i32 = 1800;

/// Default length of generated session identifiers.
pub const DEFAULT_ID_LENGTH: usize = 23;

/// Default interval between time-based write cycles.
pub const DEFAULT_WRITE_INTERVAL: Duration = Duration::from_secs(120);

/// Default number of ids remembered by the recently-invalidated guard.
pub const DEFAULT_RECENTLY_INVALIDATED_CAPACITY: usize = 100;

/// How last-access times and attribute changes reach the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Every touch and every update is written through (end-of-service writes).
    Immediate,
    /// Touches stay in memory; last-access-only updates go to a side table that
    /// is flushed before each invalidation sweep.
    Deferred,
    /// Updates stay in memory; a periodic cycle writes dirty sessions.
    TimeBased,
}

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of sessions cached before LRU eviction.
    pub capacity: usize,

    /// Write last-access time on every access instead of deferring it.
    pub immediate_write: bool,

    /// Persist dirty sessions from a periodic background cycle.
    pub time_based_write: bool,

    /// Interval between time-based write cycles.
    pub write_interval: Duration,

    /// Only run invalidation sweeps during the configured hours.
    pub scheduled_invalidation: bool,

    /// The two local hours (0-23) during which scheduled sweeps may run.
    pub invalidation_hours: (u32, u32),

    /// Let a remote invalidation signal open the scheduled sweep gate.
    pub remote_invalidation: bool,

    /// Write sessions through when they leave memory.
    pub persist_after_passivation: bool,

    /// Keep a local copy that is newer than the stored one without bumping its
    /// version.
    pub optimize_version_increments: bool,

    /// Consult the recently-invalidated guard before reading from the store.
    pub check_recently_invalidated: bool,

    /// Number of ids the recently-invalidated guard remembers.
    pub recently_invalidated_capacity: usize,

    /// Write all attributes on every persist, changed or not.
    pub write_all_attributes: bool,

    /// Idle timeout for new sessions, in seconds (-1 never expires).
    pub default_max_inactive_secs: i32,

    /// Accept identifiers of any length.
    pub alternate_id_scheme: bool,

    /// Required identifier length when no alternate scheme is configured.
    pub id_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            immediate_write: true,
            time_based_write: false,
            write_interval: DEFAULT_WRITE_INTERVAL,
            scheduled_invalidation: false,
            invalidation_hours: (0, 2),
            remote_invalidation: false,
            persist_after_passivation: false,
            optimize_version_increments: false,
            check_recently_invalidated: true,
            recently_invalidated_capacity: DEFAULT_RECENTLY_INVALIDATED_CAPACITY,
            write_all_attributes: false,
            default_max_inactive_secs: DEFAULT_MAX_INACTIVE_SECS,
            alternate_id_scheme: false,
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The write policy implied by the write flags.
    ///
    /// Time-based writes take precedence over immediate writes.
    pub fn write_policy(&self) -> WritePolicy {
        if self.time_based_write {
            WritePolicy::TimeBased
        } else if self.immediate_write {
            WritePolicy::Immediate
        } else {
            WritePolicy::Deferred
        }
    }

    /// Check the configuration for values the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be at least 1".into()));
        }
        let (first, second) = self.invalidation_hours;
        if first > 23 || second > 23 {
            return Err(Error::InvalidConfig(format!(
                "invalidation hours must be between 0 and 23, got {first} and {second}"
            )));
        }
        if self.time_based_write && self.write_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "write interval must be non-zero when time-based writes are enabled".into(),
            ));
        }
        if self.default_max_inactive_secs < -1 {
            return Err(Error::InvalidConfig(format!(
                "default max inactive interval must be -1 or positive, got {}",
                self.default_max_inactive_secs
            )));
        }
        if !self.alternate_id_scheme && self.id_length == 0 {
            return Err(Error::InvalidConfig("id length must be at least 1".into()));
        }
        Ok(())
    }

    /// Whether `id` satisfies the identifier length precondition.
    pub fn accepts_id(&self, id: &str) -> bool {
        self.alternate_id_scheme || id.len() == self.id_length
    }

    /// Set the cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable immediate last-access writes.
    pub fn with_immediate_write(mut self, enabled: bool) -> Self {
        self.immediate_write = enabled;
        self
    }

    /// Enable time-based writes with the given interval.
    pub fn with_time_based_write(mut self, interval: Duration) -> Self {
        self.time_based_write = true;
        self.write_interval = interval;
        self
    }

    /// Restrict invalidation sweeps to two local hours.
    pub fn with_scheduled_invalidation(mut self, first_hour: u32, second_hour: u32) -> Self {
        self.scheduled_invalidation = true;
        self.invalidation_hours = (first_hour, second_hour);
        self
    }

    /// Enable or disable the remote invalidation signal.
    pub fn with_remote_invalidation(mut self, enabled: bool) -> Self {
        self.remote_invalidation = enabled;
        self
    }

    /// Enable or disable write-through on passivation.
    pub fn with_persist_after_passivation(mut self, enabled: bool) -> Self {
        self.persist_after_passivation = enabled;
        self
    }

    /// Enable or disable the version increment optimization.
    pub fn with_optimize_version_increments(mut self, enabled: bool) -> Self {
        self.optimize_version_increments = enabled;
        self
    }

    /// Enable or disable the recently-invalidated guard check.
    pub fn with_check_recently_invalidated(mut self, enabled: bool) -> Self {
        self.check_recently_invalidated = enabled;
        self
    }

    /// Enable or disable writing all attributes on every persist.
    pub fn with_write_all_attributes(mut self, enabled: bool) -> Self {
        self.write_all_attributes = enabled;
        self
    }

    /// Set the idle timeout for new sessions.
    pub fn with_default_max_inactive_secs(mut self, secs: i32) -> Self {
        self.default_max_inactive_secs = secs;
        self
    }

    /// Require identifiers of exactly `len` characters.
    pub fn with_id_length(mut self, len: usize) -> Self {
        self.alternate_id_scheme = false;
        self.id_length = len;
        self
    }

    /// Accept identifiers of any length.
    pub fn with_alternate_id_scheme(mut self) -> Self {
        self.alternate_id_scheme = true;
        self
    }
}
