//! Backing store and lifecycle listener seams.
//!
//! The cache never talks to a database directly. Durable reads and writes go
//! through [`BackingStore`], and notifications to the owning application go
//! through [`SessionListener`]. Both are injected at construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::Result;
use crate::record::{Session, SessionState};

/// Result of a durable insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was created.
    Inserted,
    /// A row with this id already existed; the caller falls back to an update.
    Duplicate,
}

/// Durable store shared by every peer.
///
/// Methods that take a [`SessionState`] are called with that session's lock
/// held, so implementations must not try to lock the session again.
pub trait BackingStore: Send + Sync {
    /// Read a session. Returns `Ok(None)` if the store has no row for `id`.
    fn read_from_external(&self, id: &str) -> Result<Option<SessionState>>;

    /// Insert a session that has never been written.
    fn insert_session(&self, id: &str, state: &SessionState) -> Result<InsertOutcome>;

    /// Write an existing session. `write_all` asks for the attributes to be
    /// written too. Returns `Ok(false)` if the row no longer exists.
    fn persist_session(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool>;

    /// Set the stored last-access time. Returns the number of rows changed.
    fn update_last_access_time(&self, id: &str, now: i64) -> Result<u64>;

    /// Set the stored last-access time only if it still equals `expected`.
    /// Returns the number of rows changed; zero means another peer got there
    /// first or the row is gone.
    fn over_qual_last_access_time_update(&self, id: &str, expected: i64, now: i64) -> Result<u64>;

    /// Delete a session.
    fn remove_persisted_session(&self, id: &str) -> Result<()>;

    /// Whether a row exists for `id`.
    fn is_present(&self, id: &str) -> Result<bool>;

    /// Delete rows that have been idle past their timeout at `now`, skipping
    /// ids in `resident`. Returns the ids removed.
    fn perform_invalidation(&self, now: i64, resident: &HashSet<String>) -> Result<Vec<String>>;

    /// Write a batch of cached last-access times.
    fn write_cached_last_access_times(&self, times: &HashMap<String, i64>) -> Result<()> {
        for (id, time) in times {
            self.update_last_access_time(id, *time)?;
        }
        Ok(())
    }

    /// Whether `persist_session` clears dirty tracking itself. Layouts that
    /// stage attributes across several write phases return true.
    fn manages_dirty_tracking(&self) -> bool {
        false
    }
}

impl<B: BackingStore + ?Sized> BackingStore for Arc<B> {
    fn read_from_external(&self, id: &str) -> Result<Option<SessionState>> {
        (**self).read_from_external(id)
    }

    fn insert_session(&self, id: &str, state: &SessionState) -> Result<InsertOutcome> {
        (**self).insert_session(id, state)
    }

    fn persist_session(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool> {
        (**self).persist_session(id, state, write_all)
    }

    fn update_last_access_time(&self, id: &str, now: i64) -> Result<u64> {
        (**self).update_last_access_time(id, now)
    }

    fn over_qual_last_access_time_update(&self, id: &str, expected: i64, now: i64) -> Result<u64> {
        (**self).over_qual_last_access_time_update(id, expected, now)
    }

    fn remove_persisted_session(&self, id: &str) -> Result<()> {
        (**self).remove_persisted_session(id)
    }

    fn is_present(&self, id: &str) -> Result<bool> {
        (**self).is_present(id)
    }

    fn perform_invalidation(&self, now: i64, resident: &HashSet<String>) -> Result<Vec<String>> {
        (**self).perform_invalidation(now, resident)
    }

    fn write_cached_last_access_times(&self, times: &HashMap<String, i64>) -> Result<()> {
        (**self).write_cached_last_access_times(times)
    }

    fn manages_dirty_tracking(&self) -> bool {
        (**self).manages_dirty_tracking()
    }
}

/// Lifecycle notifications for the application that owns the sessions.
///
/// Called without the session's lock held. Default implementations do nothing.
pub trait SessionListener: Send + Sync {
    /// The session is leaving memory (eviction, lost insert race, shutdown).
    fn session_will_passivate(&self, _session: &Session) {}

    /// The session was materialized from the backing store.
    fn session_did_activate(&self, _session: &Session) {}

    /// The session was dropped from the cache without a write-back.
    fn session_cache_discard(&self, _session: &Session) {}

    /// This peer now owns a new version of the session.
    fn session_affinity_broke(&self, _session: &Session) {}
}

/// A listener that ignores every notification.
#[derive(Debug, Clone, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}
