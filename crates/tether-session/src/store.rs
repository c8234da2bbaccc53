//! Process-facing session store and its background sweeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::backend::{BackingStore, SessionListener};
use crate::cache::{SessionCache, WriteOutcome};
use crate::clock::{Clock, SystemClock, local_hour};
use crate::config::{StoreConfig, WritePolicy};
use crate::error::{Error, Result};
use crate::record::{Session, SessionSnapshot, SessionState};

/// Consecutive time-based writes a session in use may skip before it is
/// written anyway.
pub const MAX_WRITE_DEFERRALS: u32 = 5;

/// Outcome of one invalidation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// The scheduling gate held the sweep back.
    pub skipped: bool,
    /// Cached sessions discarded as expired.
    pub expired: Vec<String>,
    /// Stored sessions the backend deleted.
    pub removed: Vec<String>,
}

/// Outcome of one time-based write cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub written: usize,
    pub deferred: usize,
    /// Writes made despite the session being in use, after too many deferrals.
    pub forced: usize,
}

/// Point-in-time counters for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub cached: usize,
    pub capacity: usize,
    pub recently_invalidated: usize,
    pub pending_last_access: usize,
}

/// Session store backed by a durable [`BackingStore`].
///
/// Foreground calls may come from any number of threads. The invalidation
/// sweep and the time-based write cycle are meant to be driven from their own
/// background tasks.
pub struct BackedStore<B: BackingStore> {
    cache: SessionCache<B>,
    remote_invalidation_pending: AtomicBool,
    stopped: AtomicBool,
}

impl<B: BackingStore> BackedStore<B> {
    /// Create a store on the wall clock.
    pub fn new(config: StoreConfig, backend: B, listener: Arc<dyn SessionListener>) -> Result<Self> {
        Self::with_clock(config, backend, listener, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source.
    pub fn with_clock(
        config: StoreConfig,
        backend: B,
        listener: Arc<dyn SessionListener>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            capacity = config.capacity,
            policy = ?config.write_policy(),
            scheduled_invalidation = config.scheduled_invalidation,
            "Session store created"
        );
        Ok(Self {
            cache: SessionCache::new(config, backend, listener, clock),
            remote_invalidation_pending: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        self.cache.config()
    }

    pub fn backend(&self) -> &B {
        self.cache.backend()
    }

    pub fn cache(&self) -> &SessionCache<B> {
        &self.cache
    }

    /// Find a session, from memory or from the backing store.
    ///
    /// `is_access` marks the start of a request: it refreshes the access time
    /// and takes a reference on the session. Backend failures read as `None`.
    pub fn get_session(&self, id: &str, expected_version: u16, is_access: bool) -> Option<Arc<Session>> {
        if !self.config().accepts_id(id) {
            debug!(session_id = %id, "Rejecting session id of unexpected length");
            return None;
        }
        let session = self
            .cache
            .lookup_and_validate(id, expected_version, is_access, false)?;
        if is_access {
            session.lock().ref_count += 1;
        }
        Some(session)
    }

    /// Re-read a session from the backing store, offering the cached copy
    /// for reconciliation.
    pub fn refresh_session(&self, id: &str, expected_version: u16) -> Option<Arc<Session>> {
        if !self.config().accepts_id(id) {
            return None;
        }
        self.cache.lookup_and_validate(id, expected_version, false, true)
    }

    /// Create a session and store it. The returned session holds one reference.
    pub fn create_session(&self, id: &str) -> Result<Arc<Session>> {
        let config = self.config();
        if !config.accepts_id(id) {
            return Err(Error::InvalidIdentifier {
                id: id.to_string(),
                expected: config.id_length,
            });
        }

        let mut state = SessionState::new(self.cache.now(), config.default_max_inactive_secs);
        state.ref_count = 1;
        let session = Arc::new(Session::new(id, state));
        debug!(session_id = %id, "Creating session");
        match self.cache.put(Arc::clone(&session)) {
            Some(winner) if !Arc::ptr_eq(&winner, &session) => {
                winner.lock().ref_count += 1;
                Ok(winner)
            }
            _ => Ok(session),
        }
    }

    /// Push a session's changes to the store according to the write policy.
    ///
    /// Under time-based writes this only leaves the changes for the next cycle.
    pub fn update_session(&self, session: &Session) {
        if self.config().write_policy() == WritePolicy::TimeBased {
            trace!(session_id = %session.id(), "Update left for the time-based cycle");
            return;
        }
        self.cache.update(session);
    }

    /// End of a request: drop the reference taken by `get_session` and write
    /// the session.
    pub fn release_session(&self, session: &Session) {
        {
            let mut state = session.lock();
            state.ref_count = state.ref_count.saturating_sub(1);
        }
        self.update_session(session);
    }

    /// Store a session built elsewhere. Returns the cached copy.
    pub fn put_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.cache.put(session)
    }

    /// Delete a session from the backing store, whatever the cache holds.
    ///
    /// Local state is only cleared once the durable delete succeeded.
    pub fn remove_session(&self, id: &str) -> Result<()> {
        self.cache.backend().remove_persisted_session(id)?;
        if self.cache.remove_local(id).is_some() {
            trace!(session_id = %id, "Dropped cached copy of removed session");
        }
        self.cache.forget_last_access(id);
        self.cache.recently_invalidated().insert(id);
        debug!(session_id = %id, "Session removed");
        Ok(())
    }

    /// Mark a session dead and delete it.
    pub fn invalidate_session(&self, session: &Session) -> Result<()> {
        session.invalidate();
        self.remove_session(session.id())
    }

    /// Note that another peer asked for an invalidation sweep. Consumed by the
    /// next gate check when remote invalidation is enabled.
    pub fn signal_remote_invalidation(&self) {
        self.remote_invalidation_pending.store(true, Ordering::SeqCst);
    }

    /// Whether the backing store holds `id`.
    pub fn is_persisted(&self, id: &str) -> Result<bool> {
        self.cache.backend().is_present(id)
    }

    /// The stored copy of `id`, bypassing the cache.
    pub fn read_persisted(&self, id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self
            .cache
            .backend()
            .read_from_external(id)?
            .map(|state| SessionSnapshot::from_state(id, &state)))
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            cached: self.cache.len(),
            capacity: self.cache.capacity(),
            recently_invalidated: self.cache.recently_invalidated().len(),
            pending_last_access: self.cache.pending_last_access_len(),
        }
    }

    fn invalidation_gate_open(&self, now: i64) -> bool {
        let config = self.config();
        if !config.scheduled_invalidation {
            return true;
        }
        if config.remote_invalidation && self.remote_invalidation_pending.swap(false, Ordering::SeqCst) {
            debug!("Remote invalidation signal opened the sweep gate");
            return true;
        }
        let hour = local_hour(now);
        let (first, second) = config.invalidation_hours;
        hour == first || hour == second
    }

    /// Expire idle sessions, in memory and in the backing store.
    ///
    /// Expired cached sessions are discarded without a write-back. The backend
    /// sweep then handles stored sessions this peer does not hold.
    pub fn run_invalidation(&self, now: i64) -> InvalidationReport {
        if !self.invalidation_gate_open(now) {
            trace!("Invalidation sweep outside scheduled hours, skipping");
            return InvalidationReport {
                skipped: true,
                ..Default::default()
            };
        }

        self.cache.flush_cached_last_access_times();

        let mut report = InvalidationReport::default();
        for session in self.cache.resident() {
            let expired = {
                let mut state = session.lock();
                if state.valid && !state.is_expired(now) {
                    false
                } else {
                    state.valid = false;
                    state.clear_dirty();
                    true
                }
            };
            if expired && self.cache.discard(session.id(), &session) {
                self.cache.forget_last_access(session.id());
                report.expired.push(session.id().to_string());
            }
        }

        let resident = self.cache.resident_ids();
        match self.cache.backend().perform_invalidation(now, &resident) {
            Ok(removed) => {
                for id in &removed {
                    self.cache.recently_invalidated().insert(id);
                }
                report.removed = removed;
            }
            Err(e) => warn!(error = %e, "Backend invalidation sweep failed"),
        }

        info!(
            expired = report.expired.len(),
            removed = report.removed.len(),
            "Invalidation sweep complete"
        );
        report
    }

    /// Write sessions whose changes have waited longer than the write interval.
    ///
    /// Sessions still held by a request are skipped up to
    /// [`MAX_WRITE_DEFERRALS`] times in a row. `force` writes every session
    /// with unwritten changes regardless of interval or references.
    pub fn run_time_based_writes(&self, force: bool) -> WriteReport {
        let config = self.config();
        let mut report = WriteReport::default();
        if !force && config.write_policy() != WritePolicy::TimeBased {
            return report;
        }

        let interval = i64::try_from(config.write_interval.as_millis()).unwrap_or(i64::MAX);
        let now = self.cache.now();

        for session in self.cache.resident() {
            let mut state = session.lock();
            if !state.valid {
                continue;
            }

            let unwritten = state.last_access_time > state.last_write_time;
            let due = state.last_write_time == -1
                || (now - state.last_write_time > interval && unwritten)
                || (force && (unwritten || state.is_dirty() || state.needs_insert));
            if !due {
                continue;
            }

            let mut forced = false;
            if state.ref_count != 0 && !force {
                state.defer_count += 1;
                if state.defer_count <= MAX_WRITE_DEFERRALS {
                    trace!(
                        session_id = %session.id(),
                        defer_count = state.defer_count,
                        "Session in use, deferring write"
                    );
                    report.deferred += 1;
                    continue;
                }
                forced = true;
            }

            match self.cache.write_locked(session.id(), &mut state, now, false) {
                WriteOutcome::Inserted | WriteOutcome::Persisted => {
                    state.defer_count = 0;
                    report.written += 1;
                    if forced {
                        report.forced += 1;
                    }
                }
                WriteOutcome::Stashed | WriteOutcome::Missing | WriteOutcome::Failed => {}
            }
        }

        if report.written > 0 || report.deferred > 0 {
            info!(
                written = report.written,
                deferred = report.deferred,
                forced = report.forced,
                "Time-based write cycle complete"
            );
        }
        report
    }

    /// Shut the store down: write outstanding changes, passivate every cached
    /// session and flush pending last-access times. Safe to call twice.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.config().write_policy() == WritePolicy::TimeBased {
            self.run_time_based_writes(true);
        }

        let sessions = self.cache.drain();
        for session in &sessions {
            self.cache.listener().session_will_passivate(session);
            if self.config().persist_after_passivation {
                self.cache.write_back(session);
            }
        }

        let flushed = self.cache.flush_cached_last_access_times();
        self.cache.recently_invalidated().clear();
        info!(passivated = sessions.len(), flushed, "Session store stopped");
    }
}
