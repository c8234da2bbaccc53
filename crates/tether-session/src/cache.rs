//! Bounded session cache kept consistent with a backing store.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backend::{BackingStore, InsertOutcome, SessionListener};
use crate::clock::Clock;
use crate::config::{StoreConfig, WritePolicy};
use crate::guard::RecentlyInvalidated;
use crate::record::{Session, SessionState, next_version};

/// Result of writing one session to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// A new row was created.
    Inserted,
    /// An existing row was updated.
    Persisted,
    /// Only the last-access time changed; it went to the side table.
    Stashed,
    /// The store had nothing to update.
    Missing,
    /// The store reported an error; state was kept for the next cycle.
    Failed,
}

enum Insertion {
    Won { evicted: Option<Arc<Session>> },
    Lost(Arc<Session>),
}

enum Verdict {
    Valid,
    Stale,
    Dead,
}

/// Bounded LRU map from session id to the one in-process copy of that session.
///
/// The map-wide lock only covers map bookkeeping. Backend calls happen with
/// no lock held or with just the affected session's lock.
pub struct SessionCache<B: BackingStore> {
    entries: Mutex<LruCache<String, Arc<Session>>>,
    backend: B,
    listener: Arc<dyn SessionListener>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    recently_invalidated: RecentlyInvalidated,
    cached_last_access: Mutex<HashMap<String, i64>>,
}

impl<B: BackingStore> SessionCache<B> {
    /// Create a cache in front of `backend`.
    pub fn new(
        config: StoreConfig,
        backend: B,
        listener: Arc<dyn SessionListener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cap = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            recently_invalidated: RecentlyInvalidated::new(config.recently_invalidated_capacity),
            cached_last_access: Mutex::new(HashMap::new()),
            backend,
            listener,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn recently_invalidated(&self) -> &RecentlyInvalidated {
        &self.recently_invalidated
    }

    pub(crate) fn listener(&self) -> &dyn SessionListener {
        self.listener.as_ref()
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Whether `id` is cached (without touching LRU order).
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains(id)
    }

    /// The cached copy of `id`, without touching LRU order or validating it.
    pub fn peek(&self, id: &str) -> Option<Arc<Session>> {
        self.entries.lock().peek(id).cloned()
    }

    /// Number of last-access times waiting in the side table.
    pub fn pending_last_access_len(&self) -> usize {
        self.cached_last_access.lock().len()
    }

    /// Find a usable copy of `id`, retrieving it from the store if the local
    /// copy is missing, dead, stale, or loses an immediate-write race.
    ///
    /// `touch` refreshes recency and applies the write policy's touch.
    /// `force_retrieve` bypasses the local copy, offering it only as a
    /// reconciliation candidate.
    pub fn lookup_and_validate(
        &self,
        id: &str,
        expected_version: u16,
        touch: bool,
        force_retrieve: bool,
    ) -> Option<Arc<Session>> {
        let local = {
            let mut entries = self.entries.lock();
            if touch {
                entries.get(id).cloned()
            } else {
                entries.peek(id).cloned()
            }
        };

        let Some(local) = local else {
            return self.retrieve_and_reconcile(id, expected_version, None);
        };

        if force_retrieve {
            trace!(session_id = %id, "Forced retrieval, bypassing cached copy");
            self.detach(id, &local);
            return self.retrieve_and_reconcile(id, expected_version, Some(local));
        }

        let now = self.now();
        let verdict = {
            let state = local.lock();
            if !state.valid || state.is_timed_out(now) {
                Verdict::Dead
            } else if state.version < expected_version {
                Verdict::Stale
            } else {
                Verdict::Valid
            }
        };

        match verdict {
            Verdict::Valid => {
                if touch && !self.touch(&local, now) {
                    debug!(session_id = %id, "Last-access update hit no rows, discarding cached copy");
                    self.discard(id, &local);
                    return self.retrieve_and_reconcile(id, expected_version, None);
                }
                trace!(session_id = %id, "Session found in cache");
                Some(local)
            }
            Verdict::Stale => {
                debug!(
                    session_id = %id,
                    expected_version,
                    "Cached copy older than expected version, reconciling"
                );
                self.detach(id, &local);
                self.retrieve_and_reconcile(id, expected_version, Some(local))
            }
            Verdict::Dead => {
                debug!(session_id = %id, "Cached copy invalid or timed out, discarding");
                self.discard(id, &local);
                self.retrieve_and_reconcile(id, expected_version, None)
            }
        }
    }

    /// Apply the write policy's touch. Returns false if the store reported
    /// that another peer invalidated or touched the session first.
    fn touch(&self, session: &Session, now: i64) -> bool {
        let mut state = session.lock();
        if self.config.write_policy() != WritePolicy::Immediate || state.needs_insert {
            state.last_access_time = now;
            return true;
        }

        let expected = state.last_access_time;
        match self
            .backend
            .over_qual_last_access_time_update(session.id(), expected, now)
        {
            Ok(0) => false,
            Ok(_) => {
                state.last_access_time = now;
                true
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Failed to write last-access time");
                state.last_access_time = now;
                true
            }
        }
    }

    /// Materialize `id` from the backing store and reconcile it with an
    /// optional in-memory `candidate`.
    ///
    /// Exactly one copy per id ends up cached; a losing copy is passivated.
    pub fn retrieve_and_reconcile(
        &self,
        id: &str,
        expected_version: u16,
        candidate: Option<Arc<Session>>,
    ) -> Option<Arc<Session>> {
        let existing = self.entries.lock().get(id).cloned();
        if let Some(existing) = existing {
            trace!(session_id = %id, "Session cached by a concurrent retrieval");
            if let Some(candidate) = candidate {
                self.listener.session_cache_discard(&candidate);
            }
            return Some(existing);
        }

        if self.config.check_recently_invalidated && self.recently_invalidated.contains(id) {
            debug!(session_id = %id, "Session recently invalidated, not reading from store");
            self.drop_candidate(candidate);
            return None;
        }

        let stored = match self.backend.read_from_external(id) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                trace!(session_id = %id, "Session not in backing store");
                self.drop_candidate(candidate);
                return None;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to read session from backing store");
                self.drop_candidate(candidate);
                return None;
            }
        };

        let (chosen, from_store, bump) = match candidate {
            Some(local) => {
                let local_access = local.lock().last_access_time;
                if local_access == stored.last_access_time {
                    (local, false, false)
                } else if local_access > stored.last_access_time
                    && self.config.optimize_version_increments
                {
                    (local, false, false)
                } else {
                    self.listener.session_cache_discard(&local);
                    (Arc::new(Session::new(id, stored)), true, true)
                }
            }
            None => (Arc::new(Session::new(id, stored)), true, true),
        };

        match self.insert_if_absent(&chosen) {
            Insertion::Lost(winner) => {
                debug!(session_id = %id, "Lost insert race, passivating retrieved copy");
                self.listener.session_will_passivate(&chosen);
                return Some(winner);
            }
            Insertion::Won { evicted } => {
                if let Some(evicted) = evicted {
                    self.evict_oldest(evicted);
                }
            }
        }

        let now = self.now();
        let version = {
            let mut state = chosen.lock();
            if from_store || expected_version > state.version {
                state.version = expected_version;
            }
            state.needs_insert = false;

            match self.backend.update_last_access_time(id, now) {
                Ok(0) => {
                    drop(state);
                    debug!(session_id = %id, "Session removed by another peer during retrieval");
                    if self.detach(id, &chosen) {
                        self.listener.session_cache_discard(&chosen);
                    }
                    return None;
                }
                Ok(_) => state.last_access_time = now,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to write last-access time");
                }
            }

            if bump {
                state.version = next_version(state.version);
            }
            state.version
        };

        if from_store {
            self.listener.session_did_activate(&chosen);
        }
        if bump {
            debug!(session_id = %id, version, "Session version bumped, affinity broken");
            self.listener.session_affinity_broke(&chosen);
        }

        Some(chosen)
    }

    /// Store a session and make it the cached copy for its id.
    ///
    /// Returns `None` for an invalid session, and for a stored session whose
    /// row could not be confirmed. Otherwise returns the cached copy, which is
    /// a different instance if another thread won the insert.
    ///
    /// A session that is not already the cached copy is always written
    /// through, so a row deleted meanwhile is noticed instead of cached again.
    pub fn put(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let id = session.id().to_string();
        let now = self.now();
        let resident = self
            .peek(&id)
            .is_some_and(|cached| Arc::ptr_eq(&cached, &session));
        let (outcome, inserting) = {
            let mut state = session.lock();
            if !state.valid {
                trace!(session_id = %id, "Ignoring put of invalid session");
                return None;
            }
            let inserting = state.needs_insert;
            (self.write_locked(&id, &mut state, now, resident), inserting)
        };
        trace!(session_id = %id, ?outcome, "Session put");

        if !inserting {
            match outcome {
                WriteOutcome::Missing => {
                    debug!(session_id = %id, "Stored row is gone, not caching session");
                    self.discard(&id, &session);
                    return None;
                }
                WriteOutcome::Failed if !resident && !self.contains(&id) => {
                    debug!(session_id = %id, "Write of uncached session failed, not caching it");
                    return None;
                }
                _ => {}
            }
        }

        match self.insert_if_absent(&session) {
            Insertion::Won { evicted } => {
                if let Some(evicted) = evicted {
                    self.evict_oldest(evicted);
                }
                Some(session)
            }
            Insertion::Lost(winner) => {
                if !Arc::ptr_eq(&winner, &session) {
                    debug!(session_id = %id, "Another copy already cached, passivating this one");
                    self.listener.session_will_passivate(&session);
                }
                Some(winner)
            }
        }
    }

    /// Push a session's changes to the store according to the write policy.
    pub fn update(&self, session: &Session) {
        let now = self.now();
        let mut state = session.lock();
        if !state.valid {
            state.clear_dirty();
            return;
        }
        self.write_locked(session.id(), &mut state, now, true);
    }

    /// Write a session to the store now, bypassing the side table.
    pub(crate) fn write_back(&self, session: &Session) -> WriteOutcome {
        let now = self.now();
        let mut state = session.lock();
        if !state.valid {
            return WriteOutcome::Missing;
        }
        self.write_locked(session.id(), &mut state, now, false)
    }

    /// Write `state` to the store. Caller holds the session's lock.
    pub(crate) fn write_locked(
        &self,
        id: &str,
        state: &mut SessionState,
        now: i64,
        allow_stash: bool,
    ) -> WriteOutcome {
        if state.needs_insert {
            match self.backend.insert_session(id, state) {
                Ok(InsertOutcome::Inserted) => {
                    state.needs_insert = false;
                    state.last_write_time = now;
                    state.clear_dirty();
                    self.recently_invalidated.remove(id);
                    return WriteOutcome::Inserted;
                }
                Ok(InsertOutcome::Duplicate) => {
                    debug!(session_id = %id, "Duplicate session id on insert, updating instead");
                    state.needs_insert = false;
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to insert session, will retry");
                    return WriteOutcome::Failed;
                }
            }
        }

        let attributes_dirty = state.is_dirty();
        let write_all = attributes_dirty || self.config.write_all_attributes;

        if allow_stash && self.config.write_policy() == WritePolicy::Deferred && !write_all {
            self.cached_last_access
                .lock()
                .insert(id.to_string(), state.last_access_time);
            state.last_write_time = now;
            return WriteOutcome::Stashed;
        }

        match self.backend.persist_session(id, state, write_all) {
            Ok(true) => {
                if !self.backend.manages_dirty_tracking() {
                    state.clear_dirty();
                }
                state.last_write_time = now;
                self.cached_last_access.lock().remove(id);
                WriteOutcome::Persisted
            }
            Ok(false) => {
                debug!(session_id = %id, "No stored row to persist into");
                WriteOutcome::Missing
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to persist session, will retry");
                WriteOutcome::Failed
            }
        }
    }

    /// LRU overflow hook: passivate the evicted session and write it through
    /// when the policy asks for it.
    pub(crate) fn evict_oldest(&self, session: Arc<Session>) {
        debug!(session_id = %session.id(), "Evicting least recently used session");
        self.listener.session_will_passivate(&session);
        if self.config.write_policy() == WritePolicy::TimeBased
            || self.config.persist_after_passivation
        {
            self.write_back(&session);
        }
    }

    /// Drop `session` from the cache if it is still the cached copy, firing
    /// the discard notification. Returns whether it was removed.
    pub(crate) fn discard(&self, id: &str, session: &Arc<Session>) -> bool {
        let removed = self.detach(id, session);
        if removed {
            self.listener.session_cache_discard(session);
        }
        removed
    }

    /// Remove `session` from the map if it is still the cached copy.
    fn detach(&self, id: &str, session: &Arc<Session>) -> bool {
        let mut entries = self.entries.lock();
        match entries.peek(id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                entries.pop(id);
                true
            }
            _ => false,
        }
    }

    fn drop_candidate(&self, candidate: Option<Arc<Session>>) {
        if let Some(candidate) = candidate {
            self.listener.session_cache_discard(&candidate);
        }
    }

    /// Insert `session` unless its id is already cached.
    fn insert_if_absent(&self, session: &Arc<Session>) -> Insertion {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(session.id()) {
            return Insertion::Lost(Arc::clone(existing));
        }
        let evicted = entries
            .push(session.id().to_string(), Arc::clone(session))
            .map(|(_, evicted)| evicted);
        Insertion::Won { evicted }
    }

    /// Remove `id` from the cache without notifications.
    pub(crate) fn remove_local(&self, id: &str) -> Option<Arc<Session>> {
        self.entries.lock().pop(id)
    }

    /// Drop `id` from the side table.
    pub(crate) fn forget_last_access(&self, id: &str) {
        self.cached_last_access.lock().remove(id);
    }

    /// Snapshot of the cached sessions, least recently used last.
    pub(crate) fn resident(&self) -> Vec<Arc<Session>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, session)| Arc::clone(session))
            .collect()
    }

    /// Ids of the cached sessions.
    pub(crate) fn resident_ids(&self) -> HashSet<String> {
        self.entries.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Empty the cache, returning what it held.
    pub(crate) fn drain(&self) -> Vec<Arc<Session>> {
        let mut entries = self.entries.lock();
        let mut drained = Vec::with_capacity(entries.len());
        while let Some((_, session)) = entries.pop_lru() {
            drained.push(session);
        }
        drained
    }

    /// Write the side table of cached last-access times to the store.
    ///
    /// On failure the times are put back unless a newer one arrived meanwhile.
    pub(crate) fn flush_cached_last_access_times(&self) -> usize {
        let pending = std::mem::take(&mut *self.cached_last_access.lock());
        if pending.is_empty() {
            return 0;
        }

        match self.backend.write_cached_last_access_times(&pending) {
            Ok(()) => {
                debug!(count = pending.len(), "Flushed cached last-access times");
                pending.len()
            }
            Err(e) => {
                warn!(count = pending.len(), error = %e, "Failed to flush cached last-access times");
                let mut table = self.cached_last_access.lock();
                for (id, time) in pending {
                    table.entry(id).or_insert(time);
                }
                0
            }
        }
    }
}
