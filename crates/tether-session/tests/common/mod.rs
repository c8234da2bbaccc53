//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use tether_session::{
    BackedStore, BackingStore, Error, InsertOutcome, ManualClock, MemoryStore, Result, Session,
    SessionListener, SessionState, StoreConfig,
};

/// Start time for test clocks.
pub const T0: i64 = 1_000_000;

/// A backing store that counts calls and can be told to misbehave.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub reads: AtomicUsize,
    pub inserts: AtomicUsize,
    pub persists: AtomicUsize,
    pub last_access_updates: AtomicUsize,
    pub over_qual_updates: AtomicUsize,
    pub removes: AtomicUsize,
    pub sweeps: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_persists: AtomicBool,
    pub fail_removes: AtomicBool,
    /// Last-access updates report zero rows, as if another peer won.
    pub zero_rows: AtomicBool,
    read_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every read wait on `barrier` before returning.
    pub fn hold_reads(&self, barrier: Option<Arc<Barrier>>) {
        *self.read_barrier.lock() = barrier;
    }

    /// Put a row straight into the store.
    pub fn seed(&self, id: &str, last_access: i64, max_inactive_secs: i32) {
        let state = SessionState::stored(last_access, last_access, max_inactive_secs, HashMap::new());
        self.inner.insert_session(id, &state).unwrap();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn fault(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(Error::Persistence(format!("injected {what} failure")));
        }
        Ok(())
    }
}

impl BackingStore for RecordingStore {
    fn read_from_external(&self, id: &str) -> Result<Option<SessionState>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let barrier = self.read_barrier.lock().clone();
        let result = self.inner.read_from_external(id);
        if let Some(barrier) = barrier {
            barrier.wait();
        }
        Self::fault(&self.fail_reads, "read")?;
        result
    }

    fn insert_session(&self, id: &str, state: &SessionState) -> Result<InsertOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Self::fault(&self.fail_inserts, "insert")?;
        self.inner.insert_session(id, state)
    }

    fn persist_session(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        Self::fault(&self.fail_persists, "persist")?;
        self.inner.persist_session(id, state, write_all)
    }

    fn update_last_access_time(&self, id: &str, now: i64) -> Result<u64> {
        self.last_access_updates.fetch_add(1, Ordering::SeqCst);
        if self.zero_rows.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.update_last_access_time(id, now)
    }

    fn over_qual_last_access_time_update(&self, id: &str, expected: i64, now: i64) -> Result<u64> {
        self.over_qual_updates.fetch_add(1, Ordering::SeqCst);
        if self.zero_rows.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.inner.over_qual_last_access_time_update(id, expected, now)
    }

    fn remove_persisted_session(&self, id: &str) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        Self::fault(&self.fail_removes, "remove")?;
        self.inner.remove_persisted_session(id)
    }

    fn is_present(&self, id: &str) -> Result<bool> {
        self.inner.is_present(id)
    }

    fn perform_invalidation(&self, now: i64, resident: &HashSet<String>) -> Result<Vec<String>> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        self.inner.perform_invalidation(now, resident)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Passivate,
    Activate,
    Discard,
    AffinityBroke,
}

/// A listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(Event, String)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: Event, session: &Session) {
        self.events.lock().push((event, session.id().to_string()));
    }

    pub fn events(&self) -> Vec<(Event, String)> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: Event, id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(e, i)| *e == event && i == id)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl SessionListener for RecordingListener {
    fn session_will_passivate(&self, session: &Session) {
        self.record(Event::Passivate, session);
    }

    fn session_did_activate(&self, session: &Session) {
        self.record(Event::Activate, session);
    }

    fn session_cache_discard(&self, session: &Session) {
        self.record(Event::Discard, session);
    }

    fn session_affinity_broke(&self, session: &Session) {
        self.record(Event::AffinityBroke, session);
    }
}

/// One peer on a shared recording backend.
pub struct Peer {
    pub store: BackedStore<Arc<RecordingStore>>,
    pub listener: Arc<RecordingListener>,
}

impl Peer {
    pub fn new(config: StoreConfig, backend: &Arc<RecordingStore>, clock: &Arc<ManualClock>) -> Self {
        let listener = RecordingListener::new();
        let store = BackedStore::with_clock(
            config.with_alternate_id_scheme(),
            Arc::clone(backend),
            listener.clone(),
            clock.clone(),
        )
        .unwrap();
        Self { store, listener }
    }
}

/// A single peer with a fresh backend and clock.
pub fn setup(config: StoreConfig) -> (Peer, Arc<RecordingStore>, Arc<ManualClock>) {
    let backend = RecordingStore::new();
    let clock = Arc::new(ManualClock::new(T0));
    let peer = Peer::new(config, &backend, &clock);
    (peer, backend, clock)
}
