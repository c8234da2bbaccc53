//! Versioned session records.
//!
//! A [`Session`] is shared by reference (`Arc<Session>`) between the cache and
//! any caller holding it. All mutable fields live in a [`SessionState`] behind
//! the session's own lock; nothing outside that lock may change them.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest version number before wrapping back to zero.
pub const MAX_VERSION: u16 = 9999;

/// `max_inactive_secs` value for sessions that never expire.
pub const NEVER_EXPIRES: i32 = -1;

/// The version that follows `version`, wrapping after [`MAX_VERSION`].
pub fn next_version(version: u16) -> u16 {
    if version >= MAX_VERSION { 0 } else { version + 1 }
}

/// Mutable state of a session, guarded by the session's lock.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Optimistic fence; a cached copy is valid only at or above the version
    /// the caller expects.
    pub version: u16,

    /// Creation time in epoch milliseconds.
    pub creation_time: i64,

    /// Last access time in epoch milliseconds.
    pub last_access_time: i64,

    /// Allowed idle time in seconds. Any negative value, such as
    /// [`NEVER_EXPIRES`], disables expiry.
    pub max_inactive_secs: i32,

    /// Once false the session is dead for good.
    pub valid: bool,

    /// True until the first successful durable insert.
    pub needs_insert: bool,

    /// Application attributes.
    pub attributes: HashMap<String, Value>,

    /// Attributes set since the last successful write.
    pub changed_attributes: HashSet<String>,

    /// Attributes removed since the last successful write.
    pub removed_attributes: HashSet<String>,

    /// Requests currently holding this session.
    pub ref_count: u32,

    /// Time of the last successful durable write, or -1.
    pub last_write_time: i64,

    /// Consecutive time-based writes skipped because the session was in use.
    pub defer_count: u32,
}

impl SessionState {
    /// State for a session created at `now` that has not been stored yet.
    pub fn new(now: i64, max_inactive_secs: i32) -> Self {
        Self {
            version: 0,
            creation_time: now,
            last_access_time: now,
            max_inactive_secs,
            valid: true,
            needs_insert: true,
            attributes: HashMap::new(),
            changed_attributes: HashSet::new(),
            removed_attributes: HashSet::new(),
            ref_count: 0,
            last_write_time: -1,
            defer_count: 0,
        }
    }

    /// State for a session read back from a backing store.
    pub fn stored(
        creation_time: i64,
        last_access_time: i64,
        max_inactive_secs: i32,
        attributes: HashMap<String, Value>,
    ) -> Self {
        Self {
            creation_time,
            last_access_time,
            max_inactive_secs,
            attributes,
            needs_insert: false,
            ..Self::new(creation_time, max_inactive_secs)
        }
    }

    /// Whether attributes were set or removed since the last write.
    pub fn is_dirty(&self) -> bool {
        !self.changed_attributes.is_empty() || !self.removed_attributes.is_empty()
    }

    /// Forget pending attribute changes.
    pub fn clear_dirty(&mut self) {
        self.changed_attributes.clear();
        self.removed_attributes.clear();
    }

    /// Milliseconds since the last access.
    pub fn idle_millis(&self, now: i64) -> i64 {
        now - self.last_access_time
    }

    /// Whether the idle timeout has run out at `now` (lookup rule).
    pub fn is_timed_out(&self, now: i64) -> bool {
        self.max_inactive_secs >= 0
            && self.idle_millis(now) >= i64::from(self.max_inactive_secs) * 1000
    }

    /// Whether the idle time exceeds the timeout at `now` (sweep rule).
    pub fn is_expired(&self, now: i64) -> bool {
        self.max_inactive_secs >= 0
            && self.idle_millis(now) > i64::from(self.max_inactive_secs) * 1000
    }
}

/// A cached, versioned session.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: Mutex<SessionState>,
}

impl Session {
    /// Wrap `state` as the session `id`.
    pub fn new(id: impl Into<String>, state: SessionState) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(state),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the session's lock.
    ///
    /// Hold it only for in-memory mutation and, at most, the backend call that
    /// directly follows.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn version(&self) -> u16 {
        self.state.lock().version
    }

    pub fn last_access_time(&self) -> i64 {
        self.state.lock().last_access_time
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    pub fn needs_insert(&self) -> bool {
        self.state.lock().needs_insert
    }

    pub fn ref_count(&self) -> u32 {
        self.state.lock().ref_count
    }

    /// Read an attribute.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.state.lock().attributes.get(name).cloned()
    }

    /// Attribute names, sorted.
    pub fn attribute_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.attributes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Set an attribute and mark it changed. No-op on an invalid session.
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut state = self.state.lock();
        if !state.valid {
            return;
        }
        state.removed_attributes.remove(&name);
        state.changed_attributes.insert(name.clone());
        state.attributes.insert(name, value);
    }

    /// Remove an attribute and mark it removed. No-op on an invalid session.
    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        let mut state = self.state.lock();
        if !state.valid {
            return None;
        }
        let previous = state.attributes.remove(name);
        if previous.is_some() {
            state.changed_attributes.remove(name);
            state.removed_attributes.insert(name.to_string());
        }
        previous
    }

    /// Change the idle timeout. No-op on an invalid session.
    pub fn set_max_inactive_interval(&self, secs: i32) {
        let mut state = self.state.lock();
        if state.valid {
            state.max_inactive_secs = secs;
        }
    }

    /// Mark the session permanently dead and drop its pending changes.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.valid = false;
        state.clear_dirty();
    }

    /// A read-only copy of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot::from_state(&self.id, &state)
    }
}

/// Serializable copy of a session, for display and inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub version: u16,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub max_inactive_secs: i32,
    pub valid: bool,
    pub needs_insert: bool,
    pub attributes: BTreeMap<String, Value>,
    pub dirty: bool,
    pub ref_count: u32,
    pub last_write_time: i64,
}

impl SessionSnapshot {
    /// Copy `state` for the session `id`.
    pub fn from_state(id: &str, state: &SessionState) -> Self {
        Self {
            id: id.to_string(),
            version: state.version,
            creation_time: state.creation_time,
            last_access_time: state.last_access_time,
            max_inactive_secs: state.max_inactive_secs,
            valid: state.valid,
            needs_insert: state.needs_insert,
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            dirty: state.is_dirty(),
            ref_count: state.ref_count,
            last_write_time: state.last_write_time,
        }
    }
}
