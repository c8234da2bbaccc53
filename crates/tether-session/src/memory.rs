//! In-memory backing store.
//!
//! Stands in for a replicated memory store. Several [`crate::BackedStore`]s can
//! share one `Arc<MemoryStore>` to behave like peers on a common backend.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

use crate::backend::{BackingStore, InsertOutcome};
use crate::error::Result;
use crate::record::SessionState;

#[derive(Debug, Clone)]
struct StoredSession {
    creation_time: i64,
    last_access_time: i64,
    max_inactive_secs: i32,
    attributes: HashMap<String, Value>,
}

impl StoredSession {
    fn is_expired(&self, now: i64) -> bool {
        self.max_inactive_secs >= 0
            && now - self.last_access_time > i64::from(self.max_inactive_secs) * 1000
    }
}

/// `BackingStore` held in a `HashMap`; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, StoredSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Stored last-access time for `id`.
    pub fn stored_last_access_time(&self, id: &str) -> Option<i64> {
        self.rows.read().get(id).map(|row| row.last_access_time)
    }

    /// Stored attributes for `id`.
    pub fn stored_attributes(&self, id: &str) -> Option<HashMap<String, Value>> {
        self.rows.read().get(id).map(|row| row.attributes.clone())
    }
}

impl BackingStore for MemoryStore {
    fn read_from_external(&self, id: &str) -> Result<Option<SessionState>> {
        Ok(self.rows.read().get(id).map(|row| {
            SessionState::stored(
                row.creation_time,
                row.last_access_time,
                row.max_inactive_secs,
                row.attributes.clone(),
            )
        }))
    }

    fn insert_session(&self, id: &str, state: &SessionState) -> Result<InsertOutcome> {
        let mut rows = self.rows.write();
        if rows.contains_key(id) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(
            id.to_string(),
            StoredSession {
                creation_time: state.creation_time,
                last_access_time: state.last_access_time,
                max_inactive_secs: state.max_inactive_secs,
                attributes: state.attributes.clone(),
            },
        );
        trace!(session_id = %id, "Inserted session row");
        Ok(InsertOutcome::Inserted)
    }

    fn persist_session(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool> {
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(id) else {
            return Ok(false);
        };
        row.last_access_time = state.last_access_time;
        row.max_inactive_secs = state.max_inactive_secs;
        if write_all {
            row.attributes = state.attributes.clone();
        }
        Ok(true)
    }

    fn update_last_access_time(&self, id: &str, now: i64) -> Result<u64> {
        match self.rows.write().get_mut(id) {
            Some(row) => {
                row.last_access_time = now;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn over_qual_last_access_time_update(&self, id: &str, expected: i64, now: i64) -> Result<u64> {
        match self.rows.write().get_mut(id) {
            Some(row) if row.last_access_time == expected => {
                row.last_access_time = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn remove_persisted_session(&self, id: &str) -> Result<()> {
        self.rows.write().remove(id);
        Ok(())
    }

    fn is_present(&self, id: &str) -> Result<bool> {
        Ok(self.rows.read().contains_key(id))
    }

    fn perform_invalidation(&self, now: i64, resident: &HashSet<String>) -> Result<Vec<String>> {
        let mut rows = self.rows.write();
        let expired: Vec<String> = rows
            .iter()
            .filter(|(id, row)| !resident.contains(*id) && row.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            rows.remove(id);
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(now: i64) -> SessionState {
        let mut state = SessionState::new(now, 30);
        state.attributes.insert("k".into(), json!("v"));
        state
    }

    #[test]
    fn test_insert_and_read() {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert_session("s1", &state(100)).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_session("s1", &state(200)).unwrap(),
            InsertOutcome::Duplicate
        );

        let read = store.read_from_external("s1").unwrap().unwrap();
        assert_eq!(read.last_access_time, 100);
        assert_eq!(read.attributes.get("k"), Some(&json!("v")));
        assert!(!read.needs_insert);
        assert!(store.read_from_external("missing").unwrap().is_none());
    }

    #[test]
    fn test_over_qualified_update() {
        let store = MemoryStore::new();
        store.insert_session("s1", &state(100)).unwrap();

        assert_eq!(store.over_qual_last_access_time_update("s1", 99, 150).unwrap(), 0);
        assert_eq!(store.over_qual_last_access_time_update("s1", 100, 150).unwrap(), 1);
        assert_eq!(store.stored_last_access_time("s1"), Some(150));
        assert_eq!(store.update_last_access_time("gone", 150).unwrap(), 0);
    }

    #[test]
    fn test_persist_respects_write_all() {
        let store = MemoryStore::new();
        store.insert_session("s1", &state(100)).unwrap();

        let mut changed = state(100);
        changed.attributes.insert("k".into(), json!("new"));
        changed.last_access_time = 400;

        assert!(store.persist_session("s1", &mut changed, false).unwrap());
        assert_eq!(store.stored_attributes("s1").unwrap()["k"], json!("v"));
        assert_eq!(store.stored_last_access_time("s1"), Some(400));

        assert!(store.persist_session("s1", &mut changed, true).unwrap());
        assert_eq!(store.stored_attributes("s1").unwrap()["k"], json!("new"));

        assert!(!store.persist_session("gone", &mut changed, true).unwrap());
    }

    #[test]
    fn test_invalidation_skips_resident() {
        let store = MemoryStore::new();
        store.insert_session("old", &state(0)).unwrap();
        store.insert_session("cached", &state(0)).unwrap();
        store.insert_session("fresh", &state(50_000)).unwrap();

        let resident: HashSet<String> = ["cached".to_string()].into_iter().collect();
        let removed = store.perform_invalidation(60_000, &resident).unwrap();

        assert_eq!(removed, vec!["old".to_string()]);
        assert!(store.is_present("cached").unwrap());
        assert!(store.is_present("fresh").unwrap());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_invalidation_keeps_negative_timeouts() {
        let store = MemoryStore::new();
        store.insert_session("eternal", &SessionState::new(0, -1)).unwrap();
        store.insert_session("odd", &SessionState::new(0, -7)).unwrap();

        let removed = store.perform_invalidation(i64::MAX / 2, &HashSet::new()).unwrap();
        assert!(removed.is_empty());
        assert_eq!(store.len(), 2);
    }
}
