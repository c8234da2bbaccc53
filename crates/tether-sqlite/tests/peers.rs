//! Several session stores sharing one SQLite database file.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tether_session::{BackedStore, ManualClock, NoopListener, StoreConfig};
use tether_sqlite::{Layout, SqliteStore};

const T0: i64 = 1_700_000_000_000;

fn peer(dir: &TempDir, clock: &Arc<ManualClock>, layout: Layout) -> BackedStore<SqliteStore> {
    let backend = SqliteStore::open(&dir.path().join("sessions.db"), "shop")
        .unwrap()
        .with_layout(layout);
    BackedStore::with_clock(
        StoreConfig::new().with_alternate_id_scheme(),
        backend,
        Arc::new(NoopListener),
        clock.clone(),
    )
    .unwrap()
}

#[test]
fn test_session_moves_between_peers() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let a = peer(&dir, &clock, Layout::SingleRow);
    let b = peer(&dir, &clock, Layout::SingleRow);

    let session = a.create_session("s1").unwrap();
    session.set_attribute("cart", json!(["tea"]));
    a.release_session(&session);

    clock.advance(1_000);
    let on_b = b.get_session("s1", session.version(), true).unwrap();
    assert_eq!(on_b.attribute("cart"), Some(json!(["tea"])));
    assert_eq!(on_b.version(), 1);

    on_b.set_attribute("cart", json!(["tea", "cake"]));
    b.release_session(&on_b);

    clock.advance(1_000);
    let back = a.get_session("s1", on_b.version(), true).unwrap();
    assert!(!Arc::ptr_eq(&back, &session));
    assert_eq!(back.attribute("cart"), Some(json!(["tea", "cake"])));
    assert_eq!(back.version(), 2);
}

#[test]
fn test_removal_on_one_peer_invalidates_the_other() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let a = peer(&dir, &clock, Layout::SingleRow);
    let b = peer(&dir, &clock, Layout::SingleRow);

    a.create_session("s1").unwrap();
    clock.advance(10);
    assert!(b.get_session("s1", 0, true).is_some());

    a.remove_session("s1").unwrap();
    clock.advance(10);
    assert!(b.get_session("s1", 0, true).is_none());
    assert!(!b.cache().contains("s1"));
    assert!(b.get_session("s1", 0, true).is_none());
}

#[test]
fn test_multi_row_layout_through_store() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let a = peer(&dir, &clock, Layout::MultiRow);

    let session = a.create_session("s1").unwrap();
    session.set_attribute("user", json!("ada"));
    session.set_attribute("cart", json!([1]));
    a.release_session(&session);
    assert!(!session.lock().is_dirty());

    session.remove_attribute("cart");
    a.update_session(&session);

    let stored = a.read_persisted("s1").unwrap().unwrap();
    assert_eq!(stored.attributes.len(), 1);
    assert_eq!(stored.attributes["user"], json!("ada"));
}

#[test]
fn test_sweep_expires_sessions_held_by_no_peer() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let a = peer(&dir, &clock, Layout::SingleRow);
    let b = peer(&dir, &clock, Layout::SingleRow);

    let session = a.create_session("idle").unwrap();
    session.set_max_inactive_interval(60);
    a.release_session(&session);
    a.stop();

    let report = b.run_invalidation(T0 + 61_000);
    assert_eq!(report.removed, vec!["idle".to_string()]);
    assert!(!b.is_persisted("idle").unwrap());

    let again = b.run_invalidation(T0 + 62_000);
    assert!(again.removed.is_empty());
}
