//! Version fencing, reconciliation and write-path behaviour across peers.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{Event, Peer, RecordingStore, T0, setup};
use serde_json::json;
use tether_session::{BackingStore, StoreConfig, next_version};

#[test]
fn test_version_bumps_when_session_moves_between_peers() {
    let (a, backend, clock) = setup(StoreConfig::new());
    let b = Peer::new(StoreConfig::new(), &backend, &clock);

    let on_a = a.store.create_session("s1").unwrap();
    a.store.release_session(&on_a);
    assert_eq!(on_a.version(), 0);

    clock.advance(1_000);
    let on_b = b.store.get_session("s1", 0, true).unwrap();
    assert_eq!(on_b.version(), 1);
    assert_eq!(b.listener.count(Event::Activate, "s1"), 1);
    assert_eq!(b.listener.count(Event::AffinityBroke, "s1"), 1);
    b.store.release_session(&on_b);

    clock.advance(1_000);
    let back_on_a = a.store.get_session("s1", on_b.version(), true).unwrap();
    assert!(!Arc::ptr_eq(&back_on_a, &on_a));
    assert_eq!(back_on_a.version(), next_version(1));
    assert_eq!(a.listener.count(Event::Discard, "s1"), 1);
    assert_eq!(a.listener.count(Event::AffinityBroke, "s1"), 1);
}

#[test]
fn test_versions_never_decrease() {
    let (a, backend, clock) = setup(StoreConfig::new());
    let b = Peer::new(StoreConfig::new(), &backend, &clock);
    a.store.create_session("s1").unwrap();

    let mut seen = vec![0u16];
    let mut expected = 0;
    for round in 0..6 {
        clock.advance(500);
        let peer = if round % 2 == 0 { &b } else { &a };
        let session = peer.store.get_session("s1", expected, true).unwrap();
        expected = session.version();
        seen.push(expected);
        peer.store.release_session(&session);
    }

    assert!(seen.windows(2).all(|w| w[1] >= w[0]), "versions went backwards: {seen:?}");
}

#[test]
fn test_equal_timestamps_keep_local_changes() {
    let (peer, _backend, _clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();
    session.set_attribute("cart", json!(["book"]));

    let found = peer.store.get_session("s1", 3, false).unwrap();

    assert!(Arc::ptr_eq(&found, &session));
    assert_eq!(found.version(), 3);
    assert_eq!(found.attribute("cart"), Some(json!(["book"])));
    assert!(found.lock().is_dirty());
    assert_eq!(peer.listener.count(Event::AffinityBroke, "s1"), 0);
    assert_eq!(peer.listener.count(Event::Discard, "s1"), 0);
}

#[test]
fn test_newer_local_copy_with_optimized_increments() {
    let config = StoreConfig::new()
        .with_immediate_write(false)
        .with_optimize_version_increments(true);
    let (peer, _backend, clock) = setup(config);
    let session = peer.store.create_session("s1").unwrap();

    clock.advance(100);
    peer.store.get_session("s1", 0, true).unwrap();
    assert_eq!(session.last_access_time(), T0 + 100);

    let found = peer.store.get_session("s1", 5, false).unwrap();
    assert!(Arc::ptr_eq(&found, &session));
    assert_eq!(found.version(), 5);
    assert_eq!(peer.listener.count(Event::AffinityBroke, "s1"), 0);
}

#[test]
fn test_newer_local_copy_without_optimization_takes_stored_copy() {
    let (peer, _backend, clock) = setup(StoreConfig::new().with_immediate_write(false));
    let session = peer.store.create_session("s1").unwrap();

    clock.advance(100);
    peer.store.get_session("s1", 0, true).unwrap();

    let found = peer.store.get_session("s1", 5, false).unwrap();
    assert!(!Arc::ptr_eq(&found, &session));
    assert_eq!(found.version(), 6);
    assert_eq!(peer.listener.count(Event::Discard, "s1"), 1);
    assert_eq!(peer.listener.count(Event::Activate, "s1"), 1);
    assert_eq!(peer.listener.count(Event::AffinityBroke, "s1"), 1);
}

#[test]
fn test_zero_rows_reads_as_not_found_until_recreated() {
    let (peer, backend, clock) = setup(StoreConfig::new());
    peer.store.create_session("s1").unwrap();

    backend.zero_rows.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        clock.advance(10);
        assert!(peer.store.get_session("s1", 0, true).is_none());
        assert!(!peer.store.cache().contains("s1"));
    }
    assert!(peer.listener.count(Event::Discard, "s1") >= 3);

    backend.zero_rows.store(false, Ordering::SeqCst);
    let recreated = peer.store.create_session("s1").unwrap();
    let found = peer.store.get_session("s1", 0, true).unwrap();
    assert!(Arc::ptr_eq(&found, &recreated));
}

#[test]
fn test_backend_read_failure_reads_as_not_found() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    backend.seed("s1", T0, 1800);
    backend.fail_reads.store(true, Ordering::SeqCst);

    assert!(peer.store.get_session("s1", 0, true).is_none());

    backend.fail_reads.store(false, Ordering::SeqCst);
    assert!(peer.store.get_session("s1", 0, true).is_some());
}

#[test]
fn test_failed_insert_is_retried() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    backend.fail_inserts.store(true, Ordering::SeqCst);

    let session = peer.store.create_session("s1").unwrap();
    assert!(session.needs_insert());
    assert!(peer.store.cache().contains("s1"));
    assert!(!backend.inner.is_present("s1").unwrap());

    backend.fail_inserts.store(false, Ordering::SeqCst);
    peer.store.release_session(&session);
    assert!(!session.needs_insert());
    assert!(backend.inner.is_present("s1").unwrap());
    assert_eq!(RecordingStore::count(&backend.inserts), 2);
}

#[test]
fn test_failed_persist_keeps_changes_dirty() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();
    session.set_attribute("k", json!(1));

    backend.fail_persists.store(true, Ordering::SeqCst);
    peer.store.release_session(&session);
    assert!(session.lock().is_dirty());

    backend.fail_persists.store(false, Ordering::SeqCst);
    peer.store.update_session(&session);
    assert!(!session.lock().is_dirty());
    assert_eq!(backend.inner.stored_attributes("s1").unwrap()["k"], json!(1));
}

#[test]
fn test_duplicate_insert_falls_back_to_update() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    backend.seed("s1", T0 - 5_000, 1800);

    let session = peer.store.create_session("s1").unwrap();

    assert!(!session.needs_insert());
    assert_eq!(RecordingStore::count(&backend.inserts), 1);
    assert_eq!(RecordingStore::count(&backend.persists), 1);
    assert_eq!(backend.inner.stored_last_access_time("s1"), Some(T0));
}

#[test]
fn test_capacity_eviction_passivates_oldest() {
    let (peer, backend, _clock) = setup(StoreConfig::new().with_capacity(2));
    for id in ["A", "B", "C"] {
        peer.store.create_session(id).unwrap();
    }

    let cache = peer.store.cache();
    assert!(!cache.contains("A"));
    assert!(cache.contains("B"));
    assert!(cache.contains("C"));
    assert_eq!(peer.listener.count(Event::Passivate, "A"), 1);
    assert_eq!(peer.listener.events().len(), 1);
    assert_eq!(RecordingStore::count(&backend.persists), 0);
}

#[test]
fn test_eviction_writes_through_when_configured() {
    let config = StoreConfig::new()
        .with_capacity(1)
        .with_persist_after_passivation(true);
    let (peer, backend, _clock) = setup(config);

    let first = peer.store.create_session("A").unwrap();
    first.set_attribute("k", json!("kept"));
    peer.store.create_session("B").unwrap();

    assert_eq!(peer.listener.count(Event::Passivate, "A"), 1);
    assert_eq!(backend.inner.stored_attributes("A").unwrap()["k"], json!("kept"));
}

#[test]
fn test_invalid_session_operations_are_noops() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();
    let persists = RecordingStore::count(&backend.persists);

    session.invalidate();
    session.set_attribute("k", json!(1));
    peer.store.update_session(&session);

    assert_eq!(RecordingStore::count(&backend.persists), persists);
    assert!(peer.store.get_session("s1", 0, true).is_some_and(|s| !Arc::ptr_eq(&s, &session)));
}

#[test]
fn test_put_after_remove_does_not_resurrect() {
    for config in [StoreConfig::new(), StoreConfig::new().with_immediate_write(false)] {
        let (peer, backend, clock) = setup(config);
        let session = peer.store.create_session("s1").unwrap();
        peer.store.remove_session("s1").unwrap();

        clock.advance(10);
        assert!(peer.store.put_session(Arc::clone(&session)).is_none());
        assert!(!peer.store.cache().contains("s1"));
        assert!(!backend.inner.is_present("s1").unwrap());
        assert!(peer.store.get_session("s1", 0, true).is_none());
    }
}

#[test]
fn test_put_of_cached_session_still_returns_it() {
    let (peer, backend, _clock) = setup(StoreConfig::new().with_immediate_write(false));
    let session = peer.store.create_session("s1").unwrap();

    let put = peer.store.put_session(Arc::clone(&session)).unwrap();
    assert!(Arc::ptr_eq(&put, &session));
    assert_eq!(RecordingStore::count(&backend.persists), 0);
    assert_eq!(peer.store.cache().pending_last_access_len(), 1);
}

#[test]
fn test_failed_put_of_uncached_session_is_not_cached() {
    let (a, backend, clock) = setup(StoreConfig::new());
    let b = Peer::new(StoreConfig::new(), &backend, &clock);
    let session = a.store.create_session("s1").unwrap();

    backend.fail_persists.store(true, Ordering::SeqCst);
    assert!(b.store.put_session(Arc::clone(&session)).is_none());
    assert!(!b.store.cache().contains("s1"));
    assert!(backend.inner.is_present("s1").unwrap());
}

#[test]
fn test_refresh_with_equal_timestamps_keeps_local_copy() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();
    session.set_attribute("cart", json!(["pen"]));
    let reads = RecordingStore::count(&backend.reads);

    let refreshed = peer.store.refresh_session("s1", 0).unwrap();

    assert!(Arc::ptr_eq(&refreshed, &session));
    assert_eq!(refreshed.version(), 0);
    assert_eq!(refreshed.attribute("cart"), Some(json!(["pen"])));
    assert_eq!(RecordingStore::count(&backend.reads), reads + 1);
    assert_eq!(peer.listener.count(Event::Discard, "s1"), 0);
    assert_eq!(peer.listener.count(Event::Activate, "s1"), 0);
    assert_eq!(peer.listener.count(Event::AffinityBroke, "s1"), 0);
    assert!(peer.store.cache().contains("s1"));
}

#[test]
fn test_refresh_takes_newer_stored_copy() {
    let (a, backend, clock) = setup(StoreConfig::new());
    let b = Peer::new(StoreConfig::new(), &backend, &clock);
    let on_a = a.store.create_session("s1").unwrap();

    clock.advance(1_000);
    b.store.get_session("s1", 0, true).unwrap();

    let refreshed = a.store.refresh_session("s1", 0).unwrap();

    assert!(!Arc::ptr_eq(&refreshed, &on_a));
    assert_eq!(refreshed.version(), 1);
    assert_eq!(a.listener.count(Event::Discard, "s1"), 1);
    assert_eq!(a.listener.count(Event::Activate, "s1"), 1);
    assert_eq!(a.listener.count(Event::AffinityBroke, "s1"), 1);
    let cached = a.store.cache().peek("s1").unwrap();
    assert!(Arc::ptr_eq(&cached, &refreshed));
}

#[test]
fn test_write_all_attributes_skips_side_table() {
    let config = StoreConfig::new()
        .with_immediate_write(false)
        .with_write_all_attributes(true);
    let (peer, backend, clock) = setup(config);
    let session = peer.store.create_session("s1").unwrap();
    assert!(!session.lock().is_dirty());

    clock.advance(100);
    let found = peer.store.get_session("s1", 0, true).unwrap();
    peer.store.release_session(&found);
    peer.store.release_session(&session);

    assert_eq!(RecordingStore::count(&backend.persists), 2);
    assert_eq!(peer.store.cache().pending_last_access_len(), 0);
    assert_eq!(backend.inner.stored_last_access_time("s1"), Some(T0 + 100));
}

#[test]
fn test_clean_deferred_update_goes_to_side_table() {
    let (peer, backend, clock) = setup(StoreConfig::new().with_immediate_write(false));
    let session = peer.store.create_session("s1").unwrap();

    clock.advance(100);
    let found = peer.store.get_session("s1", 0, true).unwrap();
    peer.store.release_session(&found);

    assert_eq!(RecordingStore::count(&backend.persists), 0);
    assert_eq!(peer.store.cache().pending_last_access_len(), 1);
    assert_eq!(backend.inner.stored_last_access_time("s1"), Some(T0));
    assert!(Arc::ptr_eq(&found, &session));
}

#[test]
fn test_create_losing_to_cached_copy_takes_reference() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    backend.seed("s1", T0, 1800);
    let cached = peer.store.get_session("s1", 0, false).unwrap();
    assert_eq!(cached.ref_count(), 0);

    let created = peer.store.create_session("s1").unwrap();

    assert!(Arc::ptr_eq(&created, &cached));
    assert_eq!(created.ref_count(), 1);
    assert_eq!(peer.listener.count(Event::Passivate, "s1"), 1);
}

#[test]
fn test_failed_remove_keeps_local_state() {
    let (peer, backend, _clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();

    backend.fail_removes.store(true, Ordering::SeqCst);
    assert!(peer.store.remove_session("s1").is_err());
    assert!(peer.store.cache().contains("s1"));
    assert!(!peer.store.cache().recently_invalidated().contains("s1"));
    let found = peer.store.get_session("s1", 0, true).unwrap();
    assert!(Arc::ptr_eq(&found, &session));

    backend.fail_removes.store(false, Ordering::SeqCst);
    peer.store.remove_session("s1").unwrap();
    assert!(peer.store.cache().recently_invalidated().contains("s1"));
    assert!(peer.store.get_session("s1", 0, true).is_none());
}

#[test]
fn test_any_negative_timeout_never_expires() {
    let (peer, _backend, clock) = setup(StoreConfig::new());
    let session = peer.store.create_session("s1").unwrap();
    session.set_max_inactive_interval(-2);
    peer.store.release_session(&session);

    clock.advance(1);
    let found = peer.store.get_session("s1", 0, true).unwrap();
    assert!(Arc::ptr_eq(&found, &session));
    assert_eq!(found.version(), 0);
    assert_eq!(peer.listener.count(Event::Discard, "s1"), 0);

    let report = peer.store.run_invalidation(T0 + 1_000_000_000);
    assert!(report.expired.is_empty());
    assert!(peer.store.cache().contains("s1"));
}
