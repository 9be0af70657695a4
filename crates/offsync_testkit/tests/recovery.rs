//! Crash recovery with a durable store.
//!
//! Each test runs a pass over a [`CrashableStore`] wrapping a file store,
//! lets a write fail partway, drops everything, reopens the file and checks
//! what the next session makes of it.

use offsync_engine::{SyncConfig, SyncError};
use offsync_protocol::{ConflictPolicy, RecordId, StateTag};
use offsync_storage::{FileRecordStore, RecordStore, StorageError};
use offsync_testkit::{check_store, CrashableStore, Harness, MemoryServer, TestDir};
use std::sync::Arc;

fn config() -> SyncConfig {
    SyncConfig::new("notes").with_policy(ConflictPolicy::Manual)
}

fn crashable(dir: &TestDir, server: &Arc<MemoryServer>) -> Harness<CrashableStore<FileRecordStore>> {
    Harness::open(
        Arc::new(CrashableStore::new(Arc::new(dir.open_store()))),
        Arc::clone(server),
        config(),
    )
}

fn reopen(dir: &TestDir, server: &Arc<MemoryServer>) -> Harness<FileRecordStore> {
    Harness::open(Arc::new(dir.open_store()), Arc::clone(server), config())
}

fn state(store: &impl RecordStore, id: &str) -> Option<StateTag> {
    store.get(&RecordId::new(id)).unwrap().map(|r| r.state)
}

#[test]
fn crash_after_push_leaves_record_in_flight_until_restart() {
    let dir = TestDir::new();
    let server = Arc::new(MemoryServer::new());
    let id = RecordId::new("n1");

    {
        let harness = crashable(&dir, &server);
        harness.session.tracker().create(&id, b"A".to_vec(), false).unwrap();
        // The in-flight commit goes through; the outcome commit does not.
        harness.store.crash_after(1);

        let err = harness.sync().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Storage(StorageError::Unavailable(_))
        ));
        assert!(harness.store.has_crashed());
        assert_eq!(server.body(&id), Some(b"A".to_vec()));
    }

    // On disk the record is still in flight.
    {
        let store = dir.open_store();
        assert_eq!(state(&store, "n1"), Some(StateTag::Syncing));
    }

    let harness = reopen(&dir, &server);
    assert_eq!(state(harness.store.as_ref(), "n1"), Some(StateTag::Dirty));
    check_store(harness.store.as_ref()).unwrap();

    // The retry collides with its own earlier write; identical bodies settle.
    let report = harness.sync().unwrap();
    assert!(report.pending_conflicts.is_empty());
    assert_eq!(state(harness.store.as_ref(), "n1"), Some(StateTag::Synced));
    harness.check_converged().unwrap();
}

#[test]
fn crash_during_delete_restores_the_pending_delete() {
    let dir = TestDir::new();
    let server = Arc::new(MemoryServer::new());
    let id = RecordId::new("n1");
    server.external_update(&id, b"A".to_vec());

    {
        let harness = crashable(&dir, &server);
        harness.sync().unwrap();
        harness.session.tracker().delete(&id).unwrap();
        server.set_online(false);
        harness.store.crash_after(1);
        assert!(harness.sync().is_err());
    }

    let harness = reopen(&dir, &server);
    assert_eq!(state(harness.store.as_ref(), "n1"), Some(StateTag::Deleted));

    server.set_online(true);
    let report = harness.sync().unwrap();
    assert_eq!(report.destroyed, 1);
    assert_eq!(state(harness.store.as_ref(), "n1"), None);
    assert_eq!(server.body(&id), None);
}

#[test]
fn crash_before_any_commit_pushes_nothing() {
    let dir = TestDir::new();
    let server = Arc::new(MemoryServer::new());

    {
        let harness = crashable(&dir, &server);
        harness
            .session
            .tracker()
            .create(&RecordId::new("n1"), b"A".to_vec(), true)
            .unwrap();
        harness.store.crash_after(0);
        assert!(harness.sync().is_err());
    }
    assert_eq!(server.push_count(), 0);

    let harness = reopen(&dir, &server);
    assert_eq!(state(harness.store.as_ref(), "n1"), Some(StateTag::DirtyFull));
    harness.sync().unwrap();
    harness.check_converged().unwrap();
}

#[test]
fn conflicts_survive_a_restart() {
    let dir = TestDir::new();
    let server = Arc::new(MemoryServer::new());
    let id = RecordId::new("n1");
    server.external_update(&id, b"B".to_vec());

    {
        let harness = reopen(&dir, &server);
        harness.sync().unwrap();
        harness
            .session
            .tracker()
            .update(&id, b"B1".to_vec(), false)
            .unwrap();
        server.external_update(&id, b"B2".to_vec());
        harness.sync().unwrap();
    }

    let harness = reopen(&dir, &server);
    let views = harness.session.surface().conflicts().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].local_body.as_deref(), Some(&b"B1"[..]));
    assert_eq!(views[0].server_body.as_deref(), Some(&b"B2"[..]));

    harness.session.surface().take_server(&id).unwrap();
    harness.check_converged().unwrap();
}

#[test]
fn pull_cursor_survives_a_restart() {
    let dir = TestDir::new();
    let server = Arc::new(MemoryServer::new());
    server.external_update(&RecordId::new("a"), b"1".to_vec());

    {
        let harness = reopen(&dir, &server);
        assert_eq!(harness.sync().unwrap().pulled, 1);
    }

    server.external_update(&RecordId::new("b"), b"2".to_vec());
    let harness = reopen(&dir, &server);
    assert_eq!(harness.sync().unwrap().pulled, 1);
    assert_eq!(harness.store.len().unwrap(), 2);
}
