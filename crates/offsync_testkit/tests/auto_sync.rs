//! Connectivity-driven passes.

use offsync_engine::{AutoSync, Connectivity, NetworkMonitor, PassEvent, SyncConfig, SyncSession};
use offsync_protocol::RecordId;
use offsync_storage::MemoryRecordStore;
use offsync_testkit::MemoryServer;
use std::sync::Arc;
use std::time::Duration;

async fn next(auto: &mut AutoSync) -> PassEvent {
    tokio::time::timeout(Duration::from_secs(5), auto.next_event())
        .await
        .expect("no pass within timeout")
        .expect("auto sync ended")
}

#[tokio::test]
async fn reconnecting_pushes_offline_edits() {
    let server = Arc::new(MemoryServer::new());
    server.set_online(false);
    let session = Arc::new(
        SyncSession::open(
            SyncConfig::new("notes"),
            Arc::new(MemoryRecordStore::new()),
            Arc::clone(&server),
        )
        .unwrap(),
    );
    let id = RecordId::new("n1");
    session.tracker().create(&id, b"offline".to_vec(), false).unwrap();

    let monitor = NetworkMonitor::new(Connectivity::Offline);
    let mut auto = AutoSync::spawn(Arc::clone(&session), &monitor);

    // Flapping while offline does nothing.
    monitor.set(Connectivity::Offline);

    server.set_online(true);
    monitor.set(Connectivity::Online);
    match next(&mut auto).await {
        PassEvent::Completed(report) => assert_eq!(report.pushed, 1),
        PassEvent::Failed(e) => panic!("pass failed: {e}"),
    }
    assert_eq!(server.body(&id), Some(b"offline".to_vec()));

    // Going offline and back runs another pass.
    session.tracker().update(&id, b"again".to_vec(), false).unwrap();
    monitor.set(Connectivity::Offline);
    // Let the task observe the drop; the watch channel keeps only the latest value.
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.set(Connectivity::Online);
    match next(&mut auto).await {
        PassEvent::Completed(report) => assert_eq!(report.pushed, 1),
        PassEvent::Failed(e) => panic!("pass failed: {e}"),
    }
    assert_eq!(server.body(&id), Some(b"again".to_vec()));

    auto.stop();
}
