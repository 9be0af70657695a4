//! Test fixtures and session helpers.
//!
//! [`Harness`] wires a record store, a [`MemoryServer`] and a session
//! together and knows how to replay generated [`Action`]s and check the
//! store afterwards.

use crate::generators::Action;
use crate::server::MemoryServer;
use offsync_engine::{PassReport, SyncConfig, SyncError, SyncResult, SyncSession};
use offsync_protocol::{ConflictPolicy, RecordId, StateTag};
use offsync_storage::{FileRecordStore, FileStoreConfig, MemoryRecordStore, RecordStore};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A temporary directory holding a durable record store.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the store file.
    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("records.log")
    }

    /// Opens (or reopens) the store.
    pub fn open_store(&self) -> FileRecordStore {
        FileRecordStore::open(&self.store_path(), FileStoreConfig::default())
            .expect("Failed to open record store")
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A session over a store, talking to an in-memory server.
pub struct Harness<S: RecordStore> {
    /// The local store.
    pub store: Arc<S>,
    /// The server.
    pub server: Arc<MemoryServer>,
    /// The session.
    pub session: SyncSession<S, MemoryServer>,
}

impl Harness<MemoryRecordStore> {
    /// Creates a harness over a fresh in-memory store.
    pub fn memory(policy: ConflictPolicy) -> Self {
        Self::open(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryServer::new()),
            SyncConfig::new("test").with_policy(policy),
        )
    }
}

impl<S: RecordStore> Harness<S> {
    /// Opens a session over existing parts.
    pub fn open(store: Arc<S>, server: Arc<MemoryServer>, config: SyncConfig) -> Self {
        let session = SyncSession::open(config, Arc::clone(&store), Arc::clone(&server))
            .expect("Failed to open session");
        Self {
            store,
            server,
            session,
        }
    }

    /// Runs one pass.
    pub fn sync(&self) -> SyncResult<PassReport> {
        self.session.sync()
    }

    /// Replays one action.
    ///
    /// Refusals an application would see in normal use (editing a missing
    /// record, creating an existing one, editing an unresolved conflict)
    /// are not errors here.
    pub fn apply(&self, action: &Action) -> SyncResult<()> {
        let tracker = self.session.tracker();
        let result = match action {
            Action::Create { id, body, full } => tracker.create(id, body.clone(), *full).map(drop),
            Action::Update { id, body, full } => tracker.update(id, body.clone(), *full).map(drop),
            Action::Delete { id } => tracker.delete(id),
            Action::ServerUpdate { id, body } => {
                self.server.external_update(id, body.clone());
                Ok(())
            }
            Action::ServerDelete { id } => {
                self.server.external_delete(id);
                Ok(())
            }
            Action::Sync => self.session.sync().map(drop),
            Action::SetOnline(online) => {
                self.server.set_online(*online);
                Ok(())
            }
            Action::SetPolicy(policy) => self.session.set_policy(*policy),
        };
        match result {
            Err(
                SyncError::RecordNotFound { .. }
                | SyncError::AlreadyExists { .. }
                | SyncError::ConflictPending { .. },
            ) => Ok(()),
            other => other,
        }
    }

    /// Checks the bookkeeping every record must satisfy between passes.
    pub fn check_invariants(&self) -> Result<(), String> {
        check_store(self.store.as_ref())
    }

    /// Checks that every record matches the server and nothing is pending.
    pub fn check_converged(&self) -> Result<(), String> {
        let local = self
            .store
            .scan(&|_| true)
            .map_err(|e| e.to_string())?;
        let mut ids: BTreeSet<RecordId> = local.into_iter().collect();
        ids.extend(self.server.live_records().into_iter().map(|(id, _, _)| id));

        for id in ids {
            let record = self.store.get(&id).map_err(|e| e.to_string())?;
            let server_body = self.server.body(&id);
            match (record, server_body) {
                (None, None) => {}
                (Some(record), Some(body)) => {
                    if !record.state.is_clean() {
                        return Err(format!("{id}: still {}", record.state));
                    }
                    if record.body.as_ref() != Some(&body) {
                        return Err(format!("{id}: body differs from server"));
                    }
                    if record.revision != self.server.revision(&id) {
                        return Err(format!(
                            "{id}: revision {:?} vs server {:?}",
                            record.revision,
                            self.server.revision(&id)
                        ));
                    }
                }
                (Some(record), None) => {
                    return Err(format!("{id}: {} locally, missing on server", record.state))
                }
                (None, Some(_)) => return Err(format!("{id}: on server, missing locally")),
            }
        }
        Ok(())
    }
}

/// Checks the per-record bookkeeping of a store that no pass is using.
pub fn check_store<S: RecordStore + ?Sized>(store: &S) -> Result<(), String> {
    for id in store.scan(&|_| true).map_err(|e| e.to_string())? {
        let Some(record) = store.get(&id).map_err(|e| e.to_string())? else {
            return Err(format!("{id}: listed by scan but missing"));
        };
        let state = record.state;
        if state == StateTag::NoState {
            return Err(format!("{id}: stored without a state"));
        }
        if state.is_syncing() {
            return Err(format!("{id}: left in flight"));
        }
        if record.pending.is_some() || record.push_full {
            return Err(format!("{id}: in-flight bookkeeping left on {state}"));
        }
        if state.is_conflicted() != record.server.is_some() {
            return Err(format!("{id}: server snapshot does not match {state}"));
        }
        if let Some(reason) = &record.quarantine {
            return Err(format!("{id}: quarantined: {reason}"));
        }
    }
    Ok(())
}
