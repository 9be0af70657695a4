//! An authoritative in-memory sync server.
//!
//! Keeps the latest version of every record plus an append-only change log
//! that pulls page through. Revisions are the change log sequence numbers,
//! so they increase across all records.

use offsync_engine::SyncTransport;
use offsync_protocol::{
    Body, Cursor, PullRequest, PullResponse, PushKind, PushOutcome, PushRequest, RecordId,
    RemoteChange, Revision, TransportFailure,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Server-side copy of one record. A `None` body is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    body: Option<Body>,
    revision: u64,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RecordId, Entry>,
    log: Vec<(u64, RemoteChange)>,
    next: u64,
}

impl State {
    fn commit(&mut self, id: &RecordId, body: Option<Body>) -> u64 {
        self.next += 1;
        let revision = self.next;
        let change = match &body {
            Some(body) => RemoteChange::updated(id.clone(), body.clone(), Revision::from(revision)),
            None => RemoteChange::deleted(id.clone(), Revision::from(revision)),
        };
        self.records.insert(id.clone(), Entry { body, revision });
        self.log.push((revision, change));
        revision
    }

    fn live(&self, id: &RecordId) -> Option<&Entry> {
        self.records.get(id).filter(|entry| entry.body.is_some())
    }
}

/// In-memory server implementing [`SyncTransport`].
///
/// Pushes are checked against the current revision of the record:
///
/// - a `Put` without a base creates, and fails with a version conflict if
///   a live record exists
/// - a `Patch` or `Put` with a base must match the current revision
/// - a `Patch` or `Delete` of a missing or deleted record is `NotFound`
/// - a `Put` over a deleted record re-creates it
pub struct MemoryServer {
    state: Mutex<State>,
    online: AtomicBool,
    failures: Mutex<HashMap<RecordId, VecDeque<TransportFailure>>>,
    lost_acks: Mutex<HashMap<RecordId, VecDeque<TransportFailure>>>,
    pull_failures: Mutex<VecDeque<TransportFailure>>,
    pushes: AtomicU64,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Creates an empty, reachable server.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            online: AtomicBool::new(true),
            failures: Mutex::new(HashMap::new()),
            lost_acks: Mutex::new(HashMap::new()),
            pull_failures: Mutex::new(VecDeque::new()),
            pushes: AtomicU64::new(0),
        }
    }

    /// Creates a server whose first revision is `first`.
    pub fn starting_at(first: u64) -> Self {
        let server = Self::new();
        server.state.lock().next = first.saturating_sub(1);
        server
    }

    /// Sets whether the server is reachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns true if the server is reachable.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Fails the next push of `id` with `failure`.
    pub fn fail_next_push(&self, id: &RecordId, failure: TransportFailure) {
        self.failures
            .lock()
            .entry(id.clone())
            .or_default()
            .push_back(failure);
    }

    /// Applies the next push of `id` but answers with `failure`, as if the
    /// acknowledgement was lost on the way back.
    pub fn lose_next_ack(&self, id: &RecordId, failure: TransportFailure) {
        self.lost_acks
            .lock()
            .entry(id.clone())
            .or_default()
            .push_back(failure);
    }

    /// Fails the next pull with `failure`.
    pub fn fail_next_pull(&self, failure: TransportFailure) {
        self.pull_failures.lock().push_back(failure);
    }

    /// Writes a record as another client would.
    pub fn external_update(&self, id: &RecordId, body: Body) -> Revision {
        Revision::from(self.state.lock().commit(id, Some(body)))
    }

    /// Deletes a record as another client would. Returns `None` if the
    /// record was not live.
    pub fn external_delete(&self, id: &RecordId) -> Option<Revision> {
        let mut state = self.state.lock();
        state.live(id)?;
        Some(Revision::from(state.commit(id, None)))
    }

    /// Returns the live body of a record.
    pub fn body(&self, id: &RecordId) -> Option<Body> {
        self.state.lock().live(id).and_then(|entry| entry.body.clone())
    }

    /// Returns the current revision of a record, tombstones included.
    pub fn revision(&self, id: &RecordId) -> Option<Revision> {
        self.state
            .lock()
            .records
            .get(id)
            .map(|entry| Revision::from(entry.revision))
    }

    /// Returns every live record, ordered by id.
    pub fn live_records(&self) -> Vec<(RecordId, Body, Revision)> {
        self.state
            .lock()
            .records
            .iter()
            .filter_map(|(id, entry)| {
                let body = entry.body.clone()?;
                Some((id.clone(), body, Revision::from(entry.revision)))
            })
            .collect()
    }

    /// Returns the number of pushes received while online.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    fn check(state: &State, request: &PushRequest) -> Result<(), PushOutcome> {
        match (request.kind, state.live(&request.id)) {
            (PushKind::Patch | PushKind::Delete, None) => {
                Err(PushOutcome::Failure(TransportFailure::NotFound))
            }
            (PushKind::Put, None) => Ok(()),
            (_, Some(entry)) => {
                let base = request.base_revision.as_ref();
                if base == Some(&Revision::from(entry.revision)) {
                    Ok(())
                } else {
                    Err(PushOutcome::VersionConflict {
                        server_body: entry.body.clone(),
                        server_revision: Some(Revision::from(entry.revision)),
                    })
                }
            }
        }
    }
}

impl SyncTransport for MemoryServer {
    fn push(&self, request: &PushRequest) -> PushOutcome {
        if !self.is_online() {
            return PushOutcome::Failure(TransportFailure::Disconnected);
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .lock()
            .get_mut(&request.id)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = injected {
            return PushOutcome::Failure(failure);
        }

        let mut state = self.state.lock();
        if let Err(outcome) = Self::check(&state, request) {
            return outcome;
        }
        let body = match request.kind {
            PushKind::Delete => None,
            PushKind::Put | PushKind::Patch => match &request.body {
                Some(body) => Some(body.clone()),
                None => return PushOutcome::Failure(TransportFailure::Rejected(400)),
            },
        };
        let revision = state.commit(&request.id, body);
        let lost = self
            .lost_acks
            .lock()
            .get_mut(&request.id)
            .and_then(VecDeque::pop_front);
        match lost {
            Some(failure) => PushOutcome::Failure(failure),
            None => PushOutcome::Accepted(Revision::from(revision)),
        }
    }

    fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportFailure> {
        if !self.is_online() {
            return Err(TransportFailure::Disconnected);
        }
        if let Some(failure) = self.pull_failures.lock().pop_front() {
            return Err(failure);
        }
        let after = match &request.cursor {
            Some(cursor) => cursor
                .as_str()
                .parse::<u64>()
                .map_err(|_| TransportFailure::Rejected(400))?,
            None => 0,
        };

        let state = self.state.lock();
        let pending: Vec<_> = state.log.iter().filter(|(seq, _)| *seq > after).collect();
        let limit = request.limit as usize;
        let page = &pending[..pending.len().min(limit)];
        let cursor = page.last().map_or(after, |(seq, _)| *seq);
        Ok(PullResponse::new(
            page.iter().map(|(_, change)| change.clone()).collect(),
            Cursor::new(cursor.to_string()),
            pending.len() > page.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(id: &str, body: &[u8], base: Option<u64>) -> PushRequest {
        PushRequest {
            id: RecordId::new(id),
            kind: PushKind::Put,
            body: Some(body.to_vec()),
            base_revision: base.map(Revision::from),
        }
    }

    fn pull(server: &MemoryServer, cursor: Option<&str>, limit: u32) -> PullResponse {
        server
            .pull(&PullRequest {
                cursor: cursor.map(Cursor::new),
                limit,
            })
            .unwrap()
    }

    #[test]
    fn create_then_conflicting_create() {
        let server = MemoryServer::starting_at(7);
        assert_eq!(
            server.push(&put("a", b"x", None)),
            PushOutcome::Accepted(Revision::from(7))
        );
        assert_eq!(
            server.push(&put("a", b"y", None)),
            PushOutcome::VersionConflict {
                server_body: Some(b"x".to_vec()),
                server_revision: Some(Revision::from(7)),
            }
        );
        assert_eq!(
            server.push(&put("a", b"y", Some(7))),
            PushOutcome::Accepted(Revision::from(8))
        );
    }

    #[test]
    fn deleted_records_are_not_found() {
        let server = MemoryServer::new();
        let id = RecordId::new("a");
        server.external_update(&id, b"x".to_vec());
        server.external_delete(&id).unwrap();
        assert!(server.external_delete(&id).is_none());

        let delete = PushRequest {
            id: id.clone(),
            kind: PushKind::Delete,
            body: None,
            base_revision: Some(Revision::from(1)),
        };
        assert_eq!(
            server.push(&delete),
            PushOutcome::Failure(TransportFailure::NotFound)
        );
        // A full put re-creates it.
        assert!(matches!(
            server.push(&put("a", b"z", None)),
            PushOutcome::Accepted(_)
        ));
        assert_eq!(server.body(&id), Some(b"z".to_vec()));
    }

    #[test]
    fn pull_pages_through_the_log() {
        let server = MemoryServer::new();
        for name in ["a", "b", "c"] {
            server.external_update(&RecordId::new(name), name.as_bytes().to_vec());
        }

        let first = pull(&server, None, 2);
        assert_eq!(first.changes.len(), 2);
        assert!(first.has_more);
        let second = pull(&server, Some(first.cursor.as_str()), 2);
        assert_eq!(second.changes.len(), 1);
        assert!(!second.has_more);
        let third = pull(&server, Some(second.cursor.as_str()), 2);
        assert!(third.changes.is_empty());
        assert_eq!(third.cursor, second.cursor);
    }

    #[test]
    fn offline_and_injected_failures() {
        let server = MemoryServer::new();
        server.set_online(false);
        assert_eq!(
            server.push(&put("a", b"x", None)),
            PushOutcome::Failure(TransportFailure::Disconnected)
        );
        assert_eq!(server.push_count(), 0);

        server.set_online(true);
        server.fail_next_push(&RecordId::new("a"), TransportFailure::Server(503));
        assert_eq!(
            server.push(&put("a", b"x", None)),
            PushOutcome::Failure(TransportFailure::Server(503))
        );
        assert!(matches!(
            server.push(&put("a", b"x", None)),
            PushOutcome::Accepted(_)
        ));
    }

    #[test]
    fn lost_ack_still_applies_the_push() {
        let server = MemoryServer::new();
        let id = RecordId::new("a");
        server.lose_next_ack(&id, TransportFailure::Timeout);
        assert_eq!(
            server.push(&put("a", b"x", None)),
            PushOutcome::Failure(TransportFailure::Timeout)
        );
        assert_eq!(server.body(&id), Some(b"x".to_vec()));
    }
}
