//! Local create/update/delete tracking.

use crate::error::{SyncError, SyncResult};
use crate::ledger::{step, Ledger, Write};
use crate::resolver::ConflictResolver;
use crate::transition::Event;
use offsync_protocol::{Body, ConflictPolicy, RecordId, StateTag};
use offsync_storage::{PendingEdit, RecordStore, StoredRecord};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Translates local edits into state transitions.
///
/// The tracker never touches the network. Each call is durable in the
/// record store before it returns. Edits to a record whose push is in flight
/// are queued on the record and folded in once the push settles.
pub struct ChangeTracker<S> {
    ledger: Arc<Ledger<S>>,
    policy: Arc<RwLock<ConflictPolicy>>,
}

impl<S: RecordStore> ChangeTracker<S> {
    /// Creates a tracker over a store with a fixed policy.
    ///
    /// When a [`SyncSession`](crate::SyncSession) runs over the same store,
    /// use [`SyncSession::tracker`](crate::SyncSession::tracker) instead so
    /// both share one commit lock and policy.
    pub fn new(store: Arc<S>, policy: ConflictPolicy) -> Self {
        Self {
            ledger: Arc::new(Ledger::new(store)),
            policy: Arc::new(RwLock::new(policy)),
        }
    }

    pub(crate) fn from_parts(ledger: Arc<Ledger<S>>, policy: Arc<RwLock<ConflictPolicy>>) -> Self {
        Self { ledger, policy }
    }

    /// Creates a record under a freshly generated id.
    pub fn create_new(&self, body: Body) -> SyncResult<RecordId> {
        let id = RecordId::generate();
        self.create(&id, body, false)?;
        Ok(id)
    }

    /// Creates a record.
    ///
    /// A record only known as deleted is re-created as a full overwrite.
    pub fn create(&self, id: &RecordId, body: Body, full: bool) -> SyncResult<StateTag> {
        self.ledger.mutate(id, |current| {
            let Some(record) = current else {
                let state = if full {
                    StateTag::DirtyFull
                } else {
                    StateTag::Dirty
                };
                debug!(record = %id, ?state, "record created");
                return Ok((Write::Put(StoredRecord::new(body, state)), state));
            };

            if !is_logically_deleted(&record) {
                return Err(SyncError::AlreadyExists { id: id.clone() });
            }
            if record.state.is_syncing() {
                let record = queue(record, PendingEdit::Update { body, full: true });
                let state = record.state;
                return Ok((Write::Put(record), state));
            }

            let mut record = step(id, record, Event::LocalCreate)?
                .ok_or_else(|| SyncError::AlreadyExists { id: id.clone() })?;
            record.body = Some(body);
            debug!(record = %id, state = ?record.state, "record re-created");
            let state = record.state;
            Ok((Write::Put(record), state))
        })
    }

    /// Updates a record's body.
    ///
    /// A `full` update overwrites the whole document server-side; a plain
    /// update never downgrades a pending full overwrite.
    pub fn update(&self, id: &RecordId, body: Body, full: bool) -> SyncResult<StateTag> {
        self.ledger.mutate(id, |current| {
            let record = current.ok_or_else(|| SyncError::RecordNotFound { id: id.clone() })?;
            if is_logically_deleted(&record) {
                return Err(SyncError::RecordNotFound { id: id.clone() });
            }
            if record.state.is_syncing() {
                debug!(record = %id, "push in flight, queueing update");
                let record = queue(record, PendingEdit::Update { body, full });
                let state = record.state;
                return Ok((Write::Put(record), state));
            }

            let mut record = step(id, record, Event::LocalUpdate { full })?
                .ok_or_else(|| SyncError::RecordNotFound { id: id.clone() })?;
            record.body = Some(body);
            let state = record.state;
            Ok((Write::Put(record), state))
        })
    }

    /// Deletes a record.
    ///
    /// Under an automatic policy a pending conflict is resolved first; under
    /// [`ConflictPolicy::Manual`] the call fails with
    /// [`SyncError::ConflictPending`].
    pub fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let policy = *self.policy.read();
        self.ledger.mutate(id, |current| {
            let record = current.ok_or_else(|| SyncError::RecordNotFound { id: id.clone() })?;
            if record.state.is_syncing() {
                if is_logically_deleted(&record) {
                    return Ok((Write::Keep, ()));
                }
                debug!(record = %id, "push in flight, queueing delete");
                return Ok((Write::Put(queue(record, PendingEdit::Delete)), ()));
            }

            let record = if record.state.is_conflicted() && policy.auto_resolves() {
                match resolve_now(id, record, policy)? {
                    Some(record) => record,
                    None => return Ok((Write::Delete, ())),
                }
            } else {
                record
            };

            let record = apply_edit(id, record, PendingEdit::Delete)?;
            Ok((Write::from_record(record), ()))
        })
    }

    /// Returns the locally visible body, or `None` if the record is missing
    /// or deleted.
    pub fn read(&self, id: &RecordId) -> SyncResult<Option<Body>> {
        Ok(self
            .ledger
            .get(id)?
            .filter(|record| !is_logically_deleted(record))
            .and_then(|record| match record.pending {
                Some(PendingEdit::Update { body, .. }) => Some(body),
                _ => record.body,
            }))
    }
}

/// Returns true if the record's latest local intent is deletion.
fn is_logically_deleted(record: &StoredRecord) -> bool {
    match &record.pending {
        Some(PendingEdit::Delete) => true,
        Some(PendingEdit::Update { .. }) => false,
        None => matches!(
            record.state,
            StateTag::Deleted | StateTag::SyncingDelete
        ),
    }
}

fn queue(mut record: StoredRecord, edit: PendingEdit) -> StoredRecord {
    record.pending = Some(match record.pending.take() {
        Some(earlier) => earlier.then(edit),
        None => edit,
    });
    record
}

/// Settles a conflicted record under an automatic policy without pushing.
fn resolve_now(
    id: &RecordId,
    record: StoredRecord,
    policy: ConflictPolicy,
) -> SyncResult<Option<StoredRecord>> {
    let invalid = || SyncError::InvalidStateTransition {
        id: id.clone(),
        from: record.state,
        event: Event::LocalDelete.to_string(),
    };
    let server = record.server.clone().ok_or_else(invalid)?;
    let decision = ConflictResolver::resolve_record(&record, &server, policy).ok_or_else(invalid)?;
    debug!(record = %id, %policy, ?decision, "resolving conflict before delete");
    decision.commit(id, record, &server)
}

/// Applies a local edit to a record that is not in flight.
///
/// An update over a deleted record re-creates it. Returns `None` if the
/// record is destroyed.
pub(crate) fn apply_edit(
    id: &RecordId,
    record: StoredRecord,
    edit: PendingEdit,
) -> SyncResult<Option<StoredRecord>> {
    match edit {
        PendingEdit::Update { body, full } => {
            let event = if record.state == StateTag::Deleted {
                Event::LocalCreate
            } else {
                Event::LocalUpdate { full }
            };
            Ok(step(id, record, event)?.map(|mut record| {
                record.body = Some(body);
                record
            }))
        }
        PendingEdit::Delete => step(id, record, Event::LocalDelete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::Revision;
    use offsync_storage::{MemoryRecordStore, ServerSnapshot};

    fn tracker(policy: ConflictPolicy) -> (Arc<MemoryRecordStore>, ChangeTracker<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (Arc::clone(&store), ChangeTracker::new(store, policy))
    }

    fn put(store: &MemoryRecordStore, id: &str, record: StoredRecord) {
        store.put(&RecordId::new(id), &record).unwrap();
    }

    fn state(store: &MemoryRecordStore, id: &str) -> Option<StateTag> {
        store
            .get(&RecordId::new(id))
            .unwrap()
            .map(|record| record.state)
    }

    #[test]
    fn create_is_dirty_without_revision() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let id = RecordId::new("n1");

        assert_eq!(tracker.create(&id, b"A".to_vec(), false).unwrap(), StateTag::Dirty);
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.revision, None);
        assert_eq!(record.body.as_deref(), Some(&b"A"[..]));

        assert!(matches!(
            tracker.create(&id, b"B".to_vec(), false),
            Err(SyncError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn create_new_generates_ids() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let a = tracker.create_new(b"a".to_vec()).unwrap();
        let b = tracker.create_new(b"b".to_vec()).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn create_over_deleted_recreates_in_full() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        put(
            &store,
            "n1",
            StoredRecord::new(b"old".to_vec(), StateTag::Deleted).with_revision(Revision::new("4")),
        );

        let state = tracker
            .create(&RecordId::new("n1"), b"new".to_vec(), false)
            .unwrap();
        assert_eq!(state, StateTag::DirtyFull);
        let record = store.get(&RecordId::new("n1")).unwrap().unwrap();
        assert_eq!(record.revision, Some(Revision::new("4")));
    }

    #[test]
    fn update_promotes_but_never_downgrades() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let id = RecordId::new("n1");
        put(&store, "n1", StoredRecord::synced(b"A".to_vec(), Revision::new("1")));

        assert_eq!(tracker.update(&id, b"B".to_vec(), false).unwrap(), StateTag::Dirty);
        assert_eq!(tracker.update(&id, b"C".to_vec(), true).unwrap(), StateTag::DirtyFull);
        assert_eq!(tracker.update(&id, b"D".to_vec(), false).unwrap(), StateTag::DirtyFull);
        assert_eq!(tracker.read(&id).unwrap(), Some(b"D".to_vec()));
    }

    #[test]
    fn update_of_missing_or_deleted_is_not_found() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        assert!(matches!(
            tracker.update(&RecordId::new("nope"), b"x".to_vec(), false),
            Err(SyncError::RecordNotFound { .. })
        ));

        put(
            &store,
            "gone",
            StoredRecord::new(b"x".to_vec(), StateTag::Deleted).with_revision(Revision::new("1")),
        );
        assert!(matches!(
            tracker.update(&RecordId::new("gone"), b"x".to_vec(), false),
            Err(SyncError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn conflicted_records_reject_edits_under_manual() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let mut record =
            StoredRecord::new(b"mine".to_vec(), StateTag::Conflicted).with_revision(Revision::new("1"));
        record.server = Some(ServerSnapshot {
            body: Some(b"theirs".to_vec()),
            revision: Some(Revision::new("2")),
        });
        put(&store, "n1", record);
        let id = RecordId::new("n1");

        assert!(matches!(
            tracker.update(&id, b"again".to_vec(), false),
            Err(SyncError::ConflictPending { .. })
        ));
        assert!(matches!(
            tracker.delete(&id),
            Err(SyncError::ConflictPending { .. })
        ));
        assert_eq!(state(&store, "n1"), Some(StateTag::Conflicted));
    }

    #[test]
    fn delete_over_conflict_resolves_first_under_auto_policy() {
        let (store, tracker) = tracker(ConflictPolicy::ServerWins);
        let mut record =
            StoredRecord::new(b"mine".to_vec(), StateTag::Conflicted).with_revision(Revision::new("1"));
        record.server = Some(ServerSnapshot {
            body: Some(b"theirs".to_vec()),
            revision: Some(Revision::new("2")),
        });
        put(&store, "n1", record);

        tracker.delete(&RecordId::new("n1")).unwrap();

        let record = store.get(&RecordId::new("n1")).unwrap().unwrap();
        assert_eq!(record.state, StateTag::Deleted);
        assert_eq!(record.revision, Some(Revision::new("2")));
        assert!(record.server.is_none());
    }

    #[test]
    fn delete_of_unsynced_record_keeps_a_tombstone() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let id = RecordId::new("n1");
        tracker.create(&id, b"draft".to_vec(), false).unwrap();
        tracker.delete(&id).unwrap();

        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.state, StateTag::Deleted);
        assert_eq!(record.revision, None);
        assert_eq!(tracker.read(&id).unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let id = RecordId::new("n1");
        put(&store, "n1", StoredRecord::synced(b"A".to_vec(), Revision::new("1")));

        tracker.delete(&id).unwrap();
        tracker.delete(&id).unwrap();
        assert_eq!(state(&store, "n1"), Some(StateTag::Deleted));
        assert_eq!(tracker.read(&id).unwrap(), None);
    }

    #[test]
    fn edits_in_flight_are_queued() {
        let (store, tracker) = tracker(ConflictPolicy::Manual);
        let id = RecordId::new("n1");
        put(
            &store,
            "n1",
            StoredRecord::new(b"A".to_vec(), StateTag::Syncing).with_revision(Revision::new("1")),
        );

        assert_eq!(tracker.update(&id, b"B".to_vec(), false).unwrap(), StateTag::Syncing);
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some(&b"A"[..]));
        assert_eq!(
            record.pending,
            Some(PendingEdit::Update {
                body: b"B".to_vec(),
                full: false
            })
        );
        assert_eq!(tracker.read(&id).unwrap(), Some(b"B".to_vec()));

        tracker.delete(&id).unwrap();
        assert_eq!(
            store.get(&id).unwrap().unwrap().pending,
            Some(PendingEdit::Delete)
        );
        assert!(matches!(
            tracker.update(&id, b"C".to_vec(), false),
            Err(SyncError::RecordNotFound { .. })
        ));

        tracker.create(&id, b"D".to_vec(), false).unwrap();
        assert_eq!(
            store.get(&id).unwrap().unwrap().pending,
            Some(PendingEdit::Update {
                body: b"D".to_vec(),
                full: true
            })
        );
    }

    #[test]
    fn apply_edit_recreates_deleted_records() {
        let id = RecordId::new("n1");
        let record =
            StoredRecord::new(b"A".to_vec(), StateTag::Deleted).with_revision(Revision::new("3"));
        let record = apply_edit(
            &id,
            record,
            PendingEdit::Update {
                body: b"B".to_vec(),
                full: false,
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.state, StateTag::DirtyFull);
        assert_eq!(record.body.as_deref(), Some(&b"B"[..]));
    }
}
