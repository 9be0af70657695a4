//! Serialized read-modify-write access to a record store.

use crate::error::{SyncError, SyncResult};
use crate::transition::{self, Event, Next, Rejection};
use offsync_protocol::{RecordId, StateTag};
use offsync_storage::{RecordStore, StoredRecord};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// What a mutation does to the stored record.
pub(crate) enum Write {
    /// Leave the record untouched.
    Keep,
    /// Replace the record.
    Put(StoredRecord),
    /// Remove the record.
    Delete,
}

impl Write {
    /// A put, or a delete when the record was destroyed.
    pub(crate) fn from_record(record: Option<StoredRecord>) -> Self {
        match record {
            Some(record) => Write::Put(record),
            None => Write::Delete,
        }
    }
}

/// A record store shared by the tracker, the session and the conflict
/// surface.
///
/// Every state change runs under one commit lock, so a local edit and a
/// push outcome for the same record can never interleave between their
/// read and their write.
pub(crate) struct Ledger<S> {
    store: Arc<S>,
    commit: Mutex<()>,
}

impl<S: RecordStore> Ledger<S> {
    pub(crate) fn new(store: Arc<S>) -> Self {
        Self {
            store,
            commit: Mutex::new(()),
        }
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Reads a record outside the commit lock.
    pub(crate) fn get(&self, id: &RecordId) -> SyncResult<Option<StoredRecord>> {
        Ok(self.store.get(id)?)
    }

    /// Reads `id`, lets `f` decide the write, and persists it before
    /// returning.
    pub(crate) fn mutate<R>(
        &self,
        id: &RecordId,
        f: impl FnOnce(Option<StoredRecord>) -> SyncResult<(Write, R)>,
    ) -> SyncResult<R> {
        let _guard = self.commit.lock();
        let current = self.store.get(id)?;
        let (write, out) = f(current)?;
        match write {
            Write::Keep => {}
            Write::Put(record) => self.store.put(id, &record)?,
            Write::Delete => self.store.delete(id)?,
        }
        Ok(out)
    }

    /// Excludes a record from automatic processing.
    pub(crate) fn quarantine(&self, id: &RecordId, reason: &str) -> SyncResult<()> {
        warn!(record = %id, reason, "quarantining record");
        self.mutate(id, |current| {
            Ok(match current {
                Some(mut record) => {
                    record.quarantine = Some(reason.to_string());
                    (Write::Put(record), ())
                }
                None => (Write::Keep, ()),
            })
        })
    }

    /// Demotes every in-flight record back to its pending state and folds in
    /// any edit queued behind it. Returns the number of records demoted.
    pub(crate) fn recover(&self) -> SyncResult<u64> {
        let in_flight = self.store.scan(&|state| state.is_syncing())?;
        let mut recovered = 0;
        for id in in_flight {
            let demoted = self.mutate(&id, |current| {
                let Some(mut record) = current else {
                    return Ok((Write::Keep, false));
                };
                if !record.state.is_syncing() {
                    return Ok((Write::Keep, false));
                }
                let full = std::mem::take(&mut record.push_full);
                let record = step(&id, record, Event::PushFailed { full })?;
                let record = match record {
                    Some(mut record) => match record.pending.take() {
                        Some(edit) => crate::tracker::apply_edit(&id, record, edit)?,
                        None => Some(record),
                    },
                    None => None,
                };
                Ok((Write::from_record(record), true))
            })?;
            if demoted {
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

/// Maps a table refusal to the error callers see.
pub(crate) fn rejection(id: &RecordId, from: StateTag, event: Event, why: Rejection) -> SyncError {
    match why {
        Rejection::ConflictPending => SyncError::ConflictPending { id: id.clone() },
        Rejection::NotFound => SyncError::RecordNotFound { id: id.clone() },
        Rejection::Invalid => SyncError::InvalidStateTransition {
            id: id.clone(),
            from,
            event: event.to_string(),
        },
    }
}

/// Applies `event` to `record`; `None` means the record is destroyed.
pub(crate) fn step(
    id: &RecordId,
    mut record: StoredRecord,
    event: Event,
) -> SyncResult<Option<StoredRecord>> {
    match transition::apply(record.state, event) {
        Ok(Next::To(state)) => {
            record.state = state;
            Ok(Some(record))
        }
        Ok(Next::Destroy) => Ok(None),
        Err(why) => Err(rejection(id, record.state, event, why)),
    }
}

/// Applies an event that must keep the record in the store.
pub(crate) fn step_kept(id: &RecordId, record: StoredRecord, event: Event) -> SyncResult<StoredRecord> {
    let from = record.state;
    step(id, record, event)?.ok_or_else(|| SyncError::InvalidStateTransition {
        id: id.clone(),
        from,
        event: event.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::Revision;
    use offsync_storage::{MemoryRecordStore, PendingEdit};

    fn ledger() -> Ledger<MemoryRecordStore> {
        Ledger::new(Arc::new(MemoryRecordStore::new()))
    }

    #[test]
    fn mutate_persists_the_decided_write() {
        let ledger = ledger();
        let id = RecordId::new("a");

        ledger
            .mutate(&id, |current| {
                assert!(current.is_none());
                Ok((Write::Put(StoredRecord::new(b"x".to_vec(), StateTag::Dirty)), ()))
            })
            .unwrap();
        assert_eq!(ledger.get(&id).unwrap().unwrap().state, StateTag::Dirty);

        ledger.mutate(&id, |_| Ok((Write::Delete, ()))).unwrap();
        assert!(ledger.get(&id).unwrap().is_none());
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let ledger = ledger();
        let id = RecordId::new("a");
        let result: SyncResult<()> = ledger.mutate(&id, |_| Err(SyncError::Cancelled));
        assert!(result.is_err());
        assert!(ledger.get(&id).unwrap().is_none());
    }

    #[test]
    fn recover_demotes_in_flight_records() {
        let ledger = ledger();
        let mut update = StoredRecord::new(b"u".to_vec(), StateTag::Syncing)
            .with_revision(Revision::new("r1"));
        update.push_full = true;
        let delete = StoredRecord::new(b"d".to_vec(), StateTag::SyncingDelete)
            .with_revision(Revision::new("r2"));
        let clean = StoredRecord::synced(b"c".to_vec(), Revision::new("r3"));
        ledger.store().put(&RecordId::new("u"), &update).unwrap();
        ledger.store().put(&RecordId::new("d"), &delete).unwrap();
        ledger.store().put(&RecordId::new("c"), &clean).unwrap();

        assert_eq!(ledger.recover().unwrap(), 2);

        let update = ledger.get(&RecordId::new("u")).unwrap().unwrap();
        assert_eq!(update.state, StateTag::DirtyFull);
        assert!(!update.push_full);
        let delete = ledger.get(&RecordId::new("d")).unwrap().unwrap();
        assert_eq!(delete.state, StateTag::Deleted);
        let clean = ledger.get(&RecordId::new("c")).unwrap().unwrap();
        assert_eq!(clean.state, StateTag::Synced);

        assert_eq!(ledger.recover().unwrap(), 0);
    }

    #[test]
    fn recover_applies_queued_edits() {
        let ledger = ledger();
        let mut record = StoredRecord::new(b"v1".to_vec(), StateTag::SyncingDelete)
            .with_revision(Revision::new("r1"));
        record.pending = Some(PendingEdit::Update {
            body: b"v2".to_vec(),
            full: false,
        });
        ledger.store().put(&RecordId::new("a"), &record).unwrap();

        ledger.recover().unwrap();

        let record = ledger.get(&RecordId::new("a")).unwrap().unwrap();
        assert_eq!(record.state, StateTag::DirtyFull);
        assert_eq!(record.body.as_deref(), Some(&b"v2"[..]));
        assert!(record.pending.is_none());
    }

    #[test]
    fn quarantine_marks_the_record() {
        let ledger = ledger();
        let id = RecordId::new("a");
        ledger
            .store()
            .put(&id, &StoredRecord::new(b"x".to_vec(), StateTag::Dirty))
            .unwrap();
        ledger.quarantine(&id, "bad transition").unwrap();
        assert!(ledger.get(&id).unwrap().unwrap().is_quarantined());

        // Missing records are ignored.
        ledger.quarantine(&RecordId::new("zz"), "gone").unwrap();
    }
}
