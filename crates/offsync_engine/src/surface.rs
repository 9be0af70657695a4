//! Manual conflict resolution and state queries.

use crate::error::{SyncError, SyncResult};
use crate::ledger::{step, step_kept, Ledger, Write};
use crate::resolver::LocalIntent;
use crate::transition::Event;
use offsync_protocol::{Body, PublicState, RecordId, Revision, StateTag};
use offsync_storage::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Which local edit is in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A field-level update.
    Update,
    /// A whole-document overwrite.
    FullUpdate,
    /// A deletion.
    Delete,
}

impl From<LocalIntent> for ConflictKind {
    fn from(intent: LocalIntent) -> Self {
        match intent {
            LocalIntent::Update => ConflictKind::Update,
            LocalIntent::FullUpdate => ConflictKind::FullUpdate,
            LocalIntent::Delete => ConflictKind::Delete,
        }
    }
}

/// Which side of a conflict to keep.
enum Choice {
    Body(Option<Body>),
    Local,
    Server,
}

/// Both sides of an unresolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictView {
    /// Record.
    pub id: RecordId,
    /// What the local edit was.
    pub kind: ConflictKind,
    /// Local body; `None` for a local deletion.
    pub local_body: Option<Body>,
    /// Server body; `None` if the server deleted the record.
    pub server_body: Option<Body>,
    /// Server revision at detection time.
    pub server_revision: Option<Revision>,
}

/// Record counts by public state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    /// Records matching the server.
    pub synced: usize,
    /// Records with unpushed updates.
    pub dirty: usize,
    /// Records with unpushed deletions.
    pub deleted: usize,
    /// Records awaiting conflict resolution.
    pub conflicted: usize,
    /// Records excluded from automatic processing.
    pub quarantined: usize,
}

/// The application-facing view of conflicts and record states.
///
/// Internal states such as in-flight pushes are folded into the four
/// public classifications.
pub struct ConflictSurface<S> {
    ledger: Arc<Ledger<S>>,
}

impl<S: RecordStore> ConflictSurface<S> {
    /// Creates a surface over a store that no session is driving.
    pub fn new(store: Arc<S>) -> Self {
        Self::from_ledger(Arc::new(Ledger::new(store)))
    }

    pub(crate) fn from_ledger(ledger: Arc<Ledger<S>>) -> Self {
        Self { ledger }
    }

    /// Lists every unresolved conflict in store order.
    pub fn conflicts(&self) -> SyncResult<Vec<ConflictView>> {
        let ids = self.ledger.store().scan(&|state| state.is_conflicted())?;
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = self.conflict(&id)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// Returns the conflict held by one record, if any.
    pub fn conflict(&self, id: &RecordId) -> SyncResult<Option<ConflictView>> {
        let Some(record) = self.ledger.get(id)? else {
            return Ok(None);
        };
        if !record.state.is_conflicted() {
            return Ok(None);
        }
        let Some(intent) = LocalIntent::of(record.state) else {
            return Ok(None);
        };
        let (server_body, server_revision) = match record.server {
            Some(server) => (server.body, server.revision),
            None => (None, None),
        };
        Ok(Some(ConflictView {
            id: id.clone(),
            kind: intent.into(),
            local_body: match intent {
                LocalIntent::Delete => None,
                _ => record.body,
            },
            server_body,
            server_revision,
        }))
    }

    /// Settles a conflict with the application's choice.
    ///
    /// `chosen` is the body to keep, or `None` to delete. Picking the
    /// server's side settles immediately; anything else is committed against
    /// the server revision for the next pass to push. Returns the new state,
    /// or `None` if the record was destroyed.
    pub fn resolve_manual(&self, id: &RecordId, chosen: Option<Body>) -> SyncResult<Option<StateTag>> {
        self.settle(id, Choice::Body(chosen))
    }

    /// Settles a conflict in favour of the local side.
    pub fn take_local(&self, id: &RecordId) -> SyncResult<Option<StateTag>> {
        self.settle(id, Choice::Local)
    }

    /// Settles a conflict in favour of the server side.
    pub fn take_server(&self, id: &RecordId) -> SyncResult<Option<StateTag>> {
        self.settle(id, Choice::Server)
    }

    /// The chosen side is read under the commit lock.
    fn settle(&self, id: &RecordId, choice: Choice) -> SyncResult<Option<StateTag>> {
        let next = self.ledger.mutate(id, |current| {
            let record = current.ok_or_else(|| SyncError::RecordNotFound { id: id.clone() })?;
            if !record.state.is_conflicted() {
                return Err(SyncError::NotConflicted {
                    id: id.clone(),
                    state: record.state,
                });
            }
            let server = record
                .server
                .clone()
                .ok_or_else(|| SyncError::InvalidStateTransition {
                    id: id.clone(),
                    from: record.state,
                    event: Event::ChooseBody.to_string(),
                })?;

            let chosen = match choice {
                Choice::Body(body) => body,
                Choice::Local => match LocalIntent::of(record.state) {
                    Some(LocalIntent::Delete) => None,
                    _ => record.body.clone(),
                },
                Choice::Server => server.body.clone(),
            };

            let next = match (chosen, &server.body) {
                (Some(body), Some(server_body)) if &body == server_body => {
                    let mut record = step_kept(id, record, Event::TakeServer { deleted: false })?;
                    record.body = Some(body);
                    record.revision = server.revision.clone();
                    Some(record)
                }
                (None, None) => step(id, record, Event::TakeServer { deleted: true })?,
                (Some(body), _) => {
                    let mut record = step_kept(id, record, Event::ChooseBody)?;
                    record.body = Some(body);
                    // Against a deleted server copy the push re-creates it.
                    record.revision = if server.is_deleted() {
                        None
                    } else {
                        server.revision.clone()
                    };
                    Some(record)
                }
                (None, Some(_)) => {
                    let mut record = step_kept(id, record, Event::ChooseDelete)?;
                    record.revision = server.revision.clone();
                    Some(record)
                }
            };
            let next = next.map(|mut record| {
                record.server = None;
                record
            });
            let state = next.as_ref().map(|record| record.state);
            Ok((Write::from_record(next), state))
        })?;
        info!(record = %id, state = ?next, "conflict resolved manually");
        Ok(next)
    }

    /// Returns the public state of a record, or `None` if it does not exist.
    pub fn status(&self, id: &RecordId) -> SyncResult<Option<PublicState>> {
        Ok(self.ledger.get(id)?.map(|record| record.state.public()))
    }

    /// Counts records by public state.
    pub fn summary(&self) -> SyncResult<StateSummary> {
        let mut summary = StateSummary::default();
        for id in self.ledger.store().scan(&|_| true)? {
            let Some(record) = self.ledger.get(&id)? else {
                continue;
            };
            if record.is_quarantined() {
                summary.quarantined += 1;
            }
            match record.state.public() {
                PublicState::Synced => summary.synced += 1,
                PublicState::Dirty => summary.dirty += 1,
                PublicState::Deleted => summary.deleted += 1,
                PublicState::Conflicted => summary.conflicted += 1,
            }
        }
        Ok(summary)
    }

    /// Lists quarantined records with the reason each was excluded.
    pub fn quarantined(&self) -> SyncResult<Vec<(RecordId, String)>> {
        let mut out = Vec::new();
        for id in self.ledger.store().scan(&|_| true)? {
            if let Some(reason) = self.ledger.get(&id)?.and_then(|record| record.quarantine) {
                out.push((id, reason));
            }
        }
        Ok(out)
    }

    /// Returns a quarantined record to automatic processing.
    pub fn release(&self, id: &RecordId) -> SyncResult<()> {
        self.ledger.mutate(id, |current| {
            let mut record = current.ok_or_else(|| SyncError::RecordNotFound { id: id.clone() })?;
            if record.quarantine.take().is_none() {
                return Ok((Write::Keep, ()));
            }
            info!(record = %id, state = ?record.state, "record released from quarantine");
            Ok((Write::Put(record), ()))
        })
    }

    /// Demotes records a crashed process left in flight.
    ///
    /// Must not run while a pass over the same store is active; sessions
    /// call this themselves when they open.
    pub fn recover(&self) -> SyncResult<u64> {
        self.ledger.recover()
    }
}
