//! The per-record layout a store persists.

use offsync_protocol::{Body, Revision, StateTag};
use serde::{Deserialize, Serialize};

/// Everything persisted for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Local body; `None` only when the body is unknown.
    pub body: Option<Body>,
    /// Lifecycle state.
    pub state: StateTag,
    /// Last known server revision; `None` if never acknowledged by the server.
    pub revision: Option<Revision>,
    /// Whether the in-flight push is a whole-document overwrite.
    ///
    /// Only meaningful while the state is `Syncing`; recovery uses it to
    /// demote back to `DirtyFull` rather than `Dirty`.
    #[serde(default)]
    pub push_full: bool,
    /// Local edit queued while a push was in flight.
    #[serde(default)]
    pub pending: Option<PendingEdit>,
    /// The conflicting server side, kept while the record is conflicted.
    #[serde(default)]
    pub server: Option<ServerSnapshot>,
    /// Why the record was excluded from automatic processing.
    #[serde(default)]
    pub quarantine: Option<String>,
}

impl StoredRecord {
    /// Creates a record with a body and state and no server history.
    pub fn new(body: Body, state: StateTag) -> Self {
        Self {
            body: Some(body),
            state,
            revision: None,
            push_full: false,
            pending: None,
            server: None,
            quarantine: None,
        }
    }

    /// Creates a record that matches the given server version.
    pub fn synced(body: Body, revision: Revision) -> Self {
        Self {
            revision: Some(revision),
            ..Self::new(body, StateTag::Synced)
        }
    }

    /// Sets the revision.
    #[must_use]
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Returns true if the record is excluded from automatic processing.
    pub fn is_quarantined(&self) -> bool {
        self.quarantine.is_some()
    }
}

/// A local edit that arrived while the record was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingEdit {
    /// Update with the given body.
    Update {
        /// New body.
        body: Body,
        /// Whole-document overwrite.
        full: bool,
    },
    /// Deletion.
    Delete,
}

impl PendingEdit {
    /// Folds a newer edit into this one.
    ///
    /// The latest body wins and a full overwrite is never downgraded. A
    /// delete supersedes any update; an update after a delete re-creates the
    /// record and is therefore full.
    #[must_use]
    pub fn then(self, next: PendingEdit) -> PendingEdit {
        match (self, next) {
            (_, PendingEdit::Delete) => PendingEdit::Delete,
            (PendingEdit::Update { full: was_full, .. }, PendingEdit::Update { body, full }) => {
                PendingEdit::Update {
                    body,
                    full: was_full || full,
                }
            }
            (PendingEdit::Delete, PendingEdit::Update { body, .. }) => {
                PendingEdit::Update { body, full: true }
            }
        }
    }
}

/// The server side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    /// Server body; `None` if the server deleted the record.
    pub body: Option<Body>,
    /// Server revision at the time the conflict was detected.
    pub revision: Option<Revision>,
}

impl ServerSnapshot {
    /// Returns true if the server deleted the record.
    pub fn is_deleted(&self) -> bool {
        self.body.is_none()
    }
}
