//! Messages exchanged with the sync transport.

use crate::ids::{Body, Cursor, RecordId, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a record is pushed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    /// Field-level update (PATCH semantics).
    Patch,
    /// Whole-document overwrite or create (PUT semantics).
    Put,
    /// Deletion.
    Delete,
}

/// A single record push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Record being pushed.
    pub id: RecordId,
    /// Push semantics.
    pub kind: PushKind,
    /// Body to write; `None` for deletions.
    pub body: Option<Body>,
    /// Revision the local edit was based on; `None` for a create.
    pub base_revision: Option<Revision>,
}

impl PushRequest {
    /// Returns true if this push creates the record server-side.
    pub fn is_create(&self) -> bool {
        self.base_revision.is_none() && self.kind != PushKind::Delete
    }
}

/// Transport-level failure of a push or pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportFailure {
    /// The request timed out.
    Timeout,
    /// No connection to the server.
    Disconnected,
    /// The server failed (5xx).
    Server(u16),
    /// The record does not exist server-side (404/410).
    NotFound,
    /// The server refused the request (other 4xx).
    Rejected(u16),
}

impl TransportFailure {
    /// Returns true if the failure says nothing about the record and the
    /// request can simply be retried on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportFailure::Timeout | TransportFailure::Disconnected | TransportFailure::Server(_)
        )
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => f.write_str("request timed out"),
            TransportFailure::Disconnected => f.write_str("not connected to server"),
            TransportFailure::Server(status) => write!(f, "server error (status {status})"),
            TransportFailure::NotFound => f.write_str("record not found on server"),
            TransportFailure::Rejected(status) => write!(f, "request rejected (status {status})"),
        }
    }
}

/// Result of a single push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// The server applied the push and issued a new revision.
    Accepted(Revision),
    /// The server holds a newer version; `server_body` is `None` if the
    /// record was deleted server-side.
    VersionConflict {
        /// Server's current body.
        server_body: Option<Body>,
        /// Server's current revision.
        server_revision: Option<Revision>,
    },
    /// The push did not complete.
    Failure(TransportFailure),
}

/// Request for server-side changes since a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Last checkpoint; `None` pulls from the beginning.
    pub cursor: Option<Cursor>,
    /// Maximum number of changes to return.
    pub limit: u32,
}

/// One server-side change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Changed record.
    pub id: RecordId,
    /// New body; `None` when the record was deleted.
    pub body: Option<Body>,
    /// Revision after the change.
    pub revision: Revision,
}

impl RemoteChange {
    /// Creates an update change.
    pub fn updated(id: RecordId, body: Body, revision: Revision) -> Self {
        Self {
            id,
            body: Some(body),
            revision,
        }
    }

    /// Creates a deletion change.
    pub fn deleted(id: RecordId, revision: Revision) -> Self {
        Self {
            id,
            body: None,
            revision,
        }
    }

    /// Returns true if this change deleted the record.
    pub fn is_deleted(&self) -> bool {
        self.body.is_none()
    }
}

/// A batch of server-side changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Changes in server order.
    pub changes: Vec<RemoteChange>,
    /// Checkpoint to resume from.
    pub cursor: Cursor,
    /// Whether more changes are available.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(changes: Vec<RemoteChange>, cursor: Cursor, has_more: bool) -> Self {
        Self {
            changes,
            cursor,
            has_more,
        }
    }
}
