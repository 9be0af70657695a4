//! Error types for the sync engine.

use offsync_protocol::{RecordId, StateTag, TransportFailure};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network failure; the record stays pending and the next pass retries it.
    #[error("transient network error: {message}")]
    TransientNetwork {
        /// Error message.
        message: String,
    },

    /// The server holds a newer version of the record.
    ///
    /// Expected during a pass: the session routes it to the resolver and
    /// never reports it as a pass failure.
    #[error("version conflict on record {id}")]
    VersionConflict {
        /// Conflicted record.
        id: RecordId,
    },

    /// Local edit attempted while an unresolved conflict exists.
    #[error("record {id} has an unresolved conflict; resolve it before editing")]
    ConflictPending {
        /// Conflicted record.
        id: RecordId,
    },

    /// A transition was attempted from a state where it is undefined.
    ///
    /// Indicates storage corruption or a caller bypassing the tracker. The
    /// record is quarantined until released.
    #[error("invalid state transition for record {id}: {event} from {from}")]
    InvalidStateTransition {
        /// Affected record.
        id: RecordId,
        /// State the record was in.
        from: StateTag,
        /// Event that has no transition from `from`.
        event: String,
    },

    /// The server permanently refused a push.
    #[error("server rejected record {id}: {failure}")]
    Rejected {
        /// Rejected record.
        id: RecordId,
        /// Failure reported by the transport.
        failure: TransportFailure,
    },

    /// The record does not exist locally.
    #[error("record not found: {id}")]
    RecordNotFound {
        /// Missing record.
        id: RecordId,
    },

    /// A create targeted an id that already exists.
    #[error("record already exists: {id}")]
    AlreadyExists {
        /// Existing record.
        id: RecordId,
    },

    /// Manual resolution requested for a record that is not conflicted.
    #[error("record {id} is not conflicted (state {state})")]
    NotConflicted {
        /// Record.
        id: RecordId,
        /// Its current state.
        state: StateTag,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] offsync_storage::StorageError),

    /// Protocol or codec error.
    #[error("protocol error: {0}")]
    Protocol(#[from] offsync_protocol::ProtocolError),

    /// Another pass is running.
    #[error("a sync pass is already in progress")]
    PassInProgress,

    /// The policy cannot change while a pass runs.
    #[error("conflict policy cannot change while a sync pass is in progress")]
    PolicyLocked,

    /// A push worker panicked while handling a record.
    #[error("push worker panicked on record {id}: {message}")]
    WorkerPanicked {
        /// Record being pushed.
        id: RecordId,
        /// Panic payload.
        message: String,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a transient network error from a transport failure.
    pub fn transient(failure: &TransportFailure) -> Self {
        Self::TransientNetwork {
            message: failure.to_string(),
        }
    }

    /// Returns true if this error can be retried by a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork { .. } | SyncError::PassInProgress | SyncError::Cancelled
        )
    }

    /// Returns the record this error concerns, if any.
    pub fn record(&self) -> Option<&RecordId> {
        match self {
            SyncError::ConflictPending { id }
            | SyncError::VersionConflict { id }
            | SyncError::InvalidStateTransition { id, .. }
            | SyncError::Rejected { id, .. }
            | SyncError::RecordNotFound { id }
            | SyncError::AlreadyExists { id }
            | SyncError::NotConflicted { id, .. }
            | SyncError::WorkerPanicked { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transient(&TransportFailure::Timeout).is_retryable());
        assert!(SyncError::PassInProgress.is_retryable());
        assert!(!SyncError::ConflictPending {
            id: RecordId::new("a")
        }
        .is_retryable());
        assert!(!SyncError::PolicyLocked.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::InvalidStateTransition {
            id: RecordId::new("n1"),
            from: StateTag::Synced,
            event: "PushAccepted".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition for record n1: PushAccepted from synced"
        );
        assert_eq!(err.record(), Some(&RecordId::new("n1")));

        let err = SyncError::transient(&TransportFailure::Server(503));
        assert!(err.to_string().contains("503"));
        assert_eq!(err.record(), None);
    }
}
