//! The per-record transition table.
//!
//! Every state change a record undergoes is an [`Event`] applied to its
//! current [`StateTag`]. Combinations missing from the table are rejected
//! instead of guessed at; callers turn a [`Rejection`] into the matching
//! [`SyncError`](crate::SyncError).

use offsync_protocol::StateTag;
use std::fmt;

use StateTag::*;

/// Something that happens to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Local create over a record known only as deleted.
    LocalCreate,
    /// Local update.
    LocalUpdate {
        /// Whole-document overwrite.
        full: bool,
    },
    /// Local delete.
    ///
    /// Always leaves a `Deleted` tag behind, even for a record the server
    /// never acknowledged: an earlier push may have landed without its
    /// answer arriving, so only the server can confirm the record is gone.
    LocalDelete,
    /// A push is about to be sent.
    PushStarted,
    /// The server accepted the push.
    PushAccepted,
    /// The server reported a version conflict.
    PushConflicted {
        /// The in-flight push was a whole-document overwrite.
        full: bool,
    },
    /// The push failed, or the pass ended with the push unsettled.
    PushFailed {
        /// The in-flight push was a whole-document overwrite.
        full: bool,
    },
    /// A pulled server change lands on a clean record.
    RemoteApplied {
        /// The server deleted the record.
        deleted: bool,
    },
    /// A pulled server change lands on a record with local changes.
    ServerDiverged,
    /// A conflict settles on the server side.
    TakeServer {
        /// The server deleted the record.
        deleted: bool,
    },
    /// A conflict settles on the local side, which must be re-pushed.
    TakeLocal {
        /// The re-push overwrites the whole document.
        full: bool,
    },
    /// A manual resolution picked a body different from the server's.
    ChooseBody,
    /// A manual resolution picked deletion.
    ChooseDelete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::LocalCreate => "local create",
            Event::LocalUpdate { .. } => "local update",
            Event::LocalDelete => "local delete",
            Event::PushStarted => "push started",
            Event::PushAccepted => "push accepted",
            Event::PushConflicted { .. } => "push conflicted",
            Event::PushFailed { .. } => "push failed",
            Event::RemoteApplied { .. } => "remote applied",
            Event::ServerDiverged => "server diverged",
            Event::TakeServer { .. } => "take server",
            Event::TakeLocal { .. } => "take local",
            Event::ChooseBody => "choose body",
            Event::ChooseDelete => "choose delete",
        };
        f.write_str(name)
    }
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// The record moves to this state.
    To(StateTag),
    /// The record leaves the store.
    Destroy,
}

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Local edit on a conflicted record.
    ConflictPending,
    /// Local edit on a record only known as deleted.
    NotFound,
    /// The table has no entry for this combination.
    Invalid,
}

fn dirty(full: bool) -> StateTag {
    if full {
        DirtyFull
    } else {
        Dirty
    }
}

fn conflicted(full: bool) -> StateTag {
    if full {
        ConflictedFull
    } else {
        Conflicted
    }
}

/// Applies `event` to a record in state `from`.
pub fn apply(from: StateTag, event: Event) -> Result<Next, Rejection> {
    use Next::{Destroy, To};

    let next = match (event, from) {
        (Event::LocalCreate, Deleted) => To(DirtyFull),

        (Event::LocalUpdate { full }, NoState | Synced | Dirty) => To(dirty(full)),
        (Event::LocalUpdate { .. }, DirtyFull) => To(DirtyFull),
        // Queued as a pending edit; the state itself does not move.
        (Event::LocalUpdate { .. }, Syncing | SyncingDelete) => To(from),
        (Event::LocalUpdate { .. }, Deleted) => return Err(Rejection::NotFound),

        (Event::LocalDelete, NoState | Synced | Dirty | DirtyFull) => To(Deleted),
        (Event::LocalDelete, Deleted | Syncing | SyncingDelete) => To(from),

        (Event::LocalUpdate { .. } | Event::LocalDelete, s) if s.is_conflicted() => {
            return Err(Rejection::ConflictPending)
        }

        (Event::PushStarted, Dirty | DirtyFull) => To(Syncing),
        (Event::PushStarted, Deleted) => To(SyncingDelete),

        (Event::PushAccepted, Syncing) => To(Synced),
        (Event::PushAccepted, SyncingDelete) => Destroy,

        (Event::PushConflicted { full }, Syncing) => To(conflicted(full)),
        (Event::PushConflicted { .. }, SyncingDelete) => To(ConflictedDelete),

        (Event::PushFailed { full }, Syncing) => To(dirty(full)),
        (Event::PushFailed { .. }, SyncingDelete) => To(Deleted),

        (Event::RemoteApplied { deleted }, NoState | Synced) => {
            if deleted {
                Destroy
            } else {
                To(Synced)
            }
        }

        (Event::ServerDiverged, Dirty) => To(Conflicted),
        (Event::ServerDiverged, DirtyFull) => To(ConflictedFull),
        (Event::ServerDiverged, Deleted) => To(ConflictedDelete),
        (Event::ServerDiverged, s) if s.is_conflicted() => To(s),

        (Event::TakeServer { deleted }, Dirty | DirtyFull | Deleted)
        | (Event::TakeServer { deleted }, Conflicted | ConflictedFull | ConflictedDelete) => {
            if deleted {
                Destroy
            } else {
                To(Synced)
            }
        }

        (Event::TakeLocal { full }, Dirty | Conflicted) => To(dirty(full)),
        (Event::TakeLocal { .. }, DirtyFull | ConflictedFull) => To(DirtyFull),
        (Event::TakeLocal { .. }, Deleted | ConflictedDelete) => To(Deleted),

        (Event::ChooseBody, s) if s.is_conflicted() => To(DirtyFull),
        (Event::ChooseDelete, s) if s.is_conflicted() => To(Deleted),

        _ => return Err(Rejection::Invalid),
    };
    Ok(next)
}
