//! Policy-driven conflict resolution.
//!
//! The resolver is a pure function of the local side, the server side and
//! the policy. It decides; the session commits the decision and performs
//! any re-push.

use crate::error::SyncResult;
use crate::ledger::step;
use crate::transition::Event;
use offsync_protocol::{Body, ConflictPolicy, PushKind, RecordId, Revision, StateTag};
use offsync_storage::{ServerSnapshot, StoredRecord};

/// What the local side wanted to do with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalIntent {
    /// Field-level update.
    Update,
    /// Whole-document overwrite.
    FullUpdate,
    /// Deletion.
    Delete,
}

impl LocalIntent {
    /// Derives the intent from a record state.
    ///
    /// Returns `None` for states with no local change.
    pub fn of(state: StateTag) -> Option<Self> {
        match state {
            StateTag::Dirty | StateTag::Conflicted | StateTag::Syncing => Some(Self::Update),
            StateTag::DirtyFull | StateTag::ConflictedFull => Some(Self::FullUpdate),
            StateTag::Deleted | StateTag::SyncingDelete | StateTag::ConflictedDelete => {
                Some(Self::Delete)
            }
            StateTag::NoState | StateTag::Synced => None,
        }
    }

    fn deferred_state(self) -> StateTag {
        match self {
            Self::Update => StateTag::Conflicted,
            Self::FullUpdate => StateTag::ConflictedFull,
            Self::Delete => StateTag::ConflictedDelete,
        }
    }
}

/// The local side of a conflict.
#[derive(Debug, Clone, Copy)]
pub struct LocalSide<'a> {
    /// What the local edit was.
    pub intent: LocalIntent,
    /// Local body, if any.
    pub body: Option<&'a Body>,
}

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Leave the conflict for the application.
    Defer {
        /// Conflicted state to hold the record in.
        state: StateTag,
    },
    /// Keep the local side and push it over the server's.
    OverwriteServer {
        /// Pending state to commit before re-pushing.
        state: StateTag,
        /// How to push.
        push: PushKind,
        /// Revision to push against.
        base_revision: Option<Revision>,
    },
    /// Adopt the server version.
    AcceptServer {
        /// Server body.
        body: Body,
        /// Server revision.
        revision: Option<Revision>,
    },
    /// Both sides agree the record is gone.
    Destroy,
}

impl Decision {
    /// Returns true if the conflict stays open.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Decision::Defer { .. })
    }

    /// Returns true if a push must follow the commit.
    pub fn needs_push(&self) -> bool {
        matches!(self, Decision::OverwriteServer { .. })
    }

    /// Applies the decision to a stored record without any network action.
    ///
    /// Returns `None` if the record is destroyed. The server snapshot is
    /// kept only while the conflict is deferred.
    pub fn commit(
        &self,
        id: &RecordId,
        record: StoredRecord,
        server: &ServerSnapshot,
    ) -> SyncResult<Option<StoredRecord>> {
        match self {
            Decision::Defer { .. } => {
                let Some(mut record) = step(id, record, Event::ServerDiverged)? else {
                    return Ok(None);
                };
                record.server = Some(server.clone());
                Ok(Some(record))
            }
            Decision::OverwriteServer {
                base_revision,
                push,
                ..
            } => {
                let full = *push == PushKind::Put;
                let Some(mut record) = step(id, record, Event::TakeLocal { full })? else {
                    return Ok(None);
                };
                record.revision = base_revision.clone();
                record.server = None;
                Ok(Some(record))
            }
            Decision::AcceptServer { body, revision } => {
                let Some(mut record) = step(id, record, Event::TakeServer { deleted: false })?
                else {
                    return Ok(None);
                };
                record.body = Some(body.clone());
                record.revision = revision.clone();
                record.server = None;
                Ok(Some(record))
            }
            Decision::Destroy => step(id, record, Event::TakeServer { deleted: true }),
        }
    }
}

/// Applies a [`ConflictPolicy`] to conflicts.
///
/// Two sides that already agree (both deleted, or identical bodies) settle
/// the same way under every policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Decides a conflict. Deterministic in all three inputs.
    pub fn resolve(local: LocalSide<'_>, server: &ServerSnapshot, policy: ConflictPolicy) -> Decision {
        let local_deleted = local.intent == LocalIntent::Delete;

        // Sides that agree are not a real conflict.
        if local_deleted && server.is_deleted() {
            return Decision::Destroy;
        }
        if let (Some(local_body), Some(server_body)) = (local.body, server.body.as_ref()) {
            if !local_deleted && local_body == server_body {
                return Decision::AcceptServer {
                    body: server_body.clone(),
                    revision: server.revision.clone(),
                };
            }
        }

        match policy {
            ConflictPolicy::Manual => Decision::Defer {
                state: local.intent.deferred_state(),
            },
            ConflictPolicy::ServerWins => match &server.body {
                Some(body) => Decision::AcceptServer {
                    body: body.clone(),
                    revision: server.revision.clone(),
                },
                None => Decision::Destroy,
            },
            ConflictPolicy::ClientWins => {
                if local_deleted {
                    Decision::OverwriteServer {
                        state: StateTag::Deleted,
                        push: PushKind::Delete,
                        base_revision: server.revision.clone(),
                    }
                } else if server.is_deleted() {
                    Decision::OverwriteServer {
                        state: StateTag::DirtyFull,
                        push: PushKind::Put,
                        base_revision: None,
                    }
                } else if local.intent == LocalIntent::FullUpdate {
                    Decision::OverwriteServer {
                        state: StateTag::DirtyFull,
                        push: PushKind::Put,
                        base_revision: server.revision.clone(),
                    }
                } else {
                    Decision::OverwriteServer {
                        state: StateTag::Dirty,
                        push: PushKind::Patch,
                        base_revision: server.revision.clone(),
                    }
                }
            }
        }
    }

    /// Decides the conflict held by a stored record.
    ///
    /// Returns `None` if the record carries no local change.
    pub fn resolve_record(
        record: &StoredRecord,
        server: &ServerSnapshot,
        policy: ConflictPolicy,
    ) -> Option<Decision> {
        let intent = LocalIntent::of(record.state)?;
        Some(Self::resolve(
            LocalSide {
                intent,
                body: record.body.as_ref(),
            },
            server,
            policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn server(body: Option<&[u8]>, rev: &str) -> ServerSnapshot {
        ServerSnapshot {
            body: body.map(|b| b.to_vec()),
            revision: Some(Revision::new(rev)),
        }
    }

    fn local(intent: LocalIntent, body: &Body) -> LocalSide<'_> {
        LocalSide {
            intent,
            body: Some(body),
        }
    }

    #[test]
    fn manual_defers_with_matching_state() {
        let body = b"mine".to_vec();
        let srv = server(Some(b"theirs"), "r2");
        assert_eq!(
            ConflictResolver::resolve(local(LocalIntent::Update, &body), &srv, ConflictPolicy::Manual),
            Decision::Defer {
                state: StateTag::Conflicted
            }
        );
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::FullUpdate, &body),
                &srv,
                ConflictPolicy::Manual
            ),
            Decision::Defer {
                state: StateTag::ConflictedFull
            }
        );
        assert_eq!(
            ConflictResolver::resolve(local(LocalIntent::Delete, &body), &srv, ConflictPolicy::Manual),
            Decision::Defer {
                state: StateTag::ConflictedDelete
            }
        );
    }

    #[test]
    fn server_wins_adopts_server() {
        let body = b"mine".to_vec();
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::Update, &body),
                &server(Some(b"theirs"), "r2"),
                ConflictPolicy::ServerWins
            ),
            Decision::AcceptServer {
                body: b"theirs".to_vec(),
                revision: Some(Revision::new("r2")),
            }
        );
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::Update, &body),
                &server(None, "r2"),
                ConflictPolicy::ServerWins
            ),
            Decision::Destroy
        );
    }

    #[test]
    fn client_wins_overwrites() {
        let body = b"mine".to_vec();
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::Update, &body),
                &server(Some(b"theirs"), "r2"),
                ConflictPolicy::ClientWins
            ),
            Decision::OverwriteServer {
                state: StateTag::Dirty,
                push: PushKind::Patch,
                base_revision: Some(Revision::new("r2")),
            }
        );
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::FullUpdate, &body),
                &server(Some(b"theirs"), "r2"),
                ConflictPolicy::ClientWins
            ),
            Decision::OverwriteServer {
                state: StateTag::DirtyFull,
                push: PushKind::Put,
                base_revision: Some(Revision::new("r2")),
            }
        );
        // Server deleted: the push re-creates the record.
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::Update, &body),
                &server(None, "r2"),
                ConflictPolicy::ClientWins
            ),
            Decision::OverwriteServer {
                state: StateTag::DirtyFull,
                push: PushKind::Put,
                base_revision: None,
            }
        );
        assert_eq!(
            ConflictResolver::resolve(
                local(LocalIntent::Delete, &body),
                &server(Some(b"theirs"), "r2"),
                ConflictPolicy::ClientWins
            ),
            Decision::OverwriteServer {
                state: StateTag::Deleted,
                push: PushKind::Delete,
                base_revision: Some(Revision::new("r2")),
            }
        );
    }

    #[test]
    fn agreeing_sides_settle_under_every_policy() {
        let body = b"same".to_vec();
        for policy in [
            ConflictPolicy::Manual,
            ConflictPolicy::ClientWins,
            ConflictPolicy::ServerWins,
        ] {
            assert_eq!(
                ConflictResolver::resolve(local(LocalIntent::Delete, &body), &server(None, "r9"), policy),
                Decision::Destroy
            );
            assert!(matches!(
                ConflictResolver::resolve(
                    local(LocalIntent::Update, &body),
                    &server(Some(b"same"), "r9"),
                    policy
                ),
                Decision::AcceptServer { .. }
            ));
        }
    }

    #[test]
    fn commit_applies_decisions() {
        let id = RecordId::new("n");
        let record = StoredRecord::new(b"mine".to_vec(), StateTag::Conflicted)
            .with_revision(Revision::new("r1"));
        let srv = server(Some(b"theirs"), "r2");

        let accepted = Decision::AcceptServer {
            body: b"theirs".to_vec(),
            revision: Some(Revision::new("r2")),
        }
        .commit(&id, record.clone(), &srv)
        .unwrap()
        .unwrap();
        assert_eq!(accepted.state, StateTag::Synced);
        assert_eq!(accepted.body.as_deref(), Some(&b"theirs"[..]));
        assert_eq!(accepted.revision, Some(Revision::new("r2")));
        assert!(accepted.server.is_none());

        let overwrite = ConflictResolver::resolve_record(&record, &srv, ConflictPolicy::ClientWins)
            .unwrap()
            .commit(&id, record.clone(), &srv)
            .unwrap()
            .unwrap();
        assert_eq!(overwrite.state, StateTag::Dirty);
        assert_eq!(overwrite.revision, Some(Revision::new("r2")));
        assert_eq!(overwrite.body.as_deref(), Some(&b"mine"[..]));

        let deferred = Decision::Defer {
            state: StateTag::Conflicted,
        }
        .commit(&id, record.clone(), &srv)
        .unwrap()
        .unwrap();
        assert_eq!(deferred.server, Some(srv.clone()));

        assert!(Decision::Destroy.commit(&id, record, &srv).unwrap().is_none());
    }

    #[test]
    fn clean_records_have_no_conflict() {
        let record = StoredRecord::synced(b"x".to_vec(), Revision::new("r1"));
        assert!(
            ConflictResolver::resolve_record(&record, &server(None, "r2"), ConflictPolicy::ServerWins)
                .is_none()
        );
    }

    fn any_intent() -> impl Strategy<Value = LocalIntent> {
        prop_oneof![
            Just(LocalIntent::Update),
            Just(LocalIntent::FullUpdate),
            Just(LocalIntent::Delete),
        ]
    }

    fn any_policy() -> impl Strategy<Value = ConflictPolicy> {
        prop_oneof![
            Just(ConflictPolicy::Manual),
            Just(ConflictPolicy::ClientWins),
            Just(ConflictPolicy::ServerWins),
        ]
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(
            intent in any_intent(),
            local_body in proptest::collection::vec(any::<u8>(), 0..8),
            server_body in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..8)),
            policy in any_policy(),
        ) {
            let srv = ServerSnapshot { body: server_body, revision: Some(Revision::new("r")) };
            let side = LocalSide { intent, body: Some(&local_body) };
            let first = ConflictResolver::resolve(side, &srv, policy);
            let second = ConflictResolver::resolve(side, &srv, policy);
            prop_assert_eq!(&first, &second);

            if policy == ConflictPolicy::Manual {
                let deferred_or_trivial = first.is_deferred() || matches!(first, Decision::Destroy | Decision::AcceptServer { .. });
                prop_assert!(deferred_or_trivial);
            } else {
                prop_assert!(!first.is_deferred());
            }
        }
    }
}
