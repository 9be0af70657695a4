//! Property-based test generators using proptest.
//!
//! Record ids come from a small pool so that random actions collide on the
//! same records often enough to reach conflicts.

use offsync_protocol::{Body, ConflictPolicy, RecordId};
use proptest::prelude::*;

/// Number of distinct record ids the generators draw from.
pub const ID_POOL: usize = 4;

/// One step of a randomized sync scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Local create.
    Create {
        /// Record.
        id: RecordId,
        /// Initial body.
        body: Body,
        /// Whole-document write.
        full: bool,
    },
    /// Local update.
    Update {
        /// Record.
        id: RecordId,
        /// New body.
        body: Body,
        /// Whole-document write.
        full: bool,
    },
    /// Local delete.
    Delete {
        /// Record.
        id: RecordId,
    },
    /// Another client writes the record on the server.
    ServerUpdate {
        /// Record.
        id: RecordId,
        /// New body.
        body: Body,
    },
    /// Another client deletes the record on the server.
    ServerDelete {
        /// Record.
        id: RecordId,
    },
    /// Run one pass.
    Sync,
    /// Make the server reachable or not.
    SetOnline(bool),
    /// Change the session policy.
    SetPolicy(ConflictPolicy),
}

/// Strategy for record ids from the shared pool.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (0..ID_POOL).prop_map(|n| RecordId::new(format!("r{n}")))
}

/// Strategy for small bodies. Few distinct values so both sides sometimes
/// agree.
pub fn body_strategy() -> impl Strategy<Value = Body> {
    prop::collection::vec(0u8..4, 1..3)
}

/// Strategy for any conflict policy.
pub fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::Manual),
        Just(ConflictPolicy::ClientWins),
        Just(ConflictPolicy::ServerWins),
    ]
}

/// Strategy for a policy that settles conflicts without the application.
pub fn auto_policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![Just(ConflictPolicy::ClientWins), Just(ConflictPolicy::ServerWins)]
}

/// Strategy for a single action.
pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (record_id_strategy(), body_strategy(), any::<bool>())
            .prop_map(|(id, body, full)| Action::Create { id, body, full }),
        4 => (record_id_strategy(), body_strategy(), any::<bool>())
            .prop_map(|(id, body, full)| Action::Update { id, body, full }),
        2 => record_id_strategy().prop_map(|id| Action::Delete { id }),
        3 => (record_id_strategy(), body_strategy())
            .prop_map(|(id, body)| Action::ServerUpdate { id, body }),
        1 => record_id_strategy().prop_map(|id| Action::ServerDelete { id }),
        3 => Just(Action::Sync),
        1 => any::<bool>().prop_map(Action::SetOnline),
        1 => policy_strategy().prop_map(Action::SetPolicy),
    ]
}

/// Strategy for a sequence of actions.
pub fn actions_strategy(max_len: usize) -> impl Strategy<Value = Vec<Action>> {
    prop::collection::vec(action_strategy(), 1..max_len)
}
