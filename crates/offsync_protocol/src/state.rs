//! Record lifecycle state.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle state of one cached record relative to the server.
///
/// Every record carries exactly one tag. The `*Full` variants are a push
/// strategy hint (whole-document PUT instead of a field PATCH) and are never
/// surfaced through [`PublicState`].
///
/// Tags are persisted and exchanged as a numeric code. Decoding an unknown
/// code is an error ([`StateTag::try_from`]) unless the caller explicitly
/// opts into the [`StateTag::NoState`] fallback via
/// [`StateTag::from_code_or_default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StateTag {
    /// No sync history: never pushed, never pulled.
    NoState,
    /// Local copy matches the last known server copy.
    Synced,
    /// Field-level update pending push.
    Dirty,
    /// Local deletion pending push.
    Deleted,
    /// Update in flight to the server.
    Syncing,
    /// Deletion in flight to the server.
    SyncingDelete,
    /// Update collided with a concurrent server update.
    Conflicted,
    /// Local deletion collided with a concurrent server update.
    ConflictedDelete,
    /// Full-document overwrite pending push.
    DirtyFull,
    /// Full-document overwrite collided with a concurrent server update.
    ConflictedFull,
}

impl StateTag {
    /// All tags, in code order.
    pub const ALL: [StateTag; 10] = [
        StateTag::NoState,
        StateTag::Synced,
        StateTag::Dirty,
        StateTag::Deleted,
        StateTag::Syncing,
        StateTag::SyncingDelete,
        StateTag::Conflicted,
        StateTag::ConflictedDelete,
        StateTag::DirtyFull,
        StateTag::ConflictedFull,
    ];

    /// Converts to the persisted numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            StateTag::NoState => 0,
            StateTag::Synced => 1,
            StateTag::Dirty => 2,
            StateTag::Deleted => 3,
            StateTag::Syncing => 4,
            StateTag::SyncingDelete => 5,
            StateTag::Conflicted => 6,
            StateTag::ConflictedDelete => 7,
            StateTag::DirtyFull => 8,
            StateTag::ConflictedFull => 9,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Converts from a numeric code, falling back to [`StateTag::NoState`].
    ///
    /// A record that falls back loses its pending status, so the fallback is
    /// logged. Use [`StateTag::try_from`] where an unknown code must fail.
    pub fn from_code_or_default(code: u8) -> Self {
        Self::from_code(code).unwrap_or_else(|| {
            tracing::warn!(code, "unknown state code, falling back to NoState");
            StateTag::NoState
        })
    }

    /// Returns the snake_case name.
    pub fn name(&self) -> &'static str {
        match self {
            StateTag::NoState => "no_state",
            StateTag::Synced => "synced",
            StateTag::Dirty => "dirty",
            StateTag::Deleted => "deleted",
            StateTag::Syncing => "syncing",
            StateTag::SyncingDelete => "syncing_delete",
            StateTag::Conflicted => "conflicted",
            StateTag::ConflictedDelete => "conflicted_delete",
            StateTag::DirtyFull => "dirty_full",
            StateTag::ConflictedFull => "conflicted_full",
        }
    }

    /// Returns true if an update is pending push.
    pub fn is_dirty(&self) -> bool {
        matches!(self, StateTag::Dirty | StateTag::DirtyFull)
    }

    /// Returns true if the record is deleted locally (pending, in flight or conflicted).
    pub fn is_deleted(&self) -> bool {
        matches!(
            self,
            StateTag::Deleted | StateTag::SyncingDelete | StateTag::ConflictedDelete
        )
    }

    /// Returns true if the record is waiting on conflict resolution.
    pub fn is_conflicted(&self) -> bool {
        matches!(
            self,
            StateTag::Conflicted | StateTag::ConflictedFull | StateTag::ConflictedDelete
        )
    }

    /// Returns true if a push is in flight.
    pub fn is_syncing(&self) -> bool {
        matches!(self, StateTag::Syncing | StateTag::SyncingDelete)
    }

    /// Returns true if the record belongs on a pass worklist.
    ///
    /// Conflicted records are included so they can be re-offered once a
    /// resolution is available.
    pub fn is_dirty_or_delete(&self) -> bool {
        matches!(
            self,
            StateTag::Dirty
                | StateTag::DirtyFull
                | StateTag::Deleted
                | StateTag::Conflicted
                | StateTag::ConflictedFull
                | StateTag::ConflictedDelete
        )
    }

    /// Returns true for the whole-document variants.
    pub fn is_full(&self) -> bool {
        matches!(self, StateTag::DirtyFull | StateTag::ConflictedFull)
    }

    /// Returns true if the local copy has nothing pending.
    pub fn is_clean(&self) -> bool {
        matches!(self, StateTag::NoState | StateTag::Synced)
    }

    /// Maps to the user-visible classification.
    pub fn public(&self) -> PublicState {
        match self {
            StateTag::NoState | StateTag::Synced => PublicState::Synced,
            StateTag::Dirty | StateTag::DirtyFull | StateTag::Syncing => PublicState::Dirty,
            StateTag::Deleted | StateTag::SyncingDelete => PublicState::Deleted,
            StateTag::Conflicted | StateTag::ConflictedFull | StateTag::ConflictedDelete => {
                PublicState::Conflicted
            }
        }
    }
}

impl From<StateTag> for u8 {
    fn from(tag: StateTag) -> Self {
        tag.to_code()
    }
}

impl TryFrom<u8> for StateTag {
    type Error = ProtocolError;

    fn try_from(code: u8) -> ProtocolResult<Self> {
        Self::from_code(code).ok_or(ProtocolError::UnknownStateCode(code))
    }
}

impl FromStr for StateTag {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::ALL
            .iter()
            .find(|tag| tag.name() == s)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownStateName(s.to_string()))
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The four classifications exposed to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicState {
    /// Nothing pending.
    Synced,
    /// Local changes pending.
    Dirty,
    /// Local deletion pending.
    Deleted,
    /// Waiting on conflict resolution.
    Conflicted,
}

impl fmt::Display for PublicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublicState::Synced => "synced",
            PublicState::Dirty => "dirty",
            PublicState::Deleted => "deleted",
            PublicState::Conflicted => "conflicted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn code_roundtrip_for_every_tag() {
        for tag in StateTag::ALL {
            assert_eq!(StateTag::from_code(tag.to_code()), Some(tag));
            assert_eq!(StateTag::try_from(u8::from(tag)), Ok(tag));
        }
    }

    #[test]
    fn unknown_code_is_reported() {
        assert_eq!(StateTag::from_code(10), None);
        assert_eq!(
            StateTag::try_from(42),
            Err(ProtocolError::UnknownStateCode(42))
        );
    }

    #[test]
    fn unknown_code_falls_back_to_no_state() {
        assert_eq!(StateTag::from_code_or_default(200), StateTag::NoState);
        assert_eq!(StateTag::from_code_or_default(2), StateTag::Dirty);
    }

    #[test]
    fn names_parse_back() {
        for tag in StateTag::ALL {
            assert_eq!(tag.name().parse::<StateTag>().unwrap(), tag);
        }
        assert!(matches!(
            "dirtyish".parse::<StateTag>(),
            Err(ProtocolError::UnknownStateName(_))
        ));
    }

    #[test]
    fn serde_rejects_unknown_code() {
        let bytes = crate::to_cbor(&11u8).unwrap();
        let decoded: ProtocolResult<StateTag> = crate::from_cbor(&bytes);
        assert!(decoded.is_err());

        let bytes = crate::to_cbor(&StateTag::ConflictedFull).unwrap();
        let decoded: StateTag = crate::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, StateTag::ConflictedFull);
    }

    #[test]
    fn full_variants_are_hidden_publicly() {
        assert_eq!(StateTag::DirtyFull.public(), PublicState::Dirty);
        assert_eq!(StateTag::ConflictedFull.public(), PublicState::Conflicted);
        assert_eq!(StateTag::Syncing.public(), PublicState::Dirty);
        assert_eq!(StateTag::SyncingDelete.public(), PublicState::Deleted);
        assert_eq!(StateTag::ConflictedDelete.public(), PublicState::Conflicted);
        assert_eq!(StateTag::NoState.public(), PublicState::Synced);
    }

    #[test]
    fn worklist_membership() {
        let on_worklist: Vec<_> = StateTag::ALL
            .iter()
            .filter(|t| t.is_dirty_or_delete())
            .copied()
            .collect();
        assert_eq!(
            on_worklist,
            vec![
                StateTag::Dirty,
                StateTag::Deleted,
                StateTag::Conflicted,
                StateTag::ConflictedDelete,
                StateTag::DirtyFull,
                StateTag::ConflictedFull,
            ]
        );
        assert!(!StateTag::Syncing.is_dirty_or_delete());
    }

    proptest! {
        #[test]
        fn classification_is_a_function_of_the_code(code in any::<u8>()) {
            let tag = StateTag::from_code_or_default(code);
            prop_assert_eq!(tag.is_conflicted(), tag.public() == PublicState::Conflicted);
            prop_assert!(!(tag.is_dirty() && tag.is_deleted()));
            prop_assert!(!(tag.is_clean() && tag.is_dirty_or_delete()));
        }
    }
}
