//! Conflict resolution policy.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for resolving a conflict between a local mutation and a server mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Surface the conflict to the caller; no automatic winner.
    #[default]
    Manual,
    /// The local body always overwrites the server.
    ClientWins,
    /// The server body always overwrites local edits.
    ServerWins,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves conflicts without the caller.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::Manual => 1,
            ConflictPolicy::ClientWins => 2,
            ConflictPolicy::ServerWins => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::Manual),
            2 => Some(ConflictPolicy::ClientWins),
            3 => Some(ConflictPolicy::ServerWins),
            _ => None,
        }
    }

    /// Returns the kebab-case name.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictPolicy::Manual => "manual",
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::ServerWins => "server-wins",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "manual" => Ok(ConflictPolicy::Manual),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            _ => Err(ProtocolError::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_codes() {
        for policy in [
            ConflictPolicy::Manual,
            ConflictPolicy::ClientWins,
            ConflictPolicy::ServerWins,
        ] {
            assert_eq!(ConflictPolicy::from_code(policy.to_code()), Some(policy));
        }
        assert_eq!(ConflictPolicy::from_code(0), None);
        assert_eq!(ConflictPolicy::from_code(4), None);
    }

    #[test]
    fn parse_accepts_both_spellings() {
        assert_eq!(
            "client-wins".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::ClientWins
        );
        assert_eq!(
            "SERVER_WINS".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::ServerWins
        );
        assert!(matches!(
            "last-write-wins".parse::<ConflictPolicy>(),
            Err(ProtocolError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn manual_is_default_and_not_automatic() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Manual);
        assert!(!ConflictPolicy::Manual.auto_resolves());
        assert!(ConflictPolicy::ClientWins.auto_resolves());
        assert!(ConflictPolicy::ServerWins.auto_resolves());
    }
}
