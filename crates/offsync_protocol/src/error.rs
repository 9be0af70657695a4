//! Error types for protocol values and codecs.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A numeric state code outside the known set.
    #[error("unknown state code: {0}")]
    UnknownStateCode(u8),

    /// A state name that does not match any state.
    #[error("unknown state name: {0}")]
    UnknownStateName(String),

    /// A conflict policy code or name that does not match any policy.
    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ProtocolError {
    /// Creates a codec error from any displayable error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
