//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file is corrupted beyond the recoverable tail.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] offsync_protocol::ProtocolError),

    /// Another process holds the store.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The store refuses writes (simulated crash or closed handle).
    #[error("store is unavailable: {0}")]
    Unavailable(String),
}
