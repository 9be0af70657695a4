//! # offsync testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - [`MemoryServer`], an authoritative in-memory server implementing the
//!   sync transport
//! - [`CrashableStore`], a record store wrapper that fails writes on demand
//! - Fixtures for durable stores in temporary directories
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::prelude::*;
//!
//! let harness = Harness::memory(ConflictPolicy::ServerWins);
//! harness.session.tracker().create(&"n1".into(), b"A".to_vec(), false)?;
//! harness.session.sync()?;
//! assert_eq!(harness.server.body(&"n1".into()), Some(b"A".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
    pub use offsync_engine::{SyncConfig, SyncError, SyncSession};
    pub use offsync_protocol::{ConflictPolicy, RecordId, Revision, StateTag};
    pub use offsync_storage::{MemoryRecordStore, RecordStore, StoredRecord};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use server::*;
