//! # offsync Storage
//!
//! The record store contract the reconciliation core requires, plus two
//! implementations.
//!
//! A store durably holds, per record, the body, its [`StateTag`], the last
//! known server revision and the bookkeeping the engine needs to survive a
//! crash (queued edits, the conflicting server side, quarantine marks).
//!
//! ## Design Principles
//!
//! - `put` and `delete` are atomic and durable before they return
//! - `scan` returns ids in insertion order, stable across restarts
//! - Stores do not interpret bodies or enforce transitions
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`MemoryRecordStore`] - For testing and ephemeral caches
//! - [`FileRecordStore`] - Append-only, checksummed log on disk
//!
//! ## Example
//!
//! ```rust
//! use offsync_protocol::{RecordId, StateTag};
//! use offsync_storage::{MemoryRecordStore, RecordStore, StoredRecord};
//!
//! let store = MemoryRecordStore::new();
//! let id = RecordId::new("note-1");
//! store.put(&id, &StoredRecord::new(b"hi".to_vec(), StateTag::Dirty)).unwrap();
//! assert_eq!(store.scan(&|tag| tag.is_dirty()).unwrap(), vec![id]);
//! ```
//!
//! [`StateTag`]: offsync_protocol::StateTag

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::{FileRecordStore, FileStoreConfig};
pub use memory::MemoryRecordStore;
pub use record::{PendingEdit, ServerSnapshot, StoredRecord};
pub use store::RecordStore;
