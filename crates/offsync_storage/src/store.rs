//! Record store trait definition.

use crate::error::StorageResult;
use crate::record::StoredRecord;
use offsync_protocol::{RecordId, StateTag};

/// Durable keyed storage of records and their sync bookkeeping.
///
/// All reconciliation-visible mutations go through this contract.
///
/// # Invariants
///
/// - `put` replaces the whole record atomically and is durable on return
/// - `delete` of a missing id is a no-op
/// - `scan` yields ids in first-insertion order; re-putting a record keeps
///   its position, deleting and re-inserting moves it to the end
/// - Stores must be `Send + Sync` for concurrent access
pub trait RecordStore: Send + Sync {
    /// Reads a record.
    fn get(&self, id: &RecordId) -> StorageResult<Option<StoredRecord>>;

    /// Writes a record.
    fn put(&self, id: &RecordId, record: &StoredRecord) -> StorageResult<()>;

    /// Removes a record.
    fn delete(&self, id: &RecordId) -> StorageResult<()>;

    /// Returns the ids of all records whose state satisfies `predicate`.
    fn scan(&self, predicate: &dyn Fn(StateTag) -> bool) -> StorageResult<Vec<RecordId>>;

    /// Reads an opaque metadata value.
    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes an opaque metadata value.
    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Returns the number of records.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.scan(&|_| true)?.len())
    }

    /// Returns true if the store holds no records.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
