//! In-memory record store for testing.

use crate::error::StorageResult;
use crate::record::StoredRecord;
use crate::store::RecordStore;
use offsync_protocol::{RecordId, StateTag};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Insertion-ordered record map shared by the in-memory and file stores.
#[derive(Debug, Default, Clone)]
pub(crate) struct RecordIndex {
    records: HashMap<RecordId, (u64, StoredRecord)>,
    order: BTreeMap<u64, RecordId>,
    next_seq: u64,
    meta: HashMap<String, Vec<u8>>,
}

impl RecordIndex {
    pub(crate) fn get(&self, id: &RecordId) -> Option<&StoredRecord> {
        self.records.get(id).map(|(_, record)| record)
    }

    pub(crate) fn put(&mut self, id: &RecordId, record: StoredRecord) {
        if let Some((_, slot)) = self.records.get_mut(id) {
            *slot = record;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id.clone());
        self.records.insert(id.clone(), (seq, record));
    }

    pub(crate) fn delete(&mut self, id: &RecordId) {
        if let Some((seq, _)) = self.records.remove(id) {
            self.order.remove(&seq);
        }
    }

    pub(crate) fn scan(&self, predicate: &dyn Fn(StateTag) -> bool) -> Vec<RecordId> {
        self.order
            .values()
            .filter(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|(_, record)| predicate(record.state))
            })
            .cloned()
            .collect()
    }

    /// Records in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&RecordId, &StoredRecord)> {
        self.order.values().filter_map(|id| {
            self.records.get(id).map(|(_, record)| (id, record))
        })
    }

    pub(crate) fn get_meta(&self, key: &str) -> Option<&Vec<u8>> {
        self.meta.get(key)
    }

    pub(crate) fn put_meta(&mut self, key: &str, value: &[u8]) {
        self.meta.insert(key.to_string(), value.to_vec());
    }

    pub(crate) fn meta(&self) -> impl Iterator<Item = (&String, &Vec<u8>)> {
        self.meta.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

/// An in-memory record store.
///
/// This store keeps everything in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    index: RwLock<RecordIndex>,
}

impl MemoryRecordStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records in insertion order.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(RecordId, StoredRecord)> {
        self.index
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &RecordId) -> StorageResult<Option<StoredRecord>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn put(&self, id: &RecordId, record: &StoredRecord) -> StorageResult<()> {
        self.index.write().put(id, record.clone());
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> StorageResult<()> {
        self.index.write().delete(id);
        Ok(())
    }

    fn scan(&self, predicate: &dyn Fn(StateTag) -> bool) -> StorageResult<Vec<RecordId>> {
        Ok(self.index.read().scan(predicate))
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.index.read().get_meta(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.index.write().put_meta(key, value);
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.index.read().len())
    }
}
