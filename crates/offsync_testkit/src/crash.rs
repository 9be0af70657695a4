//! Crash simulation for record stores.
//!
//! [`CrashableStore`] wraps any [`RecordStore`] and starts failing every
//! write once a write budget is spent, the way a process dies between two
//! durable commits. Tests then drop the session, reopen the inner store and
//! check what recovery makes of the state left behind.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = Arc::new(CrashableStore::new(Arc::new(MemoryRecordStore::new())));
//! store.crash_after(1);
//! let err = session.sync().unwrap_err();
//! assert!(store.has_crashed());
//! ```

use offsync_protocol::{RecordId, StateTag};
use offsync_storage::{RecordStore, StorageError, StorageResult, StoredRecord};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A record store wrapper that can simulate crashes.
pub struct CrashableStore<S> {
    inner: Arc<S>,
    crash_after_writes: AtomicUsize,
    writes: AtomicUsize,
    crashed: AtomicBool,
}

impl<S: RecordStore> CrashableStore<S> {
    /// Wraps `inner`; no crash is armed.
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            crash_after_writes: AtomicUsize::new(usize::MAX),
            writes: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
        }
    }

    /// Lets `writes` more writes through, then fails every write.
    pub fn crash_after(&self, writes: usize) {
        let done = self.writes.load(Ordering::SeqCst);
        self.crash_after_writes
            .store(done.saturating_add(writes), Ordering::SeqCst);
    }

    /// Disarms the crash and clears the crashed flag.
    pub fn reset(&self) {
        self.crash_after_writes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether a write has been refused.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the number of writes that went through.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn write(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Unavailable("store crashed".into()));
        }
        let done = self.writes.load(Ordering::SeqCst);
        if done >= self.crash_after_writes.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(StorageError::Unavailable("simulated crash".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<S: RecordStore> RecordStore for CrashableStore<S> {
    fn get(&self, id: &RecordId) -> StorageResult<Option<StoredRecord>> {
        self.inner.get(id)
    }

    fn put(&self, id: &RecordId, record: &StoredRecord) -> StorageResult<()> {
        self.write()?;
        self.inner.put(id, record)
    }

    fn delete(&self, id: &RecordId) -> StorageResult<()> {
        self.write()?;
        self.inner.delete(id)
    }

    fn scan(&self, predicate: &dyn Fn(StateTag) -> bool) -> StorageResult<Vec<RecordId>> {
        self.inner.scan(predicate)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_meta(key)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.write()?;
        self.inner.put_meta(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::MemoryRecordStore;

    #[test]
    fn writes_fail_after_the_budget() {
        let store = CrashableStore::new(Arc::new(MemoryRecordStore::new()));
        let record = StoredRecord::new(b"x".to_vec(), StateTag::Dirty);
        store.crash_after(1);

        store.put(&RecordId::new("a"), &record).unwrap();
        assert!(store.put(&RecordId::new("b"), &record).is_err());
        assert!(store.has_crashed());
        assert!(store.delete(&RecordId::new("a")).is_err());

        // Reads still work and show only the first write.
        assert!(store.get(&RecordId::new("a")).unwrap().is_some());
        assert!(store.get(&RecordId::new("b")).unwrap().is_none());

        store.reset();
        store.put(&RecordId::new("b"), &record).unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(store.inner().len().unwrap(), 2);
    }
}
