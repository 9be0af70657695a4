//! Durable record store backed by an append-only log file.
//!
//! The log is a sequence of frames:
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────┐
//! │ len: u32 │ crc: u32 │ payload (CBOR)      │
//! └──────────┴──────────┴─────────────────────┘
//! ```
//!
//! Each frame holds one put, delete or metadata write. On open the log is
//! replayed into memory; a torn or corrupt tail left by a crash is cut off.
//! A `<file>.lock` sidecar holds an advisory lock for single-writer access.

use crate::error::{StorageError, StorageResult};
use crate::memory::RecordIndex;
use crate::record::StoredRecord;
use crate::store::RecordStore;
use fs2::FileExt;
use offsync_protocol::{from_cbor, to_cbor, RecordId, StateTag};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const FRAME_HEADER: usize = 8;

/// Options for opening a [`FileRecordStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
    /// Whether to fsync after every write (safer but slower).
    pub sync_on_write: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
        }
    }
}

impl FileStoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum LogEntry {
    Put { id: RecordId, record: StoredRecord },
    Delete { id: RecordId },
    Meta { key: String, value: Vec<u8> },
}

/// A record store persisted to a single log file.
///
/// # Durability
///
/// Every `put`, `delete` and `put_meta` is appended to the log (and synced
/// when `sync_on_write` is set) before the in-memory index changes, so a
/// write that returns `Ok` survives a crash and a write that fails leaves
/// the store unchanged.
///
/// A failed append is cut back off the log before the error is returned.
/// If that truncation fails too, the log may hold a frame the index does
/// not, and the store refuses further writes with
/// [`StorageError::Unavailable`] until [`compact`](Self::compact) rewrites
/// the log from the index.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{FileRecordStore, FileStoreConfig, RecordStore};
/// use std::path::Path;
///
/// let store = FileRecordStore::open(Path::new("records.log"), FileStoreConfig::default()).unwrap();
/// println!("{} records", store.len().unwrap());
/// ```
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    config: FileStoreConfig,
    log: Mutex<File>,
    index: RwLock<RecordIndex>,
    poisoned: AtomicBool,
    _lock_file: File,
    #[cfg(test)]
    fault: Mutex<Option<Fault>>,
}

/// Failures injected into the append path by tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Half the frame reaches the file, then the write fails.
    TornWrite,
    /// The whole frame is written but the sync fails.
    FailedSync,
    /// A torn write whose truncation also fails.
    StuckTail,
}

impl FileRecordStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist and `create_if_missing` is false
    /// - Another handle holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path, config: FileStoreConfig) -> StorageResult<Self> {
        if config.create_if_missing {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create_if_missing)
            .truncate(false)
            .open(path)?;

        let index = replay(&mut file, path)?;
        file.seek(SeekFrom::End(0))?;

        tracing::debug!(path = %path.display(), records = index.len(), "opened record store");

        Ok(Self {
            path: path.to_path_buf(),
            config,
            log: Mutex::new(file),
            index: RwLock::new(index),
            poisoned: AtomicBool::new(false),
            _lock_file: lock_file,
            #[cfg(test)]
            fault: Mutex::new(None),
        })
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log in bytes.
    pub fn log_size(&self) -> StorageResult<u64> {
        Ok(self.log.lock().metadata()?.len())
    }

    /// Rewrites the log so it holds exactly one frame per live record and
    /// metadata key, preserving scan order.
    ///
    /// The new log is written to a temporary file and renamed over the old
    /// one, so a crash during compaction leaves the previous log intact.
    /// A successful compaction also lifts the write refusal left by a failed
    /// rollback, since the new log is built from the index alone.
    pub fn compact(&self) -> StorageResult<()> {
        let mut log = self.log.lock();
        let index = self.index.read();

        let temp_path = self.path.with_extension("compact");
        {
            let mut temp = File::create(&temp_path)?;
            for (key, value) in index.meta() {
                temp.write_all(&frame(&LogEntry::Meta {
                    key: key.clone(),
                    value: value.clone(),
                })?)?;
            }
            for (id, record) in index.iter() {
                temp.write_all(&frame(&LogEntry::Put {
                    id: id.clone(),
                    record: record.clone(),
                })?)?;
            }
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        *log = file;
        if self.poisoned.swap(false, Ordering::SeqCst) {
            tracing::info!(path = %self.path.display(), "record log rewritten, accepting writes again");
        }

        tracing::info!(path = %self.path.display(), records = index.len(), "compacted record store");
        Ok(())
    }

    fn append(&self, entry: LogEntry) -> StorageResult<()> {
        let bytes = frame(&entry)?;
        let mut log = self.log.lock();
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "record log out of step with index after a failed rollback".to_string(),
            ));
        }

        let start = log.metadata()?.len();
        if let Err(e) = self.write_frame(&mut log, &bytes) {
            self.roll_back(&mut log, start);
            return Err(e.into());
        }

        // Apply while still holding the log lock so index order matches log order.
        let mut index = self.index.write();
        match entry {
            LogEntry::Put { id, record } => index.put(&id, record),
            LogEntry::Delete { id } => index.delete(&id),
            LogEntry::Meta { key, value } => index.put_meta(&key, &value),
        }
        Ok(())
    }

    fn write_frame(&self, log: &mut File, bytes: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        match *self.fault.lock() {
            Some(Fault::TornWrite | Fault::StuckTail) => {
                log.write_all(&bytes[..bytes.len() / 2])?;
                return Err(io::Error::other("injected torn write"));
            }
            Some(Fault::FailedSync) => {
                log.write_all(bytes)?;
                return Err(io::Error::other("injected sync failure"));
            }
            None => {}
        }

        log.write_all(bytes)?;
        if self.config.sync_on_write {
            log.sync_data()?;
        }
        Ok(())
    }

    /// Cuts the log back to `len` after a failed append.
    fn roll_back(&self, log: &mut File, len: u64) {
        #[cfg(test)]
        let stuck = self.fault.lock().take() == Some(Fault::StuckTail);
        #[cfg(not(test))]
        let stuck = false;

        let result = if stuck {
            Err(io::Error::other("injected truncate failure"))
        } else {
            truncate(log, len)
        };
        match result {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), len, "rolled back failed append");
            }
            Err(e) => {
                self.poisoned.store(true, Ordering::SeqCst);
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to roll back append, refusing further writes"
                );
            }
        }
    }

    #[cfg(test)]
    fn inject(&self, fault: Fault) {
        *self.fault.lock() = Some(fault);
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, id: &RecordId) -> StorageResult<Option<StoredRecord>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn put(&self, id: &RecordId, record: &StoredRecord) -> StorageResult<()> {
        self.append(LogEntry::Put {
            id: id.clone(),
            record: record.clone(),
        })
    }

    fn delete(&self, id: &RecordId) -> StorageResult<()> {
        if self.index.read().get(id).is_none() {
            return Ok(());
        }
        self.append(LogEntry::Delete { id: id.clone() })
    }

    fn scan(&self, predicate: &dyn Fn(StateTag) -> bool) -> StorageResult<Vec<RecordId>> {
        Ok(self.index.read().scan(predicate))
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.index.read().get_meta(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.append(LogEntry::Meta {
            key: key.to_string(),
            value: value.to_vec(),
        })
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.index.read().len())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn truncate(log: &mut File, len: u64) -> io::Result<()> {
    log.set_len(len)?;
    log.seek(SeekFrom::End(0))?;
    Ok(())
}

fn frame(entry: &LogEntry) -> StorageResult<Vec<u8>> {
    let payload = to_cbor(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::Corrupted(format!("frame too large: {} bytes", payload.len())))?;

    let mut bytes = Vec::with_capacity(FRAME_HEADER + payload.len());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Replays the log, truncating a torn or corrupt tail.
fn replay(file: &mut File, path: &Path) -> StorageResult<RecordIndex> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;

    let mut index = RecordIndex::default();
    let mut offset = 0usize;

    while data.len() - offset >= FRAME_HEADER {
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let crc = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        let start = offset + FRAME_HEADER;
        let Some(payload) = data.get(start..start.saturating_add(len)) else {
            break;
        };
        if compute_crc32(payload) != crc {
            break;
        }
        let entry: LogEntry = match from_cbor(payload) {
            Ok(entry) => entry,
            Err(_) => break,
        };
        match entry {
            LogEntry::Put { id, record } => index.put(&id, record),
            LogEntry::Delete { id } => index.delete(&id),
            LogEntry::Meta { key, value } => index.put_meta(&key, &value),
        }
        offset = start + len;
    }

    if offset < data.len() {
        tracing::warn!(
            path = %path.display(),
            valid = offset,
            discarded = data.len() - offset,
            "truncating torn tail of record log"
        );
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }

    Ok(index)
}

/// Computes CRC32 checksum for data.
fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
