//! CLI command implementations.

pub mod compact;
pub mod conflicts;
pub mod inspect;
pub mod recover;
pub mod release;
pub mod resolve;

use offsync_storage::{FileRecordStore, FileStoreConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Opens an existing store; never creates one.
pub fn open_store(path: &Path) -> Result<Arc<FileRecordStore>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No record store found at {}", path.display()).into());
    }
    debug!(path = %path.display(), "opening record store");
    let store = FileRecordStore::open(path, FileStoreConfig::new().create_if_missing(false))?;
    Ok(Arc::new(store))
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
