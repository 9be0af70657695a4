//! Compact command implementation.

use super::{format_size, open_store};
use std::path::Path;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let before = store.log_size()?;

    println!("Compacting record store at {}", path.display());
    println!("  Size before: {}", format_size(before));
    if dry_run {
        println!("(dry run - no changes made)");
        return Ok(());
    }

    store.compact()?;
    let after = store.log_size()?;
    info!(before, after, "record log compacted");
    println!("  Size after:  {}", format_size(after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(before.saturating_sub(after)),
        if before > 0 {
            (before.saturating_sub(after) as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{RecordId, StateTag};
    use offsync_storage::{FileRecordStore, FileStoreConfig, RecordStore, StoredRecord};

    #[test]
    fn compaction_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        {
            let store = FileRecordStore::open(&path, FileStoreConfig::default()).unwrap();
            for n in 0..10u8 {
                let record = StoredRecord::new(vec![n], StateTag::Dirty);
                store.put(&RecordId::new("a"), &record).unwrap();
            }
        }

        run(&path, false).unwrap();

        let store = FileRecordStore::open(&path, FileStoreConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        let record = store.get(&RecordId::new("a")).unwrap().unwrap();
        assert_eq!(record.body, Some(vec![9]));
    }
}
