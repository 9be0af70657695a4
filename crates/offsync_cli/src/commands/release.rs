//! Release command implementation.

use super::open_store;
use offsync_engine::ConflictSurface;
use offsync_protocol::RecordId;
use std::path::Path;

/// Runs the release command.
pub fn run(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    ConflictSurface::new(store).release(&RecordId::new(id))?;
    println!("✓ {id} released");
    Ok(())
}
