//! Recover command implementation.

use super::open_store;
use offsync_engine::ConflictSurface;
use std::path::Path;
use tracing::info;

/// Runs the recover command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let recovered = ConflictSurface::new(store).recover()?;
    if recovered == 0 {
        println!("No records in flight");
    } else {
        info!(recovered, "demoted in-flight records");
        println!("✓ Recovered {recovered} record(s)");
    }
    Ok(())
}
