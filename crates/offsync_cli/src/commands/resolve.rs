//! Resolve command implementation.

use super::open_store;
use crate::Side;
use offsync_engine::ConflictSurface;
use offsync_protocol::{RecordId, StateTag};
use std::path::Path;

/// Runs the resolve command.
pub fn run(path: &Path, id: &str, take: Side) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let next = resolve(&ConflictSurface::new(store), &RecordId::new(id), take)?;
    match next {
        Some(state) => println!("✓ {id} is now {state}"),
        None => println!("✓ {id} removed"),
    }
    if next.is_some_and(|state| state != StateTag::Synced) {
        println!("  The chosen version is pushed on the next sync.");
    }
    Ok(())
}

/// Applies the chosen side. Returns the new state, or `None` if the record
/// was destroyed.
pub fn resolve<S: offsync_storage::RecordStore>(
    surface: &ConflictSurface<S>,
    id: &RecordId,
    take: Side,
) -> Result<Option<StateTag>, Box<dyn std::error::Error>> {
    let next = match take {
        Side::Local => surface.take_local(id)?,
        Side::Server => surface.take_server(id)?,
    };
    Ok(next)
}
