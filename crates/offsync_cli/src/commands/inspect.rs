//! Inspect command implementation.

use super::{format_size, open_store};
use offsync_engine::{ConflictSurface, StateSummary, CURSOR_KEY};
use offsync_protocol::StateTag;
use offsync_storage::{FileRecordStore, RecordStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Number of records.
    pub record_count: usize,
    /// Counts by public state.
    pub summary: StateSummary,
    /// Counts by internal state, omitting empty ones.
    pub states: BTreeMap<String, usize>,
    /// Records a crashed process left in flight.
    pub in_flight: usize,
    /// Persisted pull cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_cursor: Option<String>,
    /// Quarantined records and why.
    pub quarantined: Vec<QuarantinedRecord>,
}

/// A record excluded from automatic processing.
#[derive(Debug, Serialize)]
pub struct QuarantinedRecord {
    /// Record id.
    pub id: String,
    /// Reason recorded when it was quarantined.
    pub reason: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let result = collect(&store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the inspection result from an open store.
pub fn collect(
    store: &std::sync::Arc<FileRecordStore>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let surface = ConflictSurface::new(std::sync::Arc::clone(store));

    let mut states = BTreeMap::new();
    for tag in StateTag::ALL {
        let count = store.scan(&move |state| state == tag)?.len();
        if count > 0 {
            states.insert(tag.to_string(), count);
        }
    }

    let pull_cursor = store
        .get_meta(CURSOR_KEY)?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .filter(|cursor| !cursor.is_empty());

    let quarantined = surface
        .quarantined()?
        .into_iter()
        .map(|(id, reason)| QuarantinedRecord {
            id: id.to_string(),
            reason,
        })
        .collect();

    Ok(InspectResult {
        path: store.path().display().to_string(),
        log_size: store.log_size()?,
        record_count: store.len()?,
        summary: surface.summary()?,
        states,
        in_flight: store.scan(&|state| state.is_syncing())?.len(),
        pull_cursor,
        quarantined,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("offsync Record Store Inspection");
    println!("===============================");
    println!();
    println!("Path:     {}", result.path);
    println!("Log size: {}", format_size(result.log_size));
    println!(
        "Cursor:   {}",
        result.pull_cursor.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Records: {}", result.record_count);
    println!("  Synced:      {}", result.summary.synced);
    println!("  Dirty:       {}", result.summary.dirty);
    println!("  Deleted:     {}", result.summary.deleted);
    println!("  Conflicted:  {}", result.summary.conflicted);
    println!("  Quarantined: {}", result.summary.quarantined);

    if !result.states.is_empty() {
        println!();
        println!("States:");
        for (state, count) in &result.states {
            println!("  {:<18} {}", state, count);
        }
    }

    if result.in_flight > 0 {
        println!();
        println!(
            "{} record(s) left in flight; run `offsync recover` before syncing.",
            result.in_flight
        );
    }

    if !result.quarantined.is_empty() {
        println!();
        println!("Quarantined:");
        for record in &result.quarantined {
            println!("  {}: {}", record.id, record.reason);
        }
    }
}
