//! Conflicts command implementation.

use super::open_store;
use offsync_engine::{ConflictSurface, ConflictView};
use std::path::Path;

const PREVIEW_LEN: usize = 60;

/// Runs the conflicts command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let views = ConflictSurface::new(store).conflicts()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        _ => {
            if views.is_empty() {
                println!("No unresolved conflicts");
            }
            for view in &views {
                print_view(view);
            }
        }
    }

    Ok(())
}

fn print_view(view: &ConflictView) {
    println!("{} ({:?})", view.id, view.kind);
    println!("  local:  {}", preview(view.local_body.as_deref()));
    println!("  server: {}", preview(view.server_body.as_deref()));
    if let Some(revision) = &view.server_revision {
        println!("  server revision: {}", revision);
    }
}

/// Shows a body as text when it is UTF-8, otherwise by size.
fn preview(body: Option<&[u8]>) -> String {
    match body {
        None => "(deleted)".to_string(),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) if text.chars().count() > PREVIEW_LEN => {
                let cut: String = text.chars().take(PREVIEW_LEN).collect();
                format!("{cut}…")
            }
            Ok(text) => text.to_string(),
            Err(_) => format!("<{} bytes>", bytes.len()),
        },
    }
}
