//! Inspect command implementation.

use fieldpulse_core::{replay, Position};
use fieldpulse_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub size: u64,
    /// Complete records.
    pub records: usize,
    /// Dead records awaiting compaction.
    pub dead_records: usize,
    /// Bytes of a torn final record.
    pub torn_bytes: u64,
    /// Next id the queue will assign.
    pub next_id: u64,
    /// Number of pending positions.
    pub pending: usize,
    /// Pending positions, oldest first.
    pub positions: Vec<Position>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

/// Reads a journal without modifying it.
pub fn inspect(
    path: &Path,
    limit: Option<usize>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No journal found at {:?}", path).into());
    }

    let backend = FileBackend::open(path)?;
    let size = backend.size()?;
    let bytes = backend.read_at(0, size as usize)?;
    let replay = replay(&bytes)?;

    let pending = replay.positions.len();
    let positions = replay
        .positions
        .into_values()
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        size,
        records: replay.records,
        dead_records: replay.dead_records,
        torn_bytes: replay.torn_bytes,
        next_id: replay.next_id,
        pending,
        positions,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Journal: {}", result.path);
    println!();
    println!("Size:          {}", format_bytes(result.size));
    println!("Records:       {}", result.records);
    println!("Dead records:  {}", result.dead_records);
    if result.torn_bytes > 0 {
        println!("Torn tail:     {} (cut on next open)", format_bytes(result.torn_bytes));
    }
    println!("Next id:       {}", result.next_id);
    println!("Pending:       {}", result.pending);

    if !result.positions.is_empty() {
        println!();
        println!(
            "  {:>8}  {:<16}  {:<25}  {:>11}  {:>12}",
            "ID", "Device", "Time", "Latitude", "Longitude"
        );
        for position in &result.positions {
            println!(
                "  {:>8}  {:<16}  {:<25}  {:>11.6}  {:>12.6}",
                position.id,
                position.device_id,
                position.time.to_rfc3339(),
                position.latitude,
                position.longitude
            );
        }
        if result.positions.len() < result.pending {
            println!("  ... {} more", result.pending - result.positions.len());
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
