//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use intake_core::{ItemRecord, StoreStatus, SyncStatus};
use serde::Serialize;
use serde_json::Value;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a value as pretty JSON
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }

    /// Print a single record with all of its fields
    pub fn print_record(&self, collection: &str, record: &ItemRecord) {
        match self.format {
            OutputFormat::Human => {
                println!("Collection: {}", collection);
                println!("ID:         {}", record.id);
                println!("Created:    {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("Updated:    {}", record.updated_at.format("%Y-%m-%d %H:%M:%S"));
                if !record.fields.is_empty() {
                    println!();
                    let width = record.fields.keys().map(|k| k.len()).max().unwrap_or(0);
                    for (name, value) in &record.fields {
                        println!("  {:width$}  {}", name, display_value(value), width = width);
                    }
                }
            }
            OutputFormat::Json => self.json(record),
            OutputFormat::Quiet => println!("{}", record.id),
        }
    }

    /// Print the records of a collection
    pub fn print_records(&self, collection: &str, records: &[ItemRecord]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No records in {}.", collection);
                    return;
                }
                for record in records {
                    let preview = record
                        .fields
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, display_value(v)))
                        .collect::<Vec<_>>()
                        .join(" ");
                    println!(
                        "{} | {} | {}",
                        truncate(&record.id, 36),
                        record.updated_at.format("%Y-%m-%d %H:%M"),
                        truncate(&preview, 60)
                    );
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => self.json(&records),
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id);
                }
            }
        }
    }

    /// Print store status
    pub fn print_status(&self, status: &StoreStatus, sync: SyncStatus) {
        match self.format {
            OutputFormat::Human => {
                println!("Intake Status");
                println!("=============");
                println!();
                println!("Local state:");
                match status.last_saved {
                    Some(at) => println!("  Last saved: {}", at.format("%Y-%m-%d %H:%M:%S")),
                    None => println!("  Last saved: never"),
                }
                if status.dirty {
                    println!("  Unsaved changes pending");
                }
                if status.collections.is_empty() {
                    println!("  No records stored");
                }
                for (name, count) in &status.collections {
                    println!("  {}: {}", name, count);
                }
                println!();
                println!("Sync:");
                println!("  Status: {}", describe_sync(sync));
                println!(
                    "  Remote: {}",
                    status.remote_url.as_deref().unwrap_or("(not configured)")
                );
                println!("  Queued: {}", status.queued);
            }
            OutputFormat::Json => {
                let mut value = serde_json::to_value(status).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut value {
                    map.insert("sync".to_string(), Value::from(describe_sync(sync)));
                }
                self.json(&value);
            }
            OutputFormat::Quiet => println!("{}", status.queued),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning; shown in every mode but quiet
    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("⚠ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "warning", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn describe_sync(status: SyncStatus) -> String {
    match status {
        SyncStatus::Offline => "offline".to_string(),
        SyncStatus::Idle => "up to date".to_string(),
        SyncStatus::Draining => "syncing".to_string(),
        SyncStatus::Pending(n) => format!("{} pending", n),
    }
}

/// Render a field value without JSON quoting for plain strings
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
