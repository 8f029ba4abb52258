//! User-facing terminal output
//!
//! Colored messages and record listings for the CLI, kept separate from the
//! `log` output so results can be piped without log noise.

use anyhow::Result;
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::record::Record;
use crate::store::TypeStatus;

/// Display a warning message to the user in yellow with padding
pub fn warn(message: &str) {
    eprintln!("\n{}\n", message.yellow());
}

/// Display an error message to the user in red with padding
///
/// # Example
/// ```ignore
/// output::error("Error: unknown field 'shell' for group records");
/// ```
pub fn error(message: &str) {
    eprintln!("\n{}\n", message.red());
}

/// Print records either as JSON or as one colon-joined line per record
pub fn print_records(records: &[Arc<Record>], as_json: bool, pretty: bool) -> Result<()> {
    if as_json {
        let json = if pretty {
            serde_json::to_string_pretty(records)?
        } else {
            serde_json::to_string(records)?
        };
        println!("{}", json);
        return Ok(());
    }

    if records.is_empty() {
        warn("No results found.");
        return Ok(());
    }

    for record in records {
        let values: Vec<&str> = record.fields().map(|(_, v)| v).collect();
        println!("{}", values.join(":"));
    }
    eprintln!("{}", format!("{} record(s)", records.len()).dimmed());
    Ok(())
}

/// Print the load status of each record type
pub fn print_status(status: &[TypeStatus]) {
    for s in status {
        let header = format!("{} ({})", s.record_type, s.path.display());
        match &s.error {
            None => {
                println!("{} {}", "✓".green(), header.bold());
                println!(
                    "    {} records, {} skipped line(s), loaded {}",
                    s.records,
                    s.skipped_lines,
                    s.loaded_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                let distinct: Vec<String> = s
                    .distinct_values
                    .iter()
                    .map(|(field, n)| format!("{}={}", field, n))
                    .collect();
                println!("    distinct values: {}", distinct.join(" ").dimmed());
            }
            Some(err) => {
                println!("{} {}", "✗".red(), header.bold());
                println!("    {}", err.red());
            }
        }
    }
}
