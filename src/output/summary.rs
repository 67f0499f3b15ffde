//! Console rendering of a finished crawl session

use crate::model::{ChangelogEntry, SessionSummary};
use std::fmt::Write;

/// Renders a session summary as plain text
pub fn format_session_summary(summary: &SessionSummary) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "=== Crawl Run {} ===\n", summary.run_id);
    let _ = writeln!(out, "Status: {:?}", summary.status);
    let _ = writeln!(out, "Started: {}", summary.started_at.to_rfc3339());
    let _ = writeln!(out, "Duration: {:.1}s\n", summary.duration_ms as f64 / 1000.0);

    let _ = writeln!(out, "Items:");
    let _ = writeln!(out, "  Discovered: {}", summary.frontier_size);
    let _ = writeln!(out, "  Skipped (already known): {}", summary.skipped);
    let _ = writeln!(out, "  Attempted: {}", summary.attempted);
    let _ = writeln!(out, "  Succeeded: {}", summary.succeeded);
    let _ = writeln!(out, "  Failed: {}\n", summary.failed);

    let _ = writeln!(out, "Changes:");
    let _ = writeln!(out, "  New: {}", summary.new_count);
    let _ = writeln!(out, "  Updated: {}", summary.updated_count);
    let _ = writeln!(out, "  Unchanged: {}", summary.unchanged_count);
    let _ = writeln!(out, "  Deleted: {}", summary.deleted_count);

    if !summary.fields_changed.is_empty() {
        let _ = writeln!(out, "\nChanged Fields:");
        for (field, count) in &summary.fields_changed {
            let _ = writeln!(out, "  {}: {}", field, count);
        }
    }

    out
}

/// One line per changelog entry, e.g. `UPDATED Sharp Objects: price_incl_tax 47.82 -> 39.99`
pub fn format_changelog_entry(entry: &ChangelogEntry) -> String {
    if entry.changes.is_empty() {
        return format!("{} {} <{}>", entry.kind, entry.record_name, entry.source_url);
    }

    let changes: Vec<String> = entry
        .changes
        .iter()
        .map(|c| format!("{} {} -> {}", c.field, c.old, c.new))
        .collect();
    format!("{} {}: {}", entry.kind, entry.record_name, changes.join("; "))
}

pub fn print_session_summary(summary: &SessionSummary) {
    print!("{}", format_session_summary(summary));
}

pub fn print_changelog(entries: &[ChangelogEntry]) {
    if entries.is_empty() {
        println!("\nNo changes detected.");
        return;
    }

    println!("\nChangelog:");
    for entry in entries {
        println!("  {}", format_changelog_entry(entry));
    }
}
