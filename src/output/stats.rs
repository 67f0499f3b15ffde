//! Statistics generation from the record store
//!
//! This module provides functionality for extracting and displaying
//! record and changelog statistics from the storage layer.

use crate::model::ChangeKind;
use crate::storage::{RecordStatus, RecordStore, RunRecord, StorageError};

/// Store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    pub active_records: u64,

    /// Soft-deleted records still kept for history
    pub deleted_records: u64,

    /// Changelog entries across all runs, by kind
    pub changes_by_kind: Vec<(ChangeKind, u64)>,

    pub latest_run: Option<RunRecord>,
}

impl StoreStatistics {
    pub fn total_records(&self) -> u64 {
        self.active_records + self.deleted_records
    }

    pub fn total_changes(&self) -> u64 {
        self.changes_by_kind.iter().map(|(_, count)| count).sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn RecordStore) -> Result<StoreStatistics, StorageError> {
    let active_records = storage.count_records_by_status(RecordStatus::Active)?;
    let deleted_records = storage.count_records_by_status(RecordStatus::Deleted)?;

    let mut changes_by_kind = Vec::new();
    for kind in [ChangeKind::New, ChangeKind::Updated, ChangeKind::Deleted] {
        changes_by_kind.push((kind, storage.count_changes_by_kind(kind)?));
    }

    Ok(StoreStatistics {
        active_records,
        deleted_records,
        changes_by_kind,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Records:");
    println!("  Active: {}", stats.active_records);
    println!("  Deleted: {}", stats.deleted_records);
    println!("  Total: {}", stats.total_records());
    println!();

    println!("Changelog ({} entries):", stats.total_changes());
    for (kind, count) in &stats.changes_by_kind {
        println!("  {}: {}", kind, count);
    }
    println!();

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  ID: {}", run.id);
            println!("  Status: {:?}", run.status);
            println!("  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Items: {} attempted, {} succeeded, {} failed",
                run.attempted, run.succeeded, run.failed
            );
            println!(
                "  Changes: {} new, {} updated, {} deleted",
                run.new_count, run.updated_count, run.deleted_count
            );
            if let Some(ms) = run.duration_ms {
                println!("  Duration: {:.1}s", ms as f64 / 1000.0);
            }
        }
        None => println!("No crawl runs recorded yet."),
    }
}
