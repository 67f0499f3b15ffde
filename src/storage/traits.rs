//! Storage traits and error types
//!
//! This module defines the trait interface for record store backends and
//! associated error types.

use crate::crawler::Retryable;
use crate::model::{ChangeKind, ChangelogEntry, Record, SessionSummary};
use crate::storage::{RecordStatus, RunRecord, StoredRecord};
use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Retryable for StorageError {
    /// Lock contention and IO-level failures may clear up; everything else
    /// (constraint violations, bad SQL, corrupt rows) will not.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for record store implementations
///
/// The reconciler is the only writer during a session; implementations only
/// need to be `Send` so that they can be moved onto the reconciler thread.
/// Uniqueness of `source_url` must be enforced by the backend itself.
pub trait RecordStore {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Stores the final summary and status of a run
    fn finish_run(&mut self, summary: &SessionSummary) -> StorageResult<()>;

    /// Marks a run as failed after a session-fatal error
    fn fail_run(&mut self, run_id: i64) -> StorageResult<()>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Records =====

    /// Looks up a record by its source URL, whatever its status
    fn find_by_url(&self, url: &str) -> StorageResult<Option<StoredRecord>>;

    /// Inserts or replaces the record keyed by its source URL and marks it active
    fn upsert(&mut self, record: &Record) -> StorageResult<()>;

    /// Refreshes only the crawl timestamp of an unchanged record
    fn touch(&mut self, url: &str, crawled_at: DateTime<Utc>) -> StorageResult<()>;

    /// Soft-deletes a record; the row and its history stay in place
    fn mark_deleted(&mut self, url: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Source URLs of all active records
    fn list_known_urls(&self) -> StorageResult<HashSet<String>>;

    // ===== Changelog =====

    /// Appends a changelog entry and returns its ID
    fn insert_changelog_entry(&mut self, entry: &ChangelogEntry) -> StorageResult<i64>;

    /// Upserts a record and appends its entry, if any, in one transaction
    ///
    /// Either both writes land or neither does.
    fn apply_change(
        &mut self,
        record: &Record,
        entry: Option<&ChangelogEntry>,
    ) -> StorageResult<()>;

    /// Soft-deletes `entry.source_url` and appends the DELETED entry in one transaction
    fn apply_deletion(&mut self, entry: &ChangelogEntry, at: DateTime<Utc>) -> StorageResult<()>;

    /// All entries written by a run, in insertion order
    fn changelog_for_run(&self, run_id: i64) -> StorageResult<Vec<ChangelogEntry>>;

    /// Full history of one record, oldest first
    fn changelog_for_url(&self, url: &str) -> StorageResult<Vec<ChangelogEntry>>;

    // ===== Diagnostics =====

    /// Keeps the raw page of an item that failed to parse
    fn record_parse_failure(
        &mut self,
        run_id: i64,
        url: &str,
        error: &str,
        raw_snapshot: Option<&str>,
    ) -> StorageResult<()>;

    /// Number of parse failures recorded by a run
    fn count_parse_failures(&self, run_id: i64) -> StorageResult<u64>;

    // ===== Statistics =====

    /// Counts records by status
    fn count_records_by_status(&self, status: RecordStatus) -> StorageResult<u64>;

    /// Counts changelog entries of one kind across all runs
    fn count_changes_by_kind(&self, kind: ChangeKind) -> StorageResult<u64>;
}
