//! Storage module for persisting crawl data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Current record state keyed by source URL, with soft deletion
//! - The append-only changelog and its per-field values
//! - Run tracking and parse-failure diagnostics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{RecordStore, StorageError, StorageResult};

use crate::model::{Record, SessionStatus};
use chrono::{DateTime, Utc};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Lifecycle status of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    Active,
    /// Missing from a complete frontier walk; kept for history
    Deleted,
}

impl RecordStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A record as currently held by the store
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record: Record,
    pub status: RecordStatus,
    pub first_seen_at: DateTime<Utc>,
    /// Last time the stored content changed (not merely re-crawled)
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: SessionStatus,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub new_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    pub duration_ms: Option<u64>,
}
