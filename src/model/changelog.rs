//! Append-only changelog entries

use crate::model::Record;
use chrono::{DateTime, Utc};
use std::fmt;

/// Kind of change detected for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_db_string().to_uppercase())
    }
}

/// Old and new rendering of a single changed field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

/// One detected change, never mutated once written
#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogEntry {
    /// Session that detected the change
    pub run_id: i64,
    pub source_url: String,
    /// Record name at detection time, for readability
    pub record_name: String,
    pub kind: ChangeKind,
    /// Empty for NEW and DELETED
    pub changes: Vec<FieldChange>,
    pub previous_fingerprint: Option<String>,
    pub new_fingerprint: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl ChangelogEntry {
    /// Entry for a record the store did not hold as active
    ///
    /// `previous_fingerprint` is set only when a soft-deleted record reappears.
    pub fn new_record(run_id: i64, record: &Record, previous_fingerprint: Option<String>) -> Self {
        Self {
            run_id,
            source_url: record.fields.source_url.clone(),
            record_name: record.fields.name.clone(),
            kind: ChangeKind::New,
            changes: Vec::new(),
            previous_fingerprint,
            new_fingerprint: Some(record.fingerprint.clone()),
            changed_at: Utc::now(),
        }
    }

    pub fn updated(
        run_id: i64,
        record: &Record,
        previous_fingerprint: String,
        changes: Vec<FieldChange>,
    ) -> Self {
        Self {
            run_id,
            source_url: record.fields.source_url.clone(),
            record_name: record.fields.name.clone(),
            kind: ChangeKind::Updated,
            changes,
            previous_fingerprint: Some(previous_fingerprint),
            new_fingerprint: Some(record.fingerprint.clone()),
            changed_at: Utc::now(),
        }
    }

    pub fn deleted(run_id: i64, stored: &Record) -> Self {
        Self {
            run_id,
            source_url: stored.fields.source_url.clone(),
            record_name: stored.fields.name.clone(),
            kind: ChangeKind::Deleted,
            changes: Vec::new(),
            previous_fingerprint: Some(stored.fingerprint.clone()),
            new_fingerprint: None,
            changed_at: Utc::now(),
        }
    }

    /// Names of the changed fields, in fingerprint order
    pub fn changed_fields(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.field.as_str()).collect()
    }
}
