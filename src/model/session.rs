//! Summary handed back to whoever triggered a crawl session

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Final status of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session still in progress (only ever seen in the runs table)
    Running,
    /// Every attempted item succeeded
    Completed,
    /// Some, but not all, attempted items failed
    CompletedWithErrors,
    /// Stopped by the cancellation signal; reconciled results are kept
    Cancelled,
    /// Every attempted item failed, or a session-fatal error occurred
    Failed,
}

impl SessionStatus {
    /// Derives the status from the item counters
    pub fn classify(attempted: u64, succeeded: u64, failed: u64, cancelled: bool) -> Self {
        if cancelled {
            Self::Cancelled
        } else if attempted > 0 && succeeded == 0 {
            Self::Failed
        } else if failed > 0 {
            Self::CompletedWithErrors
        } else {
            Self::Completed
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_errors" => Some(Self::CompletedWithErrors),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Statistics of one crawl session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub run_id: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,

    /// Item URLs discovered by the frontier walk
    pub frontier_size: u64,
    /// Items that reached a terminal state this session
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Items left out because the store already knew them
    pub skipped: u64,

    pub new_count: u64,
    pub updated_count: u64,
    pub unchanged_count: u64,
    pub deleted_count: u64,

    /// Field name -> number of UPDATED entries that touched it
    pub fields_changed: BTreeMap<String, u64>,

    pub duration_ms: u64,
}
