//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordStore trait.

use crate::model::{
    ChangeKind, ChangelogEntry, FieldChange, Record, RecordFields, SessionStatus, SessionSummary,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{RecordStatus, RunRecord, StoredRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;

const RECORD_COLUMNS: &str = "source_url, name, description, category, price_excl_tax, \
     price_incl_tax, availability, review_count, image_url, rating, fingerprint, status, \
     first_seen_at, crawled_at, updated_at, raw_snapshot";

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status, attempted, \
     succeeded, failed, new_count, updated_count, deleted_count, duration_ms";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_changelog<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> StorageResult<Vec<ChangelogEntry>> {
        let sql = format!(
            "SELECT id, run_id, source_url, record_name, change_kind, previous_fingerprint,
                    new_fingerprint, changed_at
             FROM changelog WHERE {} ORDER BY id",
            filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, |row| {
                let kind_str: String = row.get(4)?;
                let kind = ChangeKind::from_db_string(&kind_str).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        Type::Text,
                        format!("unknown change kind '{}'", kind_str).into(),
                    )
                })?;
                let entry = ChangelogEntry {
                    run_id: row.get(1)?,
                    source_url: row.get(2)?,
                    record_name: row.get(3)?,
                    kind,
                    changes: Vec::new(),
                    previous_fingerprint: row.get(5)?,
                    new_fingerprint: row.get(6)?,
                    changed_at: parse_timestamp(7, row.get(7)?)?,
                };
                Ok((row.get::<_, i64>(0)?, entry))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut field_stmt = self.conn.prepare(
            "SELECT field, old_value, new_value FROM changelog_fields
             WHERE changelog_id = ?1 ORDER BY position",
        )?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, mut entry) in rows {
            entry.changes = field_stmt
                .query_map(params![id], |row| {
                    Ok(FieldChange {
                        field: row.get(0)?,
                        old: row.get(1)?,
                        new: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let fields = RecordFields {
        source_url: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        price_excl_tax: row.get(4)?,
        price_incl_tax: row.get(5)?,
        availability: row.get(6)?,
        review_count: row.get(7)?,
        image_url: row.get(8)?,
        rating: row.get(9)?,
    };

    let status_str: String = row.get(11)?;

    Ok(StoredRecord {
        record: Record {
            fields,
            fingerprint: row.get(10)?,
            crawled_at: parse_timestamp(13, row.get(13)?)?,
            raw_snapshot: row.get(15)?,
        },
        status: RecordStatus::from_db_string(&status_str).unwrap_or(RecordStatus::Active),
        first_seen_at: parse_timestamp(12, row.get(12)?)?,
        updated_at: parse_timestamp(14, row.get(14)?)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: SessionStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(SessionStatus::Running),
        attempted: row.get::<_, i64>(5)? as u64,
        succeeded: row.get::<_, i64>(6)? as u64,
        failed: row.get::<_, i64>(7)? as u64,
        new_count: row.get::<_, i64>(8)? as u64,
        updated_count: row.get::<_, i64>(9)? as u64,
        deleted_count: row.get::<_, i64>(10)? as u64,
        duration_ms: row.get::<_, Option<i64>>(11)?.map(|ms| ms as u64),
    })
}

fn upsert_record(conn: &Connection, record: &Record) -> StorageResult<()> {
    let f = &record.fields;
    let now = record.crawled_at.to_rfc3339();

    conn.execute(
        "INSERT INTO records (source_url, name, description, category, price_excl_tax,
            price_incl_tax, availability, review_count, image_url, rating, fingerprint,
            status, first_seen_at, crawled_at, updated_at, raw_snapshot)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13, ?14)
         ON CONFLICT(source_url) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            category = excluded.category,
            price_excl_tax = excluded.price_excl_tax,
            price_incl_tax = excluded.price_incl_tax,
            availability = excluded.availability,
            review_count = excluded.review_count,
            image_url = excluded.image_url,
            rating = excluded.rating,
            fingerprint = excluded.fingerprint,
            status = excluded.status,
            crawled_at = excluded.crawled_at,
            updated_at = excluded.updated_at,
            raw_snapshot = excluded.raw_snapshot",
        params![
            f.source_url,
            f.name,
            f.description,
            f.category,
            f.price_excl_tax,
            f.price_incl_tax,
            f.availability,
            f.review_count,
            f.image_url,
            f.rating,
            record.fingerprint,
            RecordStatus::Active.to_db_string(),
            now,
            record.raw_snapshot,
        ],
    )?;
    Ok(())
}

fn mark_record_deleted(conn: &Connection, url: &str, at: DateTime<Utc>) -> StorageResult<()> {
    let updated = conn.execute(
        "UPDATE records SET status = ?1, updated_at = ?2 WHERE source_url = ?3",
        params![RecordStatus::Deleted.to_db_string(), at.to_rfc3339(), url],
    )?;

    if updated == 0 {
        return Err(StorageError::RecordNotFound(url.to_string()));
    }
    Ok(())
}

/// Writes the entry row and its field rows; callers own the transaction
fn insert_entry(conn: &Connection, entry: &ChangelogEntry) -> StorageResult<i64> {
    conn.execute(
        "INSERT INTO changelog (run_id, source_url, record_name, change_kind,
            previous_fingerprint, new_fingerprint, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.run_id,
            entry.source_url,
            entry.record_name,
            entry.kind.to_db_string(),
            entry.previous_fingerprint,
            entry.new_fingerprint,
            entry.changed_at.to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT INTO changelog_fields (changelog_id, position, field, old_value, new_value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, change) in entry.changes.iter().enumerate() {
        stmt.execute(params![
            id,
            position as i64,
            change.field,
            change.old,
            change.new
        ])?;
    }

    Ok(id)
}

impl RecordStore for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, SessionStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, summary: &SessionSummary) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, frontier_size = ?3, attempted = ?4,
                succeeded = ?5, failed = ?6, skipped = ?7, new_count = ?8, updated_count = ?9,
                unchanged_count = ?10, deleted_count = ?11, duration_ms = ?12
             WHERE id = ?13",
            params![
                now,
                summary.status.to_db_string(),
                summary.frontier_size as i64,
                summary.attempted as i64,
                summary.succeeded as i64,
                summary.failed as i64,
                summary.skipped as i64,
                summary.new_count as i64,
                summary.updated_count as i64,
                summary.unchanged_count as i64,
                summary.deleted_count as i64,
                summary.duration_ms as i64,
                summary.run_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(summary.run_id));
        }
        Ok(())
    }

    fn fail_run(&mut self, run_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2 WHERE id = ?3",
            params![now, SessionStatus::Failed.to_db_string(), run_id],
        )?;
        Ok(())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        let run = self.conn.query_row(&sql, [], row_to_run).optional()?;
        Ok(run)
    }

    // ===== Records =====

    fn find_by_url(&self, url: &str) -> StorageResult<Option<StoredRecord>> {
        let sql = format!("SELECT {} FROM records WHERE source_url = ?1", RECORD_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![url], row_to_stored)
            .optional()?;
        Ok(record)
    }

    fn upsert(&mut self, record: &Record) -> StorageResult<()> {
        upsert_record(&self.conn, record)
    }

    fn touch(&mut self, url: &str, crawled_at: DateTime<Utc>) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE records SET crawled_at = ?1 WHERE source_url = ?2",
            params![crawled_at.to_rfc3339(), url],
        )?;

        if updated == 0 {
            return Err(StorageError::RecordNotFound(url.to_string()));
        }
        Ok(())
    }

    fn mark_deleted(&mut self, url: &str, at: DateTime<Utc>) -> StorageResult<()> {
        mark_record_deleted(&self.conn, url, at)
    }

    fn list_known_urls(&self) -> StorageResult<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source_url FROM records WHERE status = ?1")?;

        let urls = stmt
            .query_map(params![RecordStatus::Active.to_db_string()], |row| {
                row.get(0)
            })?
            .collect::<Result<HashSet<String>, _>>()?;

        Ok(urls)
    }

    // ===== Changelog =====

    fn insert_changelog_entry(&mut self, entry: &ChangelogEntry) -> StorageResult<i64> {
        let tx = self.conn.transaction()?;
        let id = insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(id)
    }

    fn apply_change(
        &mut self,
        record: &Record,
        entry: Option<&ChangelogEntry>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        upsert_record(&tx, record)?;
        if let Some(entry) = entry {
            insert_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_deletion(&mut self, entry: &ChangelogEntry, at: DateTime<Utc>) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        mark_record_deleted(&tx, &entry.source_url, at)?;
        insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(())
    }

    fn changelog_for_run(&self, run_id: i64) -> StorageResult<Vec<ChangelogEntry>> {
        self.query_changelog("run_id = ?1", params![run_id])
    }

    fn changelog_for_url(&self, url: &str) -> StorageResult<Vec<ChangelogEntry>> {
        self.query_changelog("source_url = ?1", params![url])
    }

    // ===== Diagnostics =====

    fn record_parse_failure(
        &mut self,
        run_id: i64,
        url: &str,
        error: &str,
        raw_snapshot: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO parse_failures (run_id, source_url, error, raw_snapshot, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, url, error, raw_snapshot, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn count_parse_failures(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM parse_failures WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    fn count_records_by_status(&self, status: RecordStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_changes_by_kind(&self, kind: ChangeKind) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM changelog WHERE change_kind = ?1",
            params![kind.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
