//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Catalog-Watch record store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl session
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    frontier_size INTEGER NOT NULL DEFAULT 0,
    attempted INTEGER NOT NULL DEFAULT 0,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    new_count INTEGER NOT NULL DEFAULT 0,
    updated_count INTEGER NOT NULL DEFAULT 0,
    unchanged_count INTEGER NOT NULL DEFAULT 0,
    deleted_count INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER
);

-- Current state of every record ever seen; source_url is the natural key
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    category TEXT NOT NULL,
    price_excl_tax REAL NOT NULL,
    price_incl_tax REAL NOT NULL,
    availability TEXT NOT NULL,
    review_count INTEGER NOT NULL DEFAULT 0,
    image_url TEXT,
    rating INTEGER,
    fingerprint TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    first_seen_at TEXT NOT NULL,
    crawled_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    raw_snapshot TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);

-- Append-only change history
CREATE TABLE IF NOT EXISTS changelog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    source_url TEXT NOT NULL,
    record_name TEXT NOT NULL,
    change_kind TEXT NOT NULL,
    previous_fingerprint TEXT,
    new_fingerprint TEXT,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changelog_run ON changelog(run_id);
CREATE INDEX IF NOT EXISTS idx_changelog_url ON changelog(source_url);
CREATE INDEX IF NOT EXISTS idx_changelog_kind ON changelog(change_kind);

-- Per-field old/new values of UPDATED entries
CREATE TABLE IF NOT EXISTS changelog_fields (
    changelog_id INTEGER NOT NULL REFERENCES changelog(id),
    position INTEGER NOT NULL,
    field TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    PRIMARY KEY (changelog_id, position)
);

-- Pages that were fetched but could not be turned into records
CREATE TABLE IF NOT EXISTS parse_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    source_url TEXT NOT NULL,
    error TEXT NOT NULL,
    raw_snapshot TEXT,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parse_failures_run ON parse_failures(run_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["runs", "records", "changelog", "changelog_fields", "parse_failures"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_source_url_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO records (source_url, name, category, price_excl_tax,
            price_incl_tax, availability, fingerprint, first_seen_at, crawled_at, updated_at)
            VALUES ('https://x/1', 'n', 'c', 1.0, 1.0, 'a', 'f', 't', 't', 't')";

        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
