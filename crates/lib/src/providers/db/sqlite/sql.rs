//! # SQLite Specific SQL Queries
//!
//! This module centralizes SQL query strings for the SQLite provider.
//! This makes the core logic cleaner and isolates database-specific syntax.

pub const CREATE_RAW_DATA_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS raw_data (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        query TEXT,
        external_id TEXT,
        payload TEXT NOT NULL,
        extracted_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

pub const CREATE_RAW_DATA_SOURCE_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_raw_data_source_external_id
    ON raw_data (source, external_id);
";

pub const CREATE_PROCESSED_DATA_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS processed_data (
        id TEXT PRIMARY KEY,
        raw_id TEXT,
        source TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        relevance_score REAL NOT NULL,
        sentiment TEXT NOT NULL,
        payload TEXT NOT NULL,
        processed_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

pub const CREATE_PROCESSED_DATA_RAW_ID_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_processed_data_raw_id ON processed_data (raw_id);
";

pub const CREATE_ETL_LOGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS etl_logs (
        job_id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        records_processed INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

pub const CREATE_ETL_LEASES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS etl_leases (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        acquired_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );
";

/// Every statement needed to bring an empty database up to the current schema.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    CREATE_RAW_DATA_TABLE,
    CREATE_RAW_DATA_SOURCE_INDEX,
    CREATE_PROCESSED_DATA_TABLE,
    CREATE_PROCESSED_DATA_RAW_ID_INDEX,
    CREATE_ETL_LOGS_TABLE,
    CREATE_ETL_LEASES_TABLE,
];

pub const RAW_COLUMNS: &str =
    "id, source, query, external_id, payload, extracted_at, created_at, updated_at";

pub const PROCESSED_COLUMNS: &str = "id, raw_id, source, title, content, relevance_score, sentiment, payload, processed_at, created_at, updated_at";

pub const JOB_LOG_COLUMNS: &str =
    "job_id, job_type, status, start_time, end_time, records_processed, error_message, metadata";

pub const INSERT_RAW: &str = "
    INSERT INTO raw_data (id, source, query, external_id, payload, extracted_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
";

pub const RAW_EXISTS: &str =
    "SELECT 1 FROM raw_data WHERE source = ? AND external_id = ? LIMIT 1";

pub const INSERT_PROCESSED: &str = "
    INSERT INTO processed_data (id, raw_id, source, title, content, relevance_score, sentiment, payload, processed_at, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

pub const INSERT_JOB_LOG: &str = "
    INSERT INTO etl_logs (job_id, job_type, status, start_time, end_time, records_processed, error_message, metadata, created_at, updated_at)
    VALUES (?, ?, 'running', ?, NULL, 0, NULL, ?, ?, ?)
";

/// Closes a job log. Matches only while the log is still running.
pub const CLOSE_JOB_LOG: &str = "
    UPDATE etl_logs
    SET status = ?, end_time = ?, records_processed = ?, error_message = ?, metadata = ?, updated_at = ?
    WHERE job_id = ? AND status = 'running'
";

pub const DELETE_EXPIRED_LEASE: &str = "DELETE FROM etl_leases WHERE name = ? AND expires_at <= ?";

pub const INSERT_LEASE: &str = "
    INSERT INTO etl_leases (name, holder, acquired_at, expires_at)
    VALUES (?, ?, ?, ?)
";

pub const LEASE_HOLDER: &str = "SELECT holder FROM etl_leases WHERE name = ?";

pub const RENEW_LEASE: &str =
    "UPDATE etl_leases SET expires_at = ? WHERE name = ? AND holder = ?";

pub const RELEASE_LEASE: &str = "DELETE FROM etl_leases WHERE name = ? AND holder = ?";

pub const RAW_COUNTS_BY_SOURCE: &str =
    "SELECT source, COUNT(*) FROM raw_data GROUP BY source ORDER BY source";

pub const PROCESSED_STATS_BY_SOURCE: &str =
    "SELECT source, COUNT(*), AVG(relevance_score) FROM processed_data GROUP BY source ORDER BY source";

/// Returns the query listing raw records without a processed derivative.
///
/// Expects a single parameter (`?1`) for the source.
pub fn unprocessed_raw(limit: u32) -> String {
    format!(
        "
        SELECT r.id, r.source, r.query, r.external_id, r.payload, r.extracted_at, r.created_at, r.updated_at
        FROM raw_data r
        LEFT JOIN processed_data p ON p.raw_id = r.id
        WHERE r.source = ?1 AND p.id IS NULL
        ORDER BY r.created_at ASC
        LIMIT {limit};
    "
    )
}

/// Returns the raw listing query, filtered by source when `by_source` is set (`?1`).
pub fn list_raw(by_source: bool, limit: u32) -> String {
    let filter = if by_source { "WHERE source = ?1" } else { "" };
    format!("SELECT {RAW_COLUMNS} FROM raw_data {filter} ORDER BY created_at DESC LIMIT {limit};")
}

/// Returns the processed listing query, filtered by source when `by_source` is set (`?1`).
pub fn list_processed(by_source: bool, limit: u32) -> String {
    let filter = if by_source { "WHERE source = ?1" } else { "" };
    format!(
        "SELECT {PROCESSED_COLUMNS} FROM processed_data {filter} ORDER BY created_at DESC LIMIT {limit};"
    )
}

pub fn get_job_log() -> String {
    format!("SELECT {JOB_LOG_COLUMNS} FROM etl_logs WHERE job_id = ?1")
}

pub fn list_job_logs(limit: u32) -> String {
    format!("SELECT {JOB_LOG_COLUMNS} FROM etl_logs ORDER BY start_time DESC LIMIT {limit};")
}
