use crate::{
    errors::StoreError,
    providers::db::storage::PipelineStore,
    types::{
        JobClosure, JobLog, JobStatus, JobType, NewProcessedRecord, NewRawRecord,
        ProcessedRecord, RawRecord, RecordFilter, RelevanceScore, SourceSummary,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use turso::{params, Connection, Database, Row, Value as TursoValue};
use uuid::Uuid;

pub mod sql;

/// A provider for the pipeline tables backed by a local SQLite database using Turso.
///
/// This provider holds a `Database` instance. When cloned, it shares the same
/// underlying database, so an in-memory instance can be shared between the
/// orchestrator and the API handlers. Statements are issued one at a time
/// through an internal lock, which keeps every write single-writer.
#[derive(Clone)]
pub struct SqliteProvider {
    /// The Turso database instance. It's cloneable and thread-safe.
    pub db: Database,
    lock: Arc<Mutex<()>>,
}

impl SqliteProvider {
    /// Creates a new `SqliteProvider` from a file path or in-memory.
    ///
    /// # Arguments
    ///
    /// * `db_path`: The path to the SQLite database file. Use ":memory:" for a unique,
    ///   isolated in-memory database. To share it, `.clone()` the provider.
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        // Use `query` for PRAGMA statements that return a value to avoid "unexpected row" errors.
        conn.query("PRAGMA journal_mode=WAL;", ())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            db,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Ensures that all pipeline tables and indexes exist.
    /// This function is idempotent and safe to call on every application startup.
    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        for statement in sql::ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ()).await?;
        }
        info!("Pipeline schema is up to date.");
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        self.db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteProvider").finish_non_exhaustive()
    }
}

impl AsRef<Database> for SqliteProvider {
    fn as_ref(&self) -> &Database {
        &self.db
    }
}

// --- Column encoding ---

/// Timestamps are stored as fixed-width RFC 3339 strings so they sort lexically.
fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn nullable(value: Option<&str>) -> TursoValue {
    value.map_or(TursoValue::Null, |s| TursoValue::Text(s.to_string()))
}

fn text(row: &Row, idx: usize) -> Result<String, StoreError> {
    match row.get_value(idx)? {
        TursoValue::Text(s) => Ok(s),
        other => Err(StoreError::InvalidData(format!(
            "expected text in column {idx}, found {other:?}"
        ))),
    }
}

fn opt_text(row: &Row, idx: usize) -> Result<Option<String>, StoreError> {
    match row.get_value(idx)? {
        TursoValue::Null => Ok(None),
        TursoValue::Text(s) => Ok(Some(s)),
        other => Err(StoreError::InvalidData(format!(
            "expected nullable text in column {idx}, found {other:?}"
        ))),
    }
}

fn integer(row: &Row, idx: usize) -> Result<i64, StoreError> {
    match row.get_value(idx)? {
        TursoValue::Integer(i) => Ok(i),
        other => Err(StoreError::InvalidData(format!(
            "expected integer in column {idx}, found {other:?}"
        ))),
    }
}

fn opt_real(row: &Row, idx: usize) -> Result<Option<f64>, StoreError> {
    match row.get_value(idx)? {
        TursoValue::Null => Ok(None),
        TursoValue::Real(f) => Ok(Some(f)),
        TursoValue::Integer(i) => Ok(Some(i as f64)),
        other => Err(StoreError::InvalidData(format!(
            "expected real in column {idx}, found {other:?}"
        ))),
    }
}

fn timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}

fn json(raw: &str) -> Result<Value, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

fn raw_from_row(row: &Row) -> Result<RawRecord, StoreError> {
    Ok(RawRecord {
        id: text(row, 0)?,
        source: text(row, 1)?,
        query: opt_text(row, 2)?,
        external_id: opt_text(row, 3)?,
        payload: json(&text(row, 4)?)?,
        extracted_at: timestamp(&text(row, 5)?)?,
        created_at: timestamp(&text(row, 6)?)?,
        updated_at: timestamp(&text(row, 7)?)?,
    })
}

fn processed_from_row(row: &Row) -> Result<ProcessedRecord, StoreError> {
    let score = opt_real(row, 5)?.unwrap_or_default();
    let sentiment = text(row, 6)?;
    Ok(ProcessedRecord {
        id: text(row, 0)?,
        raw_id: opt_text(row, 1)?,
        source: text(row, 2)?,
        title: text(row, 3)?,
        content: text(row, 4)?,
        relevance_score: RelevanceScore::try_from(score).map_err(StoreError::InvalidData)?,
        sentiment: sentiment.parse().map_err(StoreError::InvalidData)?,
        payload: json(&text(row, 7)?)?,
        processed_at: timestamp(&text(row, 8)?)?,
        created_at: timestamp(&text(row, 9)?)?,
        updated_at: timestamp(&text(row, 10)?)?,
    })
}

fn job_log_from_row(row: &Row) -> Result<JobLog, StoreError> {
    let job_type: JobType = text(row, 1)?.parse().map_err(StoreError::InvalidData)?;
    let status: JobStatus = text(row, 2)?.parse().map_err(StoreError::InvalidData)?;
    Ok(JobLog {
        job_id: text(row, 0)?,
        job_type,
        status,
        start_time: timestamp(&text(row, 3)?)?,
        end_time: opt_text(row, 4)?.as_deref().map(timestamp).transpose()?,
        records_processed: integer(row, 5)?.max(0) as u64,
        error_message: opt_text(row, 6)?,
        metadata: json(&text(row, 7)?)?,
    })
}

#[async_trait]
impl PipelineStore for SqliteProvider {
    fn name(&self) -> &str {
        "SQLite"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut rows = conn.query("SELECT 1", ()).await?;
        rows.next().await?;
        Ok(())
    }

    async fn insert_raw(&self, record: &NewRawRecord) -> Result<RawRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let payload = serde_json::to_string(&record.payload)?;

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.execute(
            sql::INSERT_RAW,
            params![
                id.clone(),
                record.source.clone(),
                nullable(record.query.as_deref()),
                nullable(record.external_id.as_deref()),
                payload,
                ts(&record.extracted_at),
                ts(&now),
                ts(&now)
            ],
        )
        .await?;
        debug!(raw_id = %id, source = %record.source, "Inserted raw record.");

        Ok(RawRecord {
            id,
            source: record.source.clone(),
            query: record.query.clone(),
            external_id: record.external_id.clone(),
            payload: record.payload.clone(),
            extracted_at: record.extracted_at,
            created_at: now,
            updated_at: now,
        })
    }

    async fn raw_exists(&self, source: &str, external_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut rows = conn
            .query(sql::RAW_EXISTS, params![source, external_id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn list_unprocessed_raw(
        &self,
        source: &str,
        limit: u32,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut rows = conn
            .query(&sql::unprocessed_raw(limit), params![source])
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(raw_from_row(&row)?);
        }
        Ok(records)
    }

    async fn list_raw(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let query = sql::list_raw(filter.source.is_some(), filter.limit);
        let mut rows = match &filter.source {
            Some(source) => conn.query(&query, params![source.as_str()]).await?,
            None => conn.query(&query, ()).await?,
        };
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(raw_from_row(&row)?);
        }
        Ok(records)
    }

    async fn insert_processed(
        &self,
        record: &NewProcessedRecord,
    ) -> Result<ProcessedRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let fields = &record.fields;
        let payload = serde_json::to_string(&fields.payload)?;

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.execute(
            sql::INSERT_PROCESSED,
            params![
                id.clone(),
                record.raw_id.clone(),
                record.source.clone(),
                fields.title.clone(),
                fields.content.clone(),
                fields.relevance_score.value(),
                fields.sentiment.as_str(),
                payload,
                ts(&record.processed_at),
                ts(&now),
                ts(&now)
            ],
        )
        .await?;
        debug!(processed_id = %id, raw_id = %record.raw_id, "Inserted processed record.");

        Ok(ProcessedRecord {
            id,
            raw_id: Some(record.raw_id.clone()),
            source: record.source.clone(),
            title: fields.title.clone(),
            content: fields.content.clone(),
            relevance_score: fields.relevance_score,
            sentiment: fields.sentiment,
            payload: fields.payload.clone(),
            processed_at: record.processed_at,
            created_at: now,
            updated_at: now,
        })
    }

    async fn list_processed(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ProcessedRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let query = sql::list_processed(filter.source.is_some(), filter.limit);
        let mut rows = match &filter.source {
            Some(source) => conn.query(&query, params![source.as_str()]).await?,
            None => conn.query(&query, ()).await?,
        };
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(processed_from_row(&row)?);
        }
        Ok(records)
    }

    async fn source_summaries(&self) -> Result<Vec<SourceSummary>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut summaries: BTreeMap<String, SourceSummary> = BTreeMap::new();

        let mut rows = conn.query(sql::RAW_COUNTS_BY_SOURCE, ()).await?;
        while let Some(row) = rows.next().await? {
            let source = text(&row, 0)?;
            let entry = summaries.entry(source.clone()).or_insert_with(|| SourceSummary {
                source,
                ..Default::default()
            });
            entry.raw_records = integer(&row, 1)?.max(0) as u64;
        }

        let mut rows = conn.query(sql::PROCESSED_STATS_BY_SOURCE, ()).await?;
        while let Some(row) = rows.next().await? {
            let source = text(&row, 0)?;
            let entry = summaries.entry(source.clone()).or_insert_with(|| SourceSummary {
                source,
                ..Default::default()
            });
            entry.processed_records = integer(&row, 1)?.max(0) as u64;
            entry.average_relevance = opt_real(&row, 2)?;
        }

        Ok(summaries.into_values().collect())
    }

    async fn open_job_log(
        &self,
        job_id: &str,
        job_type: JobType,
        metadata: &Value,
    ) -> Result<JobLog, StoreError> {
        let now = Utc::now();
        let metadata_json = serde_json::to_string(metadata)?;

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.execute(
            sql::INSERT_JOB_LOG,
            params![
                job_id,
                job_type.as_str(),
                ts(&now),
                metadata_json,
                ts(&now),
                ts(&now)
            ],
        )
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                StoreError::JobExists(job_id.to_string())
            } else {
                e.into()
            }
        })?;
        info!(job_id = %job_id, job_type = job_type.as_str(), "Opened job log.");

        Ok(JobLog {
            job_id: job_id.to_string(),
            job_type,
            status: JobStatus::Running,
            start_time: now,
            end_time: None,
            records_processed: 0,
            error_message: None,
            metadata: metadata.clone(),
        })
    }

    async fn close_job_log(&self, job_id: &str, closure: &JobClosure) -> Result<(), StoreError> {
        if closure.status == JobStatus::Running {
            return Err(StoreError::InvalidClosure {
                job_id: job_id.to_string(),
                status: closure.status.as_str().to_string(),
            });
        }
        let now = Utc::now();
        let metadata_json = serde_json::to_string(&closure.metadata)?;
        let records = i64::try_from(closure.records_processed).unwrap_or(i64::MAX);

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let changes = conn
            .execute(
                sql::CLOSE_JOB_LOG,
                params![
                    closure.status.as_str(),
                    ts(&now),
                    records,
                    nullable(closure.error_message.as_deref()),
                    metadata_json,
                    ts(&now),
                    job_id
                ],
            )
            .await?;

        if changes == 0 {
            let mut rows = conn.query(&sql::get_job_log(), params![job_id]).await?;
            return match rows.next().await? {
                Some(_) => Err(StoreError::JobAlreadyClosed(job_id.to_string())),
                None => Err(StoreError::JobNotFound(job_id.to_string())),
            };
        }
        info!(
            job_id = %job_id,
            status = closure.status.as_str(),
            records_processed = closure.records_processed,
            "Closed job log."
        );
        Ok(())
    }

    async fn get_job_log(&self, job_id: &str) -> Result<Option<JobLog>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut rows = conn.query(&sql::get_job_log(), params![job_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(job_log_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_job_logs(&self, limit: u32) -> Result<Vec<JobLog>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let mut rows = conn.query(&sql::list_job_logs(limit), ()).await?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next().await? {
            logs.push(job_log_from_row(&row)?);
        }
        Ok(logs)
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::InvalidData(format!("lease ttl out of range: {e}")))?;
        let expires_at = now + ttl;

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let expired = conn
            .execute(sql::DELETE_EXPIRED_LEASE, params![name, ts(&now)])
            .await?;
        if expired > 0 {
            info!(lease = %name, "Reclaimed an expired run lease.");
        }
        let mut rows = conn.query(sql::LEASE_HOLDER, params![name]).await?;
        if let Some(row) = rows.next().await? {
            debug!(lease = %name, holder = %text(&row, 0)?, "Run lease is held elsewhere.");
            return Ok(false);
        }
        drop(rows);

        match conn
            .execute(
                sql::INSERT_LEASE,
                params![name, holder, ts(&now), ts(&expires_at)],
            )
            .await
        {
            Ok(_) => Ok(true),
            // Another process inserted the row between the lookup and the insert.
            Err(e) if e.to_string().contains("UNIQUE") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::InvalidData(format!("lease ttl out of range: {e}")))?;
        let expires_at = Utc::now() + ttl;

        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let renewed = conn
            .execute(sql::RENEW_LEASE, params![ts(&expires_at), name, holder])
            .await?;
        Ok(renewed > 0)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.execute(sql::RELEASE_LEASE, params![name, holder])
            .await?;
        Ok(())
    }
}
