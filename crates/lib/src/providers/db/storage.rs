use crate::errors::StoreError;
use crate::types::{
    JobClosure, JobLog, JobType, NewProcessedRecord, NewRawRecord, ProcessedRecord, RawRecord,
    RecordFilter, SourceSummary,
};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;

/// The persistence contract the pipeline is written against.
///
/// This trait owns the three pipeline tables (raw data, processed data, job logs)
/// and the lease used to keep at most one orchestrated run active across every
/// process sharing the same store. Schema migration is not part of the contract.
#[async_trait]
pub trait PipelineStore: Send + Sync + Debug {
    /// Returns the name of the storage backend (e.g. "SQLite").
    fn name(&self) -> &str;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;

    // --- Raw data ---

    /// Appends a raw record and returns it with its assigned id and timestamps.
    async fn insert_raw(&self, record: &NewRawRecord) -> Result<RawRecord, StoreError>;

    /// Whether a raw record with this `(source, external_id)` already exists.
    async fn raw_exists(&self, source: &str, external_id: &str) -> Result<bool, StoreError>;

    /// Raw records of `source` that have no processed derivative, oldest first.
    async fn list_unprocessed_raw(
        &self,
        source: &str,
        limit: u32,
    ) -> Result<Vec<RawRecord>, StoreError>;

    /// Most recent raw records first.
    async fn list_raw(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, StoreError>;

    // --- Processed data ---

    async fn insert_processed(
        &self,
        record: &NewProcessedRecord,
    ) -> Result<ProcessedRecord, StoreError>;

    /// Most recent processed records first.
    async fn list_processed(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ProcessedRecord>, StoreError>;

    async fn source_summaries(&self) -> Result<Vec<SourceSummary>, StoreError>;

    // --- Job logs ---

    /// Creates a job log in the `running` state.
    async fn open_job_log(
        &self,
        job_id: &str,
        job_type: JobType,
        metadata: &Value,
    ) -> Result<JobLog, StoreError>;

    /// Applies the one terminal update to a running job log.
    ///
    /// Fails with [`StoreError::JobAlreadyClosed`] when the log is not running
    /// and with [`StoreError::JobNotFound`] when it does not exist.
    async fn close_job_log(&self, job_id: &str, closure: &JobClosure) -> Result<(), StoreError>;

    async fn get_job_log(&self, job_id: &str) -> Result<Option<JobLog>, StoreError>;

    /// Most recently started job logs first.
    async fn list_job_logs(&self, limit: u32) -> Result<Vec<JobLog>, StoreError>;

    // --- Run lease ---

    /// Takes the named lease for `holder` unless another holder has an unexpired one.
    /// Returns `false` when the lease is held elsewhere.
    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Pushes the expiry of `holder`'s lease to `ttl` from now.
    /// Returns `false` when `holder` no longer owns the lease.
    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Gives the lease up if `holder` still owns it.
    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError>;
}
