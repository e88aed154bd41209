//! # Load / Logging Stage
//!
//! Processed data is already persisted by the transformation stage; this stage
//! is where a job's audit entry is opened when the job starts and closed, once,
//! with its aggregate statistics when it ends.

use crate::errors::StoreError;
use crate::providers::db::storage::PipelineStore;
use crate::types::{JobClosure, JobLog, JobStatus, JobType};
use serde_json::Value;
use tracing::error;

pub struct JobLogger<'a> {
    store: &'a dyn PipelineStore,
}

impl<'a> JobLogger<'a> {
    pub fn new(store: &'a dyn PipelineStore) -> Self {
        Self { store }
    }

    /// Opens a `running` job log.
    pub async fn open(
        &self,
        job_id: &str,
        job_type: JobType,
        metadata: Value,
    ) -> Result<JobLog, StoreError> {
        self.store.open_job_log(job_id, job_type, &metadata).await
    }

    /// Closes the job log as `completed`.
    pub async fn complete(
        &self,
        job_id: &str,
        records_processed: u64,
        metadata: Value,
    ) -> Result<(), StoreError> {
        let closure = JobClosure {
            status: JobStatus::Completed,
            records_processed,
            error_message: None,
            metadata,
        };
        self.store.close_job_log(job_id, &closure).await
    }

    /// Closes the job log as `failed` with the first fatal error of the job.
    pub async fn fail(
        &self,
        job_id: &str,
        records_processed: u64,
        error_message: &str,
        metadata: Value,
    ) -> Result<(), StoreError> {
        let closure = JobClosure {
            status: JobStatus::Failed,
            records_processed,
            error_message: Some(error_message.to_string()),
            metadata,
        };
        self.store.close_job_log(job_id, &closure).await.inspect_err(|e| {
            error!(job_id = %job_id, "Could not record job failure '{error_message}': {e}");
        })
    }
}
