use crate::ingest::ConnectorError;
use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage connection error: {0}")]
    Connection(String),
    #[error("Storage operation failed: {0}")]
    OperationFailed(String),
    #[error("Failed to encode or decode a stored payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Stored row is invalid: {0}")]
    InvalidData(String),
    #[error("Job log '{0}' was not found")]
    JobNotFound(String),
    #[error("Job log '{0}' already exists")]
    JobExists(String),
    #[error("Job log '{0}' is already closed")]
    JobAlreadyClosed(String),
    #[error("Job log '{job_id}' cannot be closed with status '{status}'")]
    InvalidClosure { job_id: String, status: String },
}

impl From<turso::Error> for StoreError {
    fn from(err: turso::Error) -> Self {
        StoreError::OperationFailed(err.to_string())
    }
}

/// Failure of the extraction stage for one source.
///
/// A source's extraction fails on the first connector or persistence failure.
/// Sibling sources are unaffected.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Connector for source '{source_id}' failed: {error}")]
    Connector {
        source_id: String,
        error: ConnectorError,
    },
    #[error("Persisting raw data for source '{source_id}' failed: {error}")]
    Persistence { source_id: String, error: StoreError },
    #[error("Persisting raw data for source '{source_id}' timed out after {timeout_secs}s")]
    PersistenceTimeout { source_id: String, timeout_secs: u64 },
}

impl ExtractionError {
    pub fn source_id(&self) -> &str {
        match self {
            ExtractionError::Connector { source_id, .. }
            | ExtractionError::Persistence { source_id, .. }
            | ExtractionError::PersistenceTimeout { source_id, .. } => source_id,
        }
    }
}

/// Per-record failure of the transformation stage. Never fatal to a batch.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Raw record '{raw_id}' has no usable text content")]
    MissingContent { raw_id: String },
    #[error("Raw record '{raw_id}' could not be derived: {reason}")]
    Derivation { raw_id: String, reason: String },
    #[error("Persisting processed data for raw record '{raw_id}' failed: {error}")]
    Persistence { raw_id: String, error: StoreError },
    #[error("Transforming raw record '{raw_id}' timed out after {timeout_secs}s")]
    Timeout { raw_id: String, timeout_secs: u64 },
}

/// Errors surfaced by `Orchestrator::run` to its trigger.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Another run holds the pipeline lease.
    #[error("An ETL run is already in progress")]
    AlreadyRunning,
    /// The run request names sources that are not configured, or is otherwise unusable.
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),
    /// The run was cancelled; its job log was closed as failed.
    #[error("ETL run '{job_id}' was cancelled")]
    Cancelled { job_id: String },
    /// The job log or the persistence layer is unavailable.
    #[error("ETL run could not start or finish: {0}")]
    Fatal(String),
}
