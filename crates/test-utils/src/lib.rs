use anyhow::Result;
use async_trait::async_trait;
use covidkm::errors::StoreError;
use covidkm::{
    ConnectorError, JobClosure, JobLog, JobType, NewProcessedRecord, NewRawRecord, PipelineStore,
    ProcessedRecord, RawDocument, RawRecord, RecordFilter, SourceConnector, SourceSummary,
    SqliteProvider,
};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// --- Test Setup ---

/// A helper struct to manage store creation for each test.
pub struct TestSetup {
    pub store: Arc<SqliteProvider>,
}

impl TestSetup {
    /// Creates a new, isolated in-memory database and initializes the schema.
    pub async fn new() -> Result<Self> {
        let store = SqliteProvider::new(":memory:").await?;
        store.initialize_schema().await?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// The store as the trait object the pipeline is written against.
    pub fn pipeline_store(&self) -> Arc<dyn PipelineStore> {
        self.store.clone()
    }
}

/// A news-like document with a title and a description.
pub fn doc(external_id: &str, title: &str) -> RawDocument {
    RawDocument::new(
        external_id,
        json!({
            "title": title,
            "description": format!("{title}: covid-19 vaccine update from the health ministry."),
        }),
    )
}

// --- Mock Connector ---

/// Lets a test hold a connector inside `fetch` until it decides to release it.
#[derive(Debug, Default)]
pub struct Gate {
    started: Notify,
    release: Notify,
}

impl Gate {
    /// Resolves once the gated connector has entered `fetch`.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Clone)]
enum Script {
    Documents(Vec<RawDocument>),
    Failure(ConnectorError),
}

/// A connector that returns scripted documents or a scripted error.
#[derive(Debug, Clone)]
pub struct MockConnector {
    source: String,
    script: Arc<Mutex<Script>>,
    gate: Option<Arc<Gate>>,
    delay: Option<Duration>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn returning(source: &str, documents: Vec<RawDocument>) -> Self {
        Self::with_script(source, Script::Documents(documents))
    }

    pub fn failing(source: &str, error: ConnectorError) -> Self {
        Self::with_script(source, Script::Failure(error))
    }

    fn with_script(source: &str, script: Script) -> Self {
        Self {
            source: source.to_string(),
            script: Arc::new(Mutex::new(script)),
            gate: None,
            delay: None,
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Blocks every `fetch` on the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Sleeps before answering, to exercise timeouts.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the documents returned by subsequent calls.
    pub fn set_documents(&self, documents: Vec<RawDocument>) {
        *self.script.lock().unwrap() = Script::Documents(documents);
    }

    /// The queries received so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceConnector for MockConnector {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self, query: &str) -> Result<Vec<RawDocument>, ConnectorError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Documents(documents) => Ok(documents),
            Script::Failure(error) => Err(error),
        }
    }
}

// --- Faulty Store ---

/// Wraps a real store and fails selected operations on demand.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn PipelineStore>,
    open_job_log: AtomicBool,
    close_job_log: AtomicBool,
    close_job_log_once: AtomicBool,
    lose_lease: AtomicBool,
    lease_delay: Mutex<Option<Duration>>,
    insert_processed: AtomicBool,
    insert_raw_source: Mutex<Option<String>>,
    open_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn PipelineStore>) -> Self {
        Self {
            inner,
            open_job_log: AtomicBool::new(false),
            close_job_log: AtomicBool::new(false),
            close_job_log_once: AtomicBool::new(false),
            lose_lease: AtomicBool::new(false),
            lease_delay: Mutex::new(None),
            insert_processed: AtomicBool::new(false),
            insert_raw_source: Mutex::new(None),
            open_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_open_job_log(&self, fail: bool) {
        self.open_job_log.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close_job_log(&self, fail: bool) {
        self.close_job_log.store(fail, Ordering::SeqCst);
    }

    /// Fails the next `close_job_log` only; later closes reach the inner store.
    pub fn fail_next_close_job_log(&self) {
        self.close_job_log_once.store(true, Ordering::SeqCst);
    }

    /// Makes lease renewal report that another holder took the lease.
    pub fn lose_lease(&self, lost: bool) {
        self.lose_lease.store(lost, Ordering::SeqCst);
    }

    /// Sleeps before acquiring the lease.
    pub fn delay_lease(&self, delay: Option<Duration>) {
        *self.lease_delay.lock().unwrap() = delay;
    }

    pub fn fail_insert_processed(&self, fail: bool) {
        self.insert_processed.store(fail, Ordering::SeqCst);
    }

    /// Fails raw inserts for `source` only.
    pub fn fail_insert_raw_for(&self, source: Option<&str>) {
        *self.insert_raw_source.lock().unwrap() = source.map(str::to_string);
    }

    pub fn open_job_log_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    fn injected(operation: &str) -> StoreError {
        StoreError::OperationFailed(format!("injected failure in {operation}"))
    }
}

#[async_trait]
impl PipelineStore for FaultyStore {
    fn name(&self) -> &str {
        "Faulty"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn insert_raw(&self, record: &NewRawRecord) -> Result<RawRecord, StoreError> {
        let failing = self.insert_raw_source.lock().unwrap().clone();
        if failing.as_deref() == Some(record.source.as_str()) {
            return Err(Self::injected("insert_raw"));
        }
        self.inner.insert_raw(record).await
    }

    async fn raw_exists(&self, source: &str, external_id: &str) -> Result<bool, StoreError> {
        self.inner.raw_exists(source, external_id).await
    }

    async fn list_unprocessed_raw(
        &self,
        source: &str,
        limit: u32,
    ) -> Result<Vec<RawRecord>, StoreError> {
        self.inner.list_unprocessed_raw(source, limit).await
    }

    async fn list_raw(&self, filter: &RecordFilter) -> Result<Vec<RawRecord>, StoreError> {
        self.inner.list_raw(filter).await
    }

    async fn insert_processed(
        &self,
        record: &NewProcessedRecord,
    ) -> Result<ProcessedRecord, StoreError> {
        if self.insert_processed.load(Ordering::SeqCst) {
            return Err(Self::injected("insert_processed"));
        }
        self.inner.insert_processed(record).await
    }

    async fn list_processed(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ProcessedRecord>, StoreError> {
        self.inner.list_processed(filter).await
    }

    async fn source_summaries(&self) -> Result<Vec<SourceSummary>, StoreError> {
        self.inner.source_summaries().await
    }

    async fn open_job_log(
        &self,
        job_id: &str,
        job_type: JobType,
        metadata: &Value,
    ) -> Result<JobLog, StoreError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.open_job_log.load(Ordering::SeqCst) {
            return Err(Self::injected("open_job_log"));
        }
        self.inner.open_job_log(job_id, job_type, metadata).await
    }

    async fn close_job_log(&self, job_id: &str, closure: &JobClosure) -> Result<(), StoreError> {
        if self.close_job_log.load(Ordering::SeqCst)
            || self.close_job_log_once.swap(false, Ordering::SeqCst)
        {
            return Err(Self::injected("close_job_log"));
        }
        self.inner.close_job_log(job_id, closure).await
    }

    async fn get_job_log(&self, job_id: &str) -> Result<Option<JobLog>, StoreError> {
        self.inner.get_job_log(job_id).await
    }

    async fn list_job_logs(&self, limit: u32) -> Result<Vec<JobLog>, StoreError> {
        self.inner.list_job_logs(limit).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let delay = *self.lease_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.try_acquire_lease(name, holder, ttl).await
    }

    async fn renew_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if self.lose_lease.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.renew_lease(name, holder, ttl).await
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<(), StoreError> {
        self.inner.release_lease(name, holder).await
    }
}
