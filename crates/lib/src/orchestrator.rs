//! # Orchestrator
//!
//! Sequences extraction then transformation for every configured source and
//! aggregates the per-source outcomes into one [`RunResult`].
//!
//! A run moves `Idle → Running → {Completed, Failed}`:
//!
//! - At most one run is active. An in-process guard rejects overlapping triggers
//!   on this instance and a lease row in the store rejects them across instances.
//!   Either way the second trigger gets [`OrchestrationError::AlreadyRunning`].
//!   The lease is renewed while the run is active; losing it fails the run.
//! - Sources are processed in parallel up to `concurrency`. A failing source is
//!   recorded in its [`SourceOutcome`] and never stops its siblings.
//! - The job log is opened before any source is touched and closed exactly once
//!   after the per-source results are merged. If it cannot be opened nothing runs.
//! - A cancelled run closes its job log as failed with `"run cancelled"`.

use crate::config::{PipelineConfig, PipelineConfigError};
use crate::constants::{CANCELLED_MESSAGE, ETL_PIPELINE_LEASE, LEASE_LOST_MESSAGE};
use crate::errors::{OrchestrationError, StoreError};
use crate::ingest::{ExtractionStage, SourceConnector};
use crate::joblog::JobLogger;
use crate::providers::db::storage::PipelineStore;
use crate::transform::{rules::RuleBasedDeriver, Deriver, TransformationStage};
use crate::types::{
    JobStatus, JobType, OrchestratorState, RunRequest, RunResult, SourceOutcome, SourceStatus,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// --- Cancellation ---

/// Requests cancellation of the run holding the matching [`CancelSignal`].
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// The receiving side of a cancellation request, observed at every await point of a run.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

// --- Builder ---

#[derive(Error, Debug)]
pub enum OrchestratorBuildError {
    #[error("A pipeline store is required")]
    MissingStore,
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(#[from] PipelineConfigError),
    #[error("Source '{0}' is enabled but no connector was registered for it")]
    MissingConnector(String),
    #[error("More than one connector was registered for source '{0}'")]
    DuplicateConnector(String),
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn PipelineStore>>,
    connectors: Vec<Arc<dyn SourceConnector>>,
    deriver: Option<Arc<dyn Deriver>>,
    config: PipelineConfig,
    instance_id: Option<String>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn SourceConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn connectors(mut self, connectors: impl IntoIterator<Item = Arc<dyn SourceConnector>>) -> Self {
        self.connectors.extend(connectors);
        self
    }

    /// Overrides the default [`RuleBasedDeriver`].
    pub fn deriver(mut self, deriver: Arc<dyn Deriver>) -> Self {
        self.deriver = Some(deriver);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Names this process in lease rows and job metadata. Defaults to a random id.
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Validates the configuration and orders the connectors by `config.sources`.
    ///
    /// Connectors registered for sources that are not enabled are dropped.
    pub fn build(self) -> Result<Orchestrator, OrchestratorBuildError> {
        let store = self.store.ok_or(OrchestratorBuildError::MissingStore)?;
        self.config.validate()?;

        let mut seen = HashSet::new();
        for connector in &self.connectors {
            if !seen.insert(connector.source().to_string()) {
                return Err(OrchestratorBuildError::DuplicateConnector(
                    connector.source().to_string(),
                ));
            }
        }

        let mut connectors = Vec::with_capacity(self.config.sources.len());
        for source in &self.config.sources {
            let connector = self
                .connectors
                .iter()
                .find(|c| c.source() == source)
                .cloned()
                .ok_or_else(|| OrchestratorBuildError::MissingConnector(source.clone()))?;
            connectors.push(connector);
        }
        for ignored in seen.iter().filter(|s| !self.config.sources.contains(*s)) {
            debug!(source = %ignored, "Connector registered for a disabled source; ignoring it.");
        }

        Ok(Orchestrator {
            store,
            connectors,
            deriver: self
                .deriver
                .unwrap_or_else(|| Arc::new(RuleBasedDeriver::new())),
            config: self.config,
            instance_id: self
                .instance_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            run_guard: Mutex::new(()),
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        })
    }
}

// --- Orchestrator ---

pub struct Orchestrator {
    store: Arc<dyn PipelineStore>,
    connectors: Vec<Arc<dyn SourceConnector>>,
    deriver: Arc<dyn Deriver>,
    config: PipelineConfig,
    instance_id: String,
    run_guard: Mutex<()>,
    running: AtomicBool,
    active: Mutex<Option<CancelHandle>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    /// Whether this instance currently has a run in progress.
    pub fn state(&self) -> OrchestratorState {
        if self.running.load(Ordering::Acquire) {
            OrchestratorState::Running
        } else {
            OrchestratorState::Idle
        }
    }

    /// Asks the active run on this instance to stop. Returns `false` when idle.
    pub async fn cancel(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(handle) => {
                info!("Cancellation requested for the active run.");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs the pipeline once for every requested source.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult, OrchestrationError> {
        let (handle, signal) = cancel_pair();
        self.run_with_cancel(request, handle, signal).await
    }

    /// Like [`Orchestrator::run`], observing a caller-provided cancellation pair.
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        handle: CancelHandle,
        mut signal: CancelSignal,
    ) -> Result<RunResult, OrchestrationError> {
        let connectors = self.select_connectors(request.sources.as_deref())?;
        let query = request
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| self.config.default_query.clone());
        let job_id = request
            .job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let _guard = self.run_guard.try_lock().map_err(|_| {
            info!("Rejecting run trigger: a run is already active on this instance.");
            OrchestrationError::AlreadyRunning
        })?;
        let _running = RunningFlag::raise(&self.running);

        *self.active.lock().await = Some(handle);
        let result = self
            .run_exclusive(&job_id, &query, connectors, &mut signal)
            .await;
        *self.active.lock().await = None;
        result
    }

    /// Takes the cross-instance lease, executes the run and gives the lease back.
    async fn run_exclusive(
        &self,
        job_id: &str,
        query: &str,
        connectors: Vec<Arc<dyn SourceConnector>>,
        signal: &mut CancelSignal,
    ) -> Result<RunResult, OrchestrationError> {
        let timeout = self.config.timeout();
        let existing = bounded(timeout, self.store.get_job_log(job_id))
            .await
            .map_err(|e| OrchestrationError::Fatal(format!("cannot look up job log: {e}")))?;
        if existing.is_some() {
            return Err(job_id_taken(job_id));
        }

        let holder = format!("{}:{}", self.instance_id, job_id);
        let acquired = bounded(
            timeout,
            self.store
                .try_acquire_lease(ETL_PIPELINE_LEASE, &holder, self.config.lease_ttl()),
        )
        .await
        .map_err(|e| OrchestrationError::Fatal(format!("cannot acquire run lease: {e}")))?;
        if !acquired {
            info!("Rejecting run trigger: another instance holds the run lease.");
            return Err(OrchestrationError::AlreadyRunning);
        }

        let result = self
            .execute(job_id, query, &holder, connectors, signal)
            .await;

        if let Err(e) = bounded(timeout, self.store.release_lease(ETL_PIPELINE_LEASE, &holder)).await
        {
            warn!(job_id = %job_id, "Failed to release the run lease; it expires on its own: {e}");
        }
        result
    }

    fn select_connectors(
        &self,
        requested: Option<&[String]>,
    ) -> Result<Vec<Arc<dyn SourceConnector>>, OrchestrationError> {
        let Some(requested) = requested else {
            return Ok(self.connectors.clone());
        };
        if requested.is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "the sources list is empty".to_string(),
            ));
        }
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|s| !self.connectors.iter().any(|c| c.source() == s.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(OrchestrationError::InvalidRequest(format!(
                "unknown or disabled source(s): {}",
                unknown.join(", ")
            )));
        }
        Ok(self
            .connectors
            .iter()
            .filter(|c| requested.iter().any(|s| s == c.source()))
            .cloned()
            .collect())
    }

    async fn execute(
        &self,
        job_id: &str,
        query: &str,
        holder: &str,
        connectors: Vec<Arc<dyn SourceConnector>>,
        signal: &mut CancelSignal,
    ) -> Result<RunResult, OrchestrationError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let timeout = self.config.timeout();
        let sources: Vec<String> = connectors.iter().map(|c| c.source().to_string()).collect();
        let logger = JobLogger::new(self.store.as_ref());

        bounded(
            timeout,
            logger.open(
                job_id,
                JobType::FullRun,
                json!({ "query": query, "sources": sources, "instance_id": self.instance_id }),
            ),
        )
        .await
        .map_err(|e| match e {
            StoreError::JobExists(id) => job_id_taken(&id),
            e => OrchestrationError::Fatal(format!("cannot open job log: {e}")),
        })?;
        info!(job_id = %job_id, query = %query, sources = ?sources, "ETL run started.");

        let processed_so_far = AtomicU64::new(0);
        let work = futures::FutureExt::boxed(stream::iter(connectors.into_iter().enumerate())
            .map(|(idx, connector)| {
                let processed_so_far = &processed_so_far;
                async move {
                    let outcome = self.process_source(connector, query).await;
                    processed_so_far.fetch_add(outcome.processed, Ordering::Relaxed);
                    (idx, outcome)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect::<Vec<_>>());

        tokio::pin!(work);

        let mut renewal = tokio::time::interval(self.config.lease_renewal_interval());
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renewal.tick().await;

        let mut indexed = loop {
            tokio::select! {
                outcomes = &mut work => break outcomes,
                _ = signal.cancelled() => {
                    warn!(job_id = %job_id, "ETL run cancelled; closing job log as failed.");
                    let records = processed_so_far.load(Ordering::Relaxed);
                    let metadata = json!({
                        "query": query,
                        "sources": sources,
                        "elapsed_ms": elapsed_ms(clock),
                    });
                    close_failed(&logger, timeout, job_id, records, CANCELLED_MESSAGE, metadata).await?;
                    return Err(OrchestrationError::Cancelled { job_id: job_id.to_string() });
                }
                _ = renewal.tick() => {
                    let renewed = bounded(
                        timeout,
                        self.store.renew_lease(ETL_PIPELINE_LEASE, holder, self.config.lease_ttl()),
                    )
                    .await;
                    match renewed {
                        Ok(true) => debug!(job_id = %job_id, "Renewed the run lease."),
                        Ok(false) => {
                            error!(job_id = %job_id, "Run lease was taken over; stopping the run.");
                            let records = processed_so_far.load(Ordering::Relaxed);
                            let metadata = json!({
                                "query": query,
                                "sources": sources,
                                "elapsed_ms": elapsed_ms(clock),
                            });
                            close_failed(&logger, timeout, job_id, records, LEASE_LOST_MESSAGE, metadata).await?;
                            return Err(OrchestrationError::Fatal(format!(
                                "run '{job_id}' lost its lease"
                            )));
                        }
                        // The lease is still valid until it expires; the next tick retries.
                        Err(e) => warn!(job_id = %job_id, "Failed to renew the run lease: {e}"),
                    }
                }
            }
        };
        indexed.sort_by_key(|(idx, _)| *idx);
        let outcomes: Vec<SourceOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        let records_extracted: u64 = outcomes.iter().map(|o| o.extracted).sum();
        let records_processed: u64 = outcomes.iter().map(|o| o.processed).sum();
        let transform_failures: u64 = outcomes.iter().map(|o| o.transform_failures).sum();
        let duplicates_skipped: u64 = outcomes.iter().map(|o| o.duplicates_skipped).sum();
        let failed_sources: Vec<String> = outcomes
            .iter()
            .filter(|o| o.status == SourceStatus::Failed)
            .map(|o| o.source.clone())
            .collect();
        let average_relevance = weighted_relevance(&outcomes);
        let elapsed = elapsed_ms(clock);

        let metadata = json!({
            "query": query,
            "sources": sources,
            "failed_sources": failed_sources,
            "records_extracted": records_extracted,
            "transform_failures": transform_failures,
            "duplicates_skipped": duplicates_skipped,
            "average_relevance": average_relevance,
            "elapsed_ms": elapsed,
            "per_source": outcomes.iter().map(|o| json!({
                "source": o.source,
                "status": o.status,
                "extracted": o.extracted,
                "processed": o.processed,
                "elapsed_ms": o.elapsed_ms,
            })).collect::<Vec<_>>(),
        });

        if let Err(e) = bounded(
            timeout,
            logger.complete(job_id, records_processed, metadata.clone()),
        )
        .await
        {
            warn!(job_id = %job_id, "Closing the job log as completed failed: {e}");
            let message = format!("cannot close job log as completed: {e}");
            close_failed(&logger, timeout, job_id, records_processed, &message, metadata).await?;
            return Err(OrchestrationError::Fatal(format!(
                "cannot close job log '{job_id}' as completed: {e}"
            )));
        }

        info!(
            job_id = %job_id,
            records_extracted,
            records_processed,
            failed_sources = ?failed_sources,
            elapsed_ms = elapsed,
            "ETL run completed."
        );

        Ok(RunResult {
            job_id: job_id.to_string(),
            job_status: JobStatus::Completed,
            query: query.to_string(),
            sources: outcomes,
            records_extracted,
            records_processed,
            transform_failures,
            failed_sources,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: elapsed,
        })
    }

    /// Extraction then transformation for one source. Failures end up in the outcome.
    async fn process_source(
        &self,
        connector: Arc<dyn SourceConnector>,
        query: &str,
    ) -> SourceOutcome {
        let clock = Instant::now();
        let source = connector.source().to_string();
        let timeout = self.config.timeout();

        let extraction = ExtractionStage::new(self.store.as_ref(), timeout, self.config.dedup);
        let extracted = match extraction.run(connector.as_ref(), query).await {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!(source = %source, "Extraction failed: {e}");
                return SourceOutcome::failed(&source, e.to_string(), elapsed_ms(clock));
            }
        };

        let transformation =
            TransformationStage::new(self.store.as_ref(), self.deriver.as_ref(), timeout);
        let batch = match transformation
            .select_batch(
                self.config.transform_selection,
                &source,
                &extracted.records,
                self.config.transform_batch_limit,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(source = %source, "Selecting the transform batch failed: {e}");
                let mut outcome = SourceOutcome::failed(
                    &source,
                    format!("selecting transform batch failed: {e}"),
                    elapsed_ms(clock),
                );
                outcome.extracted = extracted.persisted();
                outcome.duplicates_skipped = extracted.duplicates_skipped;
                return outcome;
            }
        };

        let transformed = transformation.run(&batch).await;
        SourceOutcome {
            source,
            status: SourceStatus::Completed,
            extracted: extracted.persisted(),
            duplicates_skipped: extracted.duplicates_skipped,
            processed: transformed.succeeded(),
            transform_failures: transformed.failed(),
            average_relevance: transformed.average_relevance(),
            errors: transformed
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.raw_id, f.error))
                .collect(),
            elapsed_ms: elapsed_ms(clock),
        }
    }
}

fn job_id_taken(job_id: &str) -> OrchestrationError {
    OrchestrationError::InvalidRequest(format!("job id '{job_id}' is already used"))
}

/// Closes the job log as failed; the run is `Fatal` if even that is impossible.
async fn close_failed(
    logger: &JobLogger<'_>,
    timeout: Duration,
    job_id: &str,
    records_processed: u64,
    message: &str,
    metadata: Value,
) -> Result<(), OrchestrationError> {
    bounded(timeout, logger.fail(job_id, records_processed, message, metadata))
        .await
        .map_err(|e| OrchestrationError::Fatal(format!("cannot close job log '{job_id}': {e}")))
}

/// Keeps [`Orchestrator::state`] at `Running` for as long as it lives.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn bounded<T>(
    timeout: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(timeout, op).await.unwrap_or_else(|_| {
        Err(StoreError::OperationFailed(format!(
            "timed out after {}s",
            timeout.as_secs()
        )))
    })
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn weighted_relevance(outcomes: &[SourceOutcome]) -> Option<f64> {
    let (sum, count) = outcomes
        .iter()
        .filter_map(|o| o.average_relevance.map(|avg| (avg * o.processed as f64, o.processed)))
        .fold((0.0, 0u64), |(sum, count), (s, c)| (sum + s, count + c));
    (count > 0).then(|| sum / count as f64)
}
