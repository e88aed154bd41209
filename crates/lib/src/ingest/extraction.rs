//! # Extraction Stage
//!
//! Wraps each document a connector returns into a raw record (source, query,
//! extraction timestamp) and appends it to the raw store.

use super::{ConnectorError, SourceConnector};
use crate::errors::{ExtractionError, StoreError};
use crate::providers::db::storage::PipelineStore;
use crate::types::{NewRawRecord, RawDocument, RawRecord};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// What the extraction stage persisted for one source.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub source: String,
    /// The records appended during this extraction, in fetch order.
    pub records: Vec<RawRecord>,
    /// Documents skipped because dedup is enabled and they were already stored.
    pub duplicates_skipped: u64,
}

impl ExtractionOutcome {
    pub fn persisted(&self) -> u64 {
        self.records.len() as u64
    }
}

pub struct ExtractionStage<'a> {
    store: &'a dyn PipelineStore,
    timeout: Duration,
    dedup: bool,
}

impl<'a> ExtractionStage<'a> {
    pub fn new(store: &'a dyn PipelineStore, timeout: Duration, dedup: bool) -> Self {
        Self {
            store,
            timeout,
            dedup,
        }
    }

    /// Fetches from `connector` and persists everything it returns.
    ///
    /// The connector call is bounded by the stage timeout.
    pub async fn run(
        &self,
        connector: &dyn SourceConnector,
        query: &str,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let source = connector.source().to_string();
        info!(source = %source, query = %query, "Fetching documents.");

        let documents = match tokio::time::timeout(self.timeout, connector.fetch(query)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout(self.timeout.as_secs())),
        }
        .map_err(|error| ExtractionError::Connector {
            source_id: source.clone(),
            error,
        })?;

        self.persist(&source, Some(query), documents).await
    }

    /// Persists an already fetched document sequence for `source`.
    ///
    /// Records are appended in order. The first persistence failure aborts the
    /// remaining documents of this source and is returned.
    pub async fn persist(
        &self,
        source: &str,
        query: Option<&str>,
        documents: Vec<RawDocument>,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let mut outcome = ExtractionOutcome {
            source: source.to_string(),
            ..Default::default()
        };
        let extracted_at = Utc::now();

        for document in documents {
            if self.dedup {
                let exists = self
                    .bounded(source, self.store.raw_exists(source, &document.external_id))
                    .await?;
                if exists {
                    debug!(source = %source, external_id = %document.external_id, "Skipping already stored document.");
                    outcome.duplicates_skipped += 1;
                    continue;
                }
            }

            let record = NewRawRecord {
                source: source.to_string(),
                query: query.map(str::to_string),
                external_id: Some(document.external_id),
                payload: document.payload,
                extracted_at,
            };
            let stored = self.bounded(source, self.store.insert_raw(&record)).await?;
            outcome.records.push(stored);
        }

        info!(
            source = %source,
            persisted = outcome.records.len(),
            duplicates_skipped = outcome.duplicates_skipped,
            "Extraction finished."
        );
        Ok(outcome)
    }

    async fn bounded<T>(
        &self,
        source: &str,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ExtractionError> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ExtractionError::Persistence {
                source_id: source.to_string(),
                error,
            }),
            Err(_) => Err(ExtractionError::PersistenceTimeout {
                source_id: source.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
