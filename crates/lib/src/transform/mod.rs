//! # Transformation Stage
//!
//! Derives title, content, sentiment and a relevance score from raw records and
//! writes the results to the processed store. The derivation algorithm sits
//! behind the [`Deriver`] trait so rule-based, model-based or remote scorers
//! can be swapped without touching the stage.

pub mod rules;

use crate::config::TransformSelection;
use crate::errors::{StoreError, TransformError};
use crate::providers::db::storage::PipelineStore;
use crate::types::{NewProcessedRecord, ProcessedFields, ProcessedRecord, RawRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

/// Derives the processed fields of one raw record.
#[async_trait]
pub trait Deriver: Send + Sync {
    async fn derive(&self, record: &RawRecord) -> Result<ProcessedFields, TransformError>;
}

/// A record the stage skipped, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformFailure {
    pub raw_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    pub processed: Vec<ProcessedRecord>,
    pub failures: Vec<TransformFailure>,
}

impl TransformOutcome {
    pub fn succeeded(&self) -> u64 {
        self.processed.len() as u64
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    pub fn average_relevance(&self) -> Option<f64> {
        if self.processed.is_empty() {
            return None;
        }
        let total: f64 = self
            .processed
            .iter()
            .map(|r| r.relevance_score.value())
            .sum();
        Some(total / self.processed.len() as f64)
    }
}

pub struct TransformationStage<'a> {
    store: &'a dyn PipelineStore,
    deriver: &'a dyn Deriver,
    timeout: Duration,
}

impl<'a> TransformationStage<'a> {
    pub fn new(store: &'a dyn PipelineStore, deriver: &'a dyn Deriver, timeout: Duration) -> Self {
        Self {
            store,
            deriver,
            timeout,
        }
    }

    /// Picks the batch to transform for `source` according to `selection`.
    ///
    /// `extracted` are the records the current run just appended.
    pub async fn select_batch(
        &self,
        selection: TransformSelection,
        source: &str,
        extracted: &[RawRecord],
        limit: u32,
    ) -> Result<Vec<RawRecord>, StoreError> {
        match selection {
            TransformSelection::CurrentRun => Ok(extracted.to_vec()),
            TransformSelection::Unprocessed => {
                match tokio::time::timeout(
                    self.timeout,
                    self.store.list_unprocessed_raw(source, limit),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::OperationFailed(format!(
                        "listing unprocessed records for '{source}' timed out after {}s",
                        self.timeout.as_secs()
                    ))),
                }
            }
        }
    }

    /// Derives and persists every record of `batch`.
    ///
    /// A record that fails derivation or persistence is skipped and logged; the
    /// rest of the batch carries on.
    pub async fn run(&self, batch: &[RawRecord]) -> TransformOutcome {
        let mut outcome = TransformOutcome::default();

        for record in batch {
            match self.transform_one(record).await {
                Ok(processed) => outcome.processed.push(processed),
                Err(error) => {
                    warn!(raw_id = %record.id, source = %record.source, "Skipping record: {error}");
                    outcome.failures.push(TransformFailure {
                        raw_id: record.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            batch = batch.len(),
            processed = outcome.processed.len(),
            failed = outcome.failures.len(),
            "Transformation finished."
        );
        outcome
    }

    async fn transform_one(&self, record: &RawRecord) -> Result<ProcessedRecord, TransformError> {
        let timeout_secs = self.timeout.as_secs();
        let fields = tokio::time::timeout(self.timeout, self.deriver.derive(record))
            .await
            .map_err(|_| TransformError::Timeout {
                raw_id: record.id.clone(),
                timeout_secs,
            })??;

        let new_record = NewProcessedRecord {
            raw_id: record.id.clone(),
            source: record.source.clone(),
            fields,
            processed_at: Utc::now(),
        };

        tokio::time::timeout(self.timeout, self.store.insert_processed(&new_record))
            .await
            .map_err(|_| TransformError::Timeout {
                raw_id: record.id.clone(),
                timeout_secs,
            })?
            .map_err(|error| TransformError::Persistence {
                raw_id: record.id.clone(),
                error,
            })
    }
}
