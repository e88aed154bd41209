//! # Transformation Stage Tests

mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use covidkm::ingest::ExtractionStage;
use covidkm::transform::TransformationStage;
use covidkm::{
    Deriver, NewRawRecord, PipelineStore, ProcessedFields, RawDocument, RawRecord, RecordFilter,
    RelevanceScore, RuleBasedDeriver, Sentiment, TransformError, TransformSelection,
};
use covidkm_test_utils::{doc, FaultyStore, MockConnector, TestSetup};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::common::setup_tracing;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn extract(store: &dyn PipelineStore, source: &str, docs: Vec<RawDocument>) -> Result<Vec<RawRecord>> {
    let stage = ExtractionStage::new(store, TIMEOUT, false);
    let outcome = stage
        .run(&MockConnector::returning(source, docs), "covid-19 vaccine")
        .await?;
    Ok(outcome.records)
}

/// Fails every record whose external id starts with "bad".
struct PickyDeriver;

#[async_trait]
impl Deriver for PickyDeriver {
    async fn derive(&self, record: &RawRecord) -> Result<ProcessedFields, TransformError> {
        if record.external_id.as_deref().unwrap_or_default().starts_with("bad") {
            return Err(TransformError::Derivation {
                raw_id: record.id.clone(),
                reason: "rejected".to_string(),
            });
        }
        Ok(ProcessedFields {
            title: "ok".to_string(),
            content: "ok".to_string(),
            sentiment: Sentiment::Neutral,
            relevance_score: RelevanceScore::MAX,
            payload: json!({}),
        })
    }
}

#[tokio::test]
async fn test_current_run_batch_is_derived_and_linked() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = setup.store.as_ref();
    let records = extract(store, "news", vec![doc("n-1", "Vaccine rollout"), doc("n-2", "Booster")]).await?;
    let deriver = RuleBasedDeriver::new();
    let stage = TransformationStage::new(store, &deriver, TIMEOUT);

    let batch = stage
        .select_batch(TransformSelection::CurrentRun, "news", &records, 100)
        .await?;
    let outcome = stage.run(&batch).await;

    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.failed(), 0);
    for (processed, raw) in outcome.processed.iter().zip(&records) {
        assert_eq!(processed.raw_id.as_deref(), Some(raw.id.as_str()));
        assert_eq!(processed.source, "news");
        assert!(!processed.title.is_empty());
        assert!((0.0..=1.0).contains(&processed.relevance_score.value()));
    }
    let average = outcome.average_relevance().unwrap_or_default();
    assert!(average > 0.0);

    let stored = store
        .list_processed(&RecordFilter {
            source: Some("news".to_string()),
            limit: 10,
        })
        .await?;
    assert_eq!(stored.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_failing_records_are_skipped_not_fatal() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = setup.store.as_ref();
    let records = extract(
        store,
        "youtube",
        vec![
            doc("y-1", "Vaccine"),
            RawDocument::new("y-2", json!("not an object")),
            RawDocument::new("y-3", json!({ "views": 10 })),
            doc("y-4", "Masks"),
        ],
    )
    .await?;
    let deriver = RuleBasedDeriver::new();
    let stage = TransformationStage::new(store, &deriver, TIMEOUT);

    let outcome = stage.run(&records).await;

    assert_eq!(outcome.succeeded(), 2);
    assert_eq!(outcome.failed(), 2);
    let failed_ids: Vec<&str> = outcome.failures.iter().map(|f| f.raw_id.as_str()).collect();
    assert_eq!(failed_ids, vec![records[1].id.as_str(), records[2].id.as_str()]);
    assert!(outcome.failures[1].error.contains("no usable text"));
    Ok(())
}

#[tokio::test]
async fn test_custom_deriver_plugs_into_the_stage() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = setup.store.as_ref();
    let records = extract(store, "news", vec![doc("good-1", "A"), doc("bad-1", "B")]).await?;
    let stage = TransformationStage::new(store, &PickyDeriver, TIMEOUT);

    let outcome = stage.run(&records).await;

    assert_eq!(outcome.succeeded(), 1);
    assert_eq!(outcome.processed[0].relevance_score, RelevanceScore::MAX);
    assert_eq!(outcome.failures[0].raw_id, records[1].id);
    Ok(())
}

#[tokio::test]
async fn test_unprocessed_selection_picks_up_leftovers() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = setup.store.as_ref();
    let deriver = RuleBasedDeriver::new();
    let stage = TransformationStage::new(store, &deriver, TIMEOUT);

    // An earlier run extracted a record but never transformed it.
    let leftover = store
        .insert_raw(&NewRawRecord {
            source: "news".to_string(),
            query: None,
            external_id: Some("old".to_string()),
            payload: json!({ "title": "Pandemic leftovers" }),
            extracted_at: Utc::now(),
        })
        .await?;
    let fresh = extract(store, "news", vec![doc("n-1", "New")]).await?;

    let batch = stage
        .select_batch(TransformSelection::Unprocessed, "news", &fresh, 100)
        .await?;
    let ids: Vec<&str> = batch.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&leftover.id.as_str()));
    assert!(ids.contains(&fresh[0].id.as_str()));

    stage.run(&batch).await;
    let again = stage
        .select_batch(TransformSelection::Unprocessed, "news", &[], 100)
        .await?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_persistence_failures_skip_every_record() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let records = extract(setup.store.as_ref(), "news", vec![doc("n-1", "A"), doc("n-2", "B")]).await?;
    let store = Arc::new(FaultyStore::new(setup.pipeline_store()));
    store.fail_insert_processed(true);
    let deriver = RuleBasedDeriver::new();
    let stage = TransformationStage::new(store.as_ref(), &deriver, TIMEOUT);

    let outcome = stage.run(&records).await;

    assert_eq!(outcome.succeeded(), 0);
    assert_eq!(outcome.failed(), 2);
    assert_eq!(outcome.average_relevance(), None);
    Ok(())
}
