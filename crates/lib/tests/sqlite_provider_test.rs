//! # SQLite Provider Tests
//!
//! Verifies the `SqliteProvider` implementation of the `PipelineStore` contract.
//! Each test uses an in-memory database so they stay fast and isolated.

mod common;

use anyhow::Result;
use chrono::Utc;
use covidkm::errors::StoreError;
use covidkm::{
    JobClosure, JobStatus, JobType, NewProcessedRecord, NewRawRecord, PipelineStore,
    ProcessedFields, RecordFilter, RelevanceScore, Sentiment, SqliteProvider,
};
use covidkm_test_utils::TestSetup;
use serde_json::json;
use std::time::Duration;

use crate::common::setup_tracing;

fn raw(source: &str, external_id: &str) -> NewRawRecord {
    NewRawRecord {
        source: source.to_string(),
        query: Some("covid-19".to_string()),
        external_id: Some(external_id.to_string()),
        payload: json!({ "title": format!("Item {external_id}"), "nested": { "n": 1 } }),
        extracted_at: Utc::now(),
    }
}

fn processed(raw_id: &str, source: &str, score: f64) -> NewProcessedRecord {
    NewProcessedRecord {
        raw_id: raw_id.to_string(),
        source: source.to_string(),
        fields: ProcessedFields {
            title: "Title".to_string(),
            content: "Content".to_string(),
            sentiment: Sentiment::Positive,
            relevance_score: RelevanceScore::clamped(score),
            payload: json!({ "word_count": 2 }),
        },
        processed_at: Utc::now(),
    }
}

fn closure(status: JobStatus, records: u64) -> JobClosure {
    JobClosure {
        status,
        records_processed: records,
        error_message: None,
        metadata: json!({ "records_extracted": records }),
    }
}

#[tokio::test]
async fn test_schema_initialization_is_idempotent() -> Result<()> {
    setup_tracing();
    let provider = SqliteProvider::new(":memory:").await?;

    provider.initialize_schema().await?;
    provider.initialize_schema().await?;
    provider.ping().await?;

    assert_eq!(provider.name(), "SQLite");
    Ok(())
}

#[tokio::test]
async fn test_raw_records_round_trip_with_payload_intact() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    let inserted = store.insert_raw(&raw("news", "a")).await?;
    store.insert_raw(&raw("youtube", "b")).await?;

    let news = store
        .list_raw(&RecordFilter {
            source: Some("news".to_string()),
            limit: 10,
        })
        .await?;
    assert_eq!(news.len(), 1);
    assert_eq!(news[0], inserted);
    assert_eq!(news[0].payload["nested"]["n"], 1);
    assert_eq!(news[0].query.as_deref(), Some("covid-19"));

    let all = store
        .list_raw(&RecordFilter {
            source: None,
            limit: 10,
        })
        .await?;
    assert_eq!(all.len(), 2);

    assert!(store.raw_exists("news", "a").await?);
    assert!(!store.raw_exists("youtube", "a").await?);
    Ok(())
}

#[tokio::test]
async fn test_unprocessed_listing_excludes_transformed_records() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    let first = store.insert_raw(&raw("news", "a")).await?;
    let second = store.insert_raw(&raw("news", "b")).await?;
    store.insert_raw(&raw("youtube", "c")).await?;

    let stored = store.insert_processed(&processed(&first.id, "news", 0.8)).await?;
    assert_eq!(stored.raw_id.as_deref(), Some(first.id.as_str()));

    let pending = store.list_unprocessed_raw("news", 10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);

    let listed = store
        .list_processed(&RecordFilter {
            source: Some("news".to_string()),
            limit: 10,
        })
        .await?;
    assert_eq!(listed, vec![stored]);
    Ok(())
}

#[tokio::test]
async fn test_source_summaries_count_per_source() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    let a = store.insert_raw(&raw("news", "a")).await?;
    let b = store.insert_raw(&raw("news", "b")).await?;
    store.insert_raw(&raw("youtube", "c")).await?;
    store.insert_processed(&processed(&a.id, "news", 0.5)).await?;
    store.insert_processed(&processed(&b.id, "news", 1.0)).await?;

    let summaries = store.source_summaries().await?;

    assert_eq!(summaries.len(), 2);
    let news = &summaries[0];
    assert_eq!(news.source, "news");
    assert_eq!(news.raw_records, 2);
    assert_eq!(news.processed_records, 2);
    assert!((news.average_relevance.unwrap_or_default() - 0.75).abs() < 1e-9);
    let youtube = &summaries[1];
    assert_eq!(youtube.raw_records, 1);
    assert_eq!(youtube.processed_records, 0);
    assert_eq!(youtube.average_relevance, None);
    Ok(())
}

#[tokio::test]
async fn test_job_log_is_closed_exactly_once() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    let opened = store
        .open_job_log("job-1", JobType::FullRun, &json!({ "query": "covid-19" }))
        .await?;
    assert_eq!(opened.status, JobStatus::Running);
    assert_eq!(opened.end_time, None);

    store
        .close_job_log("job-1", &closure(JobStatus::Completed, 4))
        .await?;

    let log = store.get_job_log("job-1").await?.expect("job log exists");
    assert_eq!(log.status, JobStatus::Completed);
    assert_eq!(log.records_processed, 4);
    assert_eq!(log.job_type, JobType::FullRun);
    assert_eq!(log.metadata["records_extracted"], 4);
    let end_time = log.end_time.expect("closed log has an end time");
    assert!(end_time >= log.start_time);

    let again = store
        .close_job_log("job-1", &closure(JobStatus::Failed, 0))
        .await;
    assert!(matches!(again, Err(StoreError::JobAlreadyClosed(id)) if id == "job-1"));

    let unknown = store
        .close_job_log("job-404", &closure(JobStatus::Completed, 0))
        .await;
    assert!(matches!(unknown, Err(StoreError::JobNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_job_log_cannot_be_opened_twice() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;
    store
        .open_job_log("job-1", JobType::FullRun, &json!({ "query": "covid-19" }))
        .await?;

    let again = store
        .open_job_log("job-1", JobType::FullRun, &json!({ "query": "masks" }))
        .await;

    assert!(matches!(again, Err(StoreError::JobExists(id)) if id == "job-1"));
    let log = store.get_job_log("job-1").await?.expect("job log exists");
    assert_eq!(log.metadata["query"], "covid-19");
    Ok(())
}

#[tokio::test]
async fn test_job_log_cannot_be_closed_as_running() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;
    store
        .open_job_log("job-1", JobType::Extract, &json!({}))
        .await?;

    let result = store
        .close_job_log("job-1", &closure(JobStatus::Running, 0))
        .await;

    assert!(matches!(result, Err(StoreError::InvalidClosure { .. })));
    let log = store.get_job_log("job-1").await?.expect("job log exists");
    assert_eq!(log.status, JobStatus::Running);
    Ok(())
}

#[tokio::test]
async fn test_job_logs_listing_and_missing_lookup() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;
    for id in ["job-1", "job-2", "job-3"] {
        store.open_job_log(id, JobType::FullRun, &json!({})).await?;
    }

    assert_eq!(store.list_job_logs(10).await?.len(), 3);
    assert_eq!(store.list_job_logs(2).await?.len(), 2);
    assert_eq!(store.get_job_log("nope").await?, None);
    Ok(())
}

#[tokio::test]
async fn test_lease_is_exclusive_until_released() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;
    let ttl = Duration::from_secs(60);

    assert!(store.try_acquire_lease("etl", "a", ttl).await?);
    assert!(!store.try_acquire_lease("etl", "b", ttl).await?);

    // Only the holder can release it.
    store.release_lease("etl", "b").await?;
    assert!(!store.try_acquire_lease("etl", "b", ttl).await?);

    store.release_lease("etl", "a").await?;
    assert!(store.try_acquire_lease("etl", "b", ttl).await?);
    Ok(())
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    assert!(store.try_acquire_lease("etl", "crashed", Duration::ZERO).await?);
    assert!(store
        .try_acquire_lease("etl", "fresh", Duration::from_secs(60))
        .await?);
    Ok(())
}

#[tokio::test]
async fn test_only_the_holder_renews_the_lease() -> Result<()> {
    setup_tracing();
    let setup = TestSetup::new().await?;
    let store = &setup.store;

    assert!(store.try_acquire_lease("etl", "a", Duration::ZERO).await?);
    assert!(!store.renew_lease("etl", "b", Duration::from_secs(60)).await?);
    assert!(store.renew_lease("etl", "a", Duration::from_secs(60)).await?);

    // Renewed past its original expiry, so nobody can reclaim it.
    assert!(!store
        .try_acquire_lease("etl", "b", Duration::from_secs(60))
        .await?);

    store.release_lease("etl", "a").await?;
    assert!(!store.renew_lease("etl", "a", Duration::from_secs(60)).await?);
    Ok(())
}

#[tokio::test]
async fn test_in_memory_stores_are_isolated() -> Result<()> {
    setup_tracing();
    let first = TestSetup::new().await?;
    let second = TestSetup::new().await?;

    first.store.insert_raw(&raw("news", "a")).await?;

    let listed = second
        .store
        .list_raw(&RecordFilter {
            source: None,
            limit: 10,
        })
        .await?;
    assert!(listed.is_empty());
    Ok(())
}
