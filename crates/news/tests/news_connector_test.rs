//! # News Connector Tests
//!
//! Integration tests for the `covidkm-news` crate against a mock feed server.

use anyhow::Result;
use covidkm::ingest::ExtractionStage;
use covidkm::{ConnectorError, PipelineStore, RecordFilter, SourceConnector};
use covidkm_news::{NewsConfig, NewsConnector};
use covidkm_test_utils::TestSetup;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a mock news feed.
fn mock_feed_content() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0">
        <channel>
            <title>Health Headlines</title>
            <link>http://localhost/news</link>
            <description>Test feed.</description>
            <item>
                <title>Covid-19 vaccine booster approved</title>
                <link>http://localhost/news/booster</link>
                <guid>news-booster-1</guid>
                <description>Regulators approved an updated booster.</description>
                <pubDate>Mon, 02 Jan 2023 10:00:00 GMT</pubDate>
                <category>Health</category>
            </item>
            <item>
                <title>Hospitals report fewer covid admissions</title>
                <link>http://localhost/news/admissions</link>
                <description>Admissions keep declining.</description>
            </item>
            <item>
                <description>An item with neither guid nor link.</description>
            </item>
        </channel>
        </rss>"#
        .to_string()
}

fn connector_for(server: &MockServer, max_items: usize) -> NewsConnector {
    NewsConnector::new(NewsConfig {
        feed_url: format!("{}/rss/search", server.uri()),
        max_items,
        ..Default::default()
    })
}

async fn mount_feed(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rss/search"))
        .and(query_param("q", "covid-19"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(mock_feed_content())
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_news_connector_maps_feed_items() -> Result<()> {
    // --- Arrange ---
    let server = MockServer::start().await;
    mount_feed(&server).await;
    let connector = connector_for(&server, 50);

    // --- Act ---
    let documents = connector.fetch("covid-19").await?;

    // --- Assert ---
    assert_eq!(connector.source(), "news");
    assert_eq!(documents.len(), 3);

    let first = &documents[0];
    assert_eq!(first.external_id, "news-booster-1");
    assert_eq!(first.payload["title"], "Covid-19 vaccine booster approved");
    assert_eq!(first.payload["categories"][0], "Health");
    assert_eq!(first.payload["feed_title"], "Health Headlines");
    assert_eq!(first.payload["pub_date"], "Mon, 02 Jan 2023 10:00:00 GMT");

    // Without a guid the link identifies the item.
    assert_eq!(documents[1].external_id, "http://localhost/news/admissions");
    // Without both, a stable name-based id is derived.
    assert!(!documents[2].external_id.is_empty());
    let again = connector.fetch("covid-19").await?;
    assert_eq!(again[2].external_id, documents[2].external_id);

    Ok(())
}

#[tokio::test]
async fn test_news_connector_respects_max_items() -> Result<()> {
    let server = MockServer::start().await;
    mount_feed(&server).await;

    let documents = connector_for(&server, 1).fetch("covid-19").await?;

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].external_id, "news-booster-1");
    Ok(())
}

#[tokio::test]
async fn test_news_connector_rate_limited() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let result = connector_for(&server, 50).fetch("covid-19").await;

    assert_eq!(
        result.unwrap_err(),
        ConnectorError::RateLimited {
            retry_after_secs: Some(30)
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_news_connector_fetch_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss/search"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = connector_for(&server, 50).fetch("covid-19").await;

    assert!(matches!(result.unwrap_err(), ConnectorError::Network(_)));
    Ok(())
}

#[tokio::test]
async fn test_news_connector_parse_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("this is not valid xml")
                .insert_header("Content-Type", "application/rss+xml"),
        )
        .mount(&server)
        .await;

    let result = connector_for(&server, 50).fetch("covid-19").await;

    assert!(matches!(result.unwrap_err(), ConnectorError::Malformed(_)));
    Ok(())
}

#[tokio::test]
async fn test_news_connector_invalid_feed_url() -> Result<()> {
    let connector = NewsConnector::new(NewsConfig {
        feed_url: "not a url".to_string(),
        ..Default::default()
    });

    let result = connector.fetch("covid-19").await;

    assert!(matches!(
        result.unwrap_err(),
        ConnectorError::Configuration(_)
    ));
    Ok(())
}

#[tokio::test]
async fn test_news_items_are_persisted_by_extraction() -> Result<()> {
    // --- Arrange ---
    let server = MockServer::start().await;
    mount_feed(&server).await;
    let setup = TestSetup::new().await?;
    let connector = connector_for(&server, 50);
    let stage = ExtractionStage::new(setup.store.as_ref(), Duration::from_secs(5), true);

    // --- Act ---
    let first = stage.run(&connector, "covid-19").await?;
    let second = stage.run(&connector, "covid-19").await?;

    // --- Assert ---
    assert_eq!(first.persisted(), 3);
    assert_eq!(second.persisted(), 0);
    assert_eq!(second.duplicates_skipped, 3);

    let stored = setup
        .store
        .list_raw(&RecordFilter {
            source: Some("news".to_string()),
            limit: 10,
        })
        .await?;
    assert_eq!(stored.len(), 3);
    assert!(stored
        .iter()
        .all(|r| r.query.as_deref() == Some("covid-19")));
    Ok(())
}
