//! # Instagram Connector Tests

use anyhow::Result;
use covidkm::{ConnectorError, SourceConnector};
use covidkm_instagram::{InstagramConfig, InstagramConnector};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector_for(server: &MockServer) -> InstagramConnector {
    InstagramConnector::new(InstagramConfig {
        api_url: server.uri(),
        access_token: "token".to_string(),
        business_account_id: "biz-1".to_string(),
        max_items: 5,
    })
}

async fn mount_hashtag_search(server: &MockServer, data: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/ig_hashtag_search"))
        .and(query_param("q", "covid19"))
        .and(query_param("user_id", "biz-1"))
        .and(query_param("access_token", "token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_instagram_fetches_recent_hashtag_media() -> Result<()> {
    // --- Arrange ---
    let server = MockServer::start().await;
    mount_hashtag_search(&server, json!([{ "id": "tag-42" }])).await;
    Mock::given(method("GET"))
        .and(path("/tag-42/recent_media"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "media-1",
                    "caption": "Got my covid-19 booster today #covid19",
                    "permalink": "https://instagram.com/p/1",
                    "like_count": 12,
                    "comments_count": 3,
                    "timestamp": "2023-01-02T10:00:00+0000"
                },
                { "caption": "no id, skipped" }
            ]
        })))
        .mount(&server)
        .await;

    // --- Act ---
    let documents = connector_for(&server).fetch("COVID-19").await?;

    // --- Assert ---
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].external_id, "media-1");
    assert_eq!(documents[0].payload["hashtag"], "covid19");
    assert_eq!(documents[0].payload["like_count"], 12);
    Ok(())
}

#[tokio::test]
async fn test_instagram_unknown_hashtag_returns_nothing() -> Result<()> {
    let server = MockServer::start().await;
    mount_hashtag_search(&server, json!([])).await;

    let documents = connector_for(&server).fetch("covid-19").await?;

    assert!(documents.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_instagram_throttling_is_rate_limited() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ig_hashtag_search"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Application request limit reached", "type": "OAuthException", "code": 4 }
        })))
        .mount(&server)
        .await;

    let result = connector_for(&server).fetch("covid-19").await;

    assert!(matches!(
        result.unwrap_err(),
        ConnectorError::RateLimited { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_instagram_missing_credentials() -> Result<()> {
    let connector = InstagramConnector::new(InstagramConfig::default());

    let result = connector.fetch("covid-19").await;

    assert!(matches!(result.unwrap_err(), ConnectorError::Configuration(_)));
    Ok(())
}
