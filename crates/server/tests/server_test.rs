//! # General Endpoint Tests

mod common;

use anyhow::Result;
use common::TestApp;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn test_root_and_health() -> Result<()> {
    let app = TestApp::spawn().await?;

    let root = app.client.get(app.url("/")).send().await?;
    assert_eq!(root.status(), StatusCode::OK);
    assert_eq!(root.text().await?, "covidkm server is running.");

    let health = app.client.get(app.url("/health")).send().await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await?, "OK");
    Ok(())
}

#[tokio::test]
async fn test_readiness_reports_the_store() -> Result<()> {
    let app = TestApp::spawn().await?;

    let response = app.client.get(app.url("/health/ready")).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["store"], "SQLite");
    assert!(app.db_path.exists(), "database file should be created on startup");
    Ok(())
}

#[tokio::test]
async fn test_cors_headers_are_present() -> Result<()> {
    let app = TestApp::spawn().await?;

    let response = app
        .client
        .get(app.url("/health"))
        .header("Origin", "http://dashboard.local")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
    Ok(())
}

#[tokio::test]
async fn test_status_of_an_idle_server() -> Result<()> {
    let app = TestApp::spawn().await?;

    let body: Value = app.client.get(app.url("/etl/status")).send().await?.json().await?;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["sources"], serde_json::json!(["news"]));
    assert!(body["last_job"].is_null());

    let cancel: Value = app.client.post(app.url("/etl/cancel")).send().await?.json().await?;
    assert_eq!(cancel["cancelled"], false);
    Ok(())
}

#[tokio::test]
async fn test_unknown_job_is_not_found() -> Result<()> {
    let app = TestApp::spawn().await?;

    let response = app.client.get(app.url("/etl/jobs/missing-job")).send().await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await?;
    assert!(body["error"].as_str().unwrap_or_default().contains("missing-job"));
    Ok(())
}
