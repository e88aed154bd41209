//! # Common Test Utilities
//!
//! `TestApp` spawns the real server on a random port with a temporary SQLite
//! database and the news connector pointed at a `wiremock::MockServer`.

// Not every test binary uses every helper.
#![allow(unused)]

use anyhow::Result;
use covidkm_server::{config::get_config, serve, state::build_app_state};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const FEED_PATH: &str = "/rss/search";

/// A harness for end-to-end testing of the Axum server.
pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub mock_server: MockServer,
    pub db_path: PathBuf,
    _dir: TempDir,
    _server_handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestApp {
    /// Spawns the application with the news source only.
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with_pipeline("").await
    }

    /// Spawns the application, appending `extra_pipeline` (YAML lines indented
    /// under `pipeline:`) to the generated configuration.
    pub async fn spawn_with_pipeline(extra_pipeline: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .with_test_writer()
            .try_init();

        let mock_server = MockServer::start().await;
        let dir = TempDir::new()?;
        let db_path = dir.path().join("db").join("covidkm.db");
        let config_path = dir.path().join("config.yml");

        let yaml = format!(
            "db_url: \"{db}\"\n\
             pipeline:\n  \
               sources: [\"news\"]\n  \
               timeout_seconds: 5\n\
             {extra_pipeline}\
             connectors:\n  \
               news:\n    \
                 feed_url: \"{feed}\"\n",
            db = db_path.display(),
            feed = format!("{}{FEED_PATH}", mock_server.uri()),
        );
        std::fs::write(&config_path, yaml)?;

        let config = get_config(config_path.to_str())?;
        let app_state = build_app_state(config).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = format!("http://{}", listener.local_addr()?);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server_handle = tokio::spawn(async move {
            let shutdown = async {
                shutdown_rx.await.ok();
            };
            if let Err(e) = serve(listener, app_state, shutdown).await {
                eprintln!("Server error: {e}");
            }
        });

        Ok(Self {
            address,
            client: Client::new(),
            mock_server,
            db_path,
            _dir: dir,
            _server_handle: server_handle,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.address)
    }

    /// Serves `feed` for every news request, after `delay`.
    pub async fn mount_feed(&self, feed: String, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(FEED_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(feed)
                    .insert_header("Content-Type", "application/rss+xml")
                    .set_delay(delay),
            )
            .mount(&self.mock_server)
            .await;
    }

    /// Polls `/etl/status` until the orchestrator reports `state`.
    pub async fn wait_for_state(&self, state: &str) -> Result<()> {
        for _ in 0..100 {
            let body: serde_json::Value = self
                .client
                .get(self.url("/etl/status"))
                .send()
                .await?
                .json()
                .await?;
            if body["state"] == state {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("orchestrator never reached state '{state}'")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// An RSS feed with one item per `(guid, title)`.
pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><title>{title}</title><link>http://localhost/news/{guid}</link>\
                 <guid>{guid}</guid>\
                 <description>{title}: covid-19 vaccine update from the health ministry.</description>\
                 </item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss version="2.0"><channel>
        <title>Health Headlines</title><link>http://localhost/news</link>
        <description>Test feed.</description>{items}</channel></rss>"#
    )
}
