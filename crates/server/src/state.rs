//! # Application State
//!
//! This module defines the shared application state (`AppState`) and the logic
//! for building it at startup: the store, the source connectors enabled in the
//! configuration, and the orchestrator that runs them.

use crate::config::AppConfig;
use anyhow::{anyhow, bail};
use covidkm::constants::{SOURCE_INSTAGRAM, SOURCE_NEWS, SOURCE_YOUTUBE};
use covidkm::{Orchestrator, SourceConnector, SqliteProvider};
use covidkm_instagram::InstagramConnector;
use covidkm_news::NewsConnector;
use covidkm_youtube::YoutubeConnector;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// The shared application state, accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration, loaded from `config.yml` and the environment.
    pub config: Arc<AppConfig>,
    /// The pipeline store, shared with the orchestrator.
    pub store: Arc<SqliteProvider>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Builds one connector per source enabled in `pipeline.sources`.
///
/// An enabled source without usable credentials, or an unknown source name,
/// is a configuration error.
pub fn build_connectors(config: &AppConfig) -> anyhow::Result<Vec<Arc<dyn SourceConnector>>> {
    let connectors = &config.connectors;
    let mut built: Vec<Arc<dyn SourceConnector>> = Vec::new();
    for source in &config.pipeline.sources {
        let connector: Arc<dyn SourceConnector> = match source.as_str() {
            SOURCE_YOUTUBE => {
                if connectors.youtube.api_key.trim().is_empty() {
                    bail!("source 'youtube' is enabled but connectors.youtube.api_key is empty");
                }
                Arc::new(YoutubeConnector::new(connectors.youtube.clone()))
            }
            SOURCE_NEWS => {
                if connectors.news.feed_url.trim().is_empty() {
                    bail!("source 'news' is enabled but connectors.news.feed_url is empty");
                }
                Arc::new(NewsConnector::new(connectors.news.clone()))
            }
            SOURCE_INSTAGRAM => {
                let instagram = &connectors.instagram;
                if instagram.access_token.trim().is_empty()
                    || instagram.business_account_id.trim().is_empty()
                {
                    bail!(
                        "source 'instagram' is enabled but connectors.instagram.access_token \
                         or business_account_id is empty"
                    );
                }
                Arc::new(InstagramConnector::new(instagram.clone()))
            }
            other => bail!("unknown source '{other}' in pipeline.sources"),
        };
        built.push(connector);
    }
    Ok(built)
}

/// Builds the shared application state from the configuration.
///
/// This function opens (and migrates) the SQLite database, builds the enabled
/// connectors and wires them into the orchestrator.
pub async fn build_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let connectors = build_connectors(&config)?;

    if let Some(parent) = Path::new(&config.db_url).parent() {
        if !parent.as_os_str().is_empty() && config.db_url != ":memory:" {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(SqliteProvider::new(&config.db_url).await?);
    info!(db_path = %config.db_url, "Initialized pipeline store (SQLite).");
    // Ensure the database schema is up-to-date on startup.
    store.initialize_schema().await?;

    let orchestrator = Orchestrator::builder()
        .store(store.clone())
        .connectors(connectors)
        .config(config.pipeline.clone())
        .instance_id(format!("server-{}", uuid::Uuid::new_v4()))
        .build()
        .map_err(|e| anyhow!("cannot build the orchestrator: {e}"))?;
    info!(sources = ?config.pipeline.sources, "Orchestrator ready.");

    Ok(AppState {
        config: Arc::new(config),
        store,
        orchestrator: Arc::new(orchestrator),
    })
}
