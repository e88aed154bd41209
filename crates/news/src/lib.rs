//! # `covidkm-news`: News Feed Connector
//!
//! Fetches an RSS news feed keyed by the pipeline query (for example a Google
//! News search feed) and hands every item to the pipeline as a raw document.
//! It implements the `SourceConnector` trait from the core `covidkm` library.

use async_trait::async_trait;
use covidkm::constants::SOURCE_NEWS;
use covidkm::ingest::http::{check_response, transport_error};
use covidkm::{ConnectorError, RawDocument, SourceConnector};
use reqwest::{Client, Url};
use rss::{Channel, Item};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Custom error types for the news feed connector.
#[derive(Error, Debug)]
pub enum NewsConnectorError {
    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidFeedUrl { url: String, reason: String },
    #[error("Failed to parse news feed: {0}")]
    Parse(#[from] rss::Error),
}

impl From<NewsConnectorError> for ConnectorError {
    fn from(err: NewsConnectorError) -> Self {
        match err {
            NewsConnectorError::InvalidFeedUrl { .. } => {
                ConnectorError::Configuration(err.to_string())
            }
            NewsConnectorError::Parse(e) => ConnectorError::Malformed(e.to_string()),
        }
    }
}

/// Settings of the news connector, read from the `connectors.news` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsConfig {
    /// Feed endpoint. The query is appended as `query_param`.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default = "default_query_param")]
    pub query_param: String,
    /// Upper bound of items taken from one feed response.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_feed_url() -> String {
    "https://news.google.com/rss/search".to_string()
}

fn default_query_param() -> String {
    "q".to_string()
}

fn default_max_items() -> usize {
    50
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            query_param: default_query_param(),
            max_items: default_max_items(),
        }
    }
}

/// The `SourceConnector` implementation for RSS news feeds.
pub struct NewsConnector {
    client: Client,
    config: NewsConfig,
}

impl NewsConnector {
    pub fn new(config: NewsConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: NewsConfig) -> Self {
        Self { client, config }
    }

    fn feed_url(&self, query: &str) -> Result<Url, NewsConnectorError> {
        let mut url =
            Url::parse(&self.config.feed_url).map_err(|e| NewsConnectorError::InvalidFeedUrl {
                url: self.config.feed_url.clone(),
                reason: e.to_string(),
            })?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .append_pair(&self.config.query_param, query);
        }
        Ok(url)
    }
}

/// The item's guid, else its link, else a name-based UUID over title and description.
fn external_id(item: &Item) -> String {
    if let Some(guid) = item.guid().map(|g| g.value().trim()).filter(|g| !g.is_empty()) {
        return guid.to_string();
    }
    if let Some(link) = item.link().map(str::trim).filter(|l| !l.is_empty()) {
        return link.to_string();
    }
    let fingerprint = format!(
        "{}\n{}",
        item.title().unwrap_or_default(),
        item.description().unwrap_or_default()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, fingerprint.as_bytes()).to_string()
}

fn to_document(item: &Item, channel: &Channel) -> RawDocument {
    let payload = json!({
        "title": item.title(),
        "link": item.link(),
        "description": item.description(),
        "content": item.content(),
        "pub_date": item.pub_date(),
        "author": item.author(),
        "categories": item.categories().iter().map(|c| c.name()).collect::<Vec<_>>(),
        "guid": item.guid().map(|g| g.value()),
        "publisher": item.source().map(|s| json!({ "title": s.title(), "url": s.url() })),
        "feed_title": channel.title(),
    });
    RawDocument::new(external_id(item), payload)
}

#[async_trait]
impl SourceConnector for NewsConnector {
    fn source(&self) -> &str {
        SOURCE_NEWS
    }

    async fn fetch(&self, query: &str) -> Result<Vec<RawDocument>, ConnectorError> {
        let url = self.feed_url(query)?;
        info!(source = SOURCE_NEWS, "Fetching news feed from: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        let content = check_response(response)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        let channel = Channel::read_from(&content[..]).map_err(NewsConnectorError::from)?;

        let documents: Vec<RawDocument> = channel
            .items()
            .iter()
            .take(self.config.max_items)
            .map(|item| to_document(item, &channel))
            .collect();

        debug!(
            source = SOURCE_NEWS,
            items = channel.items().len(),
            kept = documents.len(),
            "News feed parsed."
        );
        Ok(documents)
    }
}
