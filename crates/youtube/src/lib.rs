//! # `covidkm-youtube`: Video Search Connector
//!
//! Searches the YouTube Data API (v3) for videos matching the pipeline query.
//! Search results are handed over verbatim; when `include_statistics` is set the
//! view, like and comment counters of the found videos are fetched in one extra
//! call and attached under `statistics`.

use async_trait::async_trait;
use covidkm::constants::SOURCE_YOUTUBE;
use covidkm::ingest::http::{check_response, transport_error};
use covidkm::{ConnectorError, RawDocument, SourceConnector};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Error reasons the Data API uses for exhausted quota.
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "rateLimitExceeded", "userRateLimitExceeded"];

#[derive(Error, Debug)]
pub enum YoutubeConnectorError {
    #[error("YouTube API key is not configured")]
    MissingApiKey,
    #[error("YouTube quota exhausted ({reason}): {message}")]
    QuotaExceeded { reason: String, message: String },
    #[error("YouTube rejected the request ({reason}): {message}")]
    Forbidden { reason: String, message: String },
}

impl From<YoutubeConnectorError> for ConnectorError {
    fn from(err: YoutubeConnectorError) -> Self {
        match err {
            YoutubeConnectorError::QuotaExceeded { .. } => ConnectorError::RateLimited {
                retry_after_secs: None,
            },
            YoutubeConnectorError::MissingApiKey | YoutubeConnectorError::Forbidden { .. } => {
                ConnectorError::Configuration(err.to_string())
            }
        }
    }
}

/// Settings of the YouTube connector, read from the `connectors.youtube` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoutubeConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    /// `maxResults` of the search call (the API caps it at 50).
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub include_statistics: bool,
}

fn default_api_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_max_results() -> u32 {
    25
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: String::new(),
            max_results: default_max_results(),
            include_statistics: false,
        }
    }
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

pub struct YoutubeConnector {
    client: Client,
    config: YoutubeConfig,
}

impl YoutubeConnector {
    pub fn new(config: YoutubeConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: YoutubeConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/{resource}", self.config.api_url.trim_end_matches('/'))
    }

    async fn list(&self, resource: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, ConnectorError> {
        let response = self
            .client
            .get(self.endpoint(resource))
            .query(params)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_forbidden(response).await?;
        let body: ListResponse = check_response(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(body.items)
    }

    async fn statistics(&self, video_ids: &[String]) -> Result<HashMap<String, Value>, ConnectorError> {
        let ids = video_ids.join(",");
        let items = self
            .list("videos", &[("part", "statistics"), ("id", ids.as_str())])
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|mut item| {
                let id = item.get("id")?.as_str()?.to_string();
                Some((id, item.get_mut("statistics")?.take()))
            })
            .collect())
    }
}

/// 403 bodies carry the quota reason; everything else goes through `check_response`.
async fn check_forbidden(response: Response) -> Result<Response, ConnectorError> {
    if response.status() != StatusCode::FORBIDDEN {
        return Ok(response);
    }
    let body = response.text().await.map_err(transport_error)?;
    let (reason, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (
            envelope
                .error
                .errors
                .into_iter()
                .next()
                .map(|d| d.reason)
                .unwrap_or_default(),
            envelope.error.message,
        ),
        Err(_) => (String::new(), body),
    };
    let err = if QUOTA_REASONS.contains(&reason.as_str()) {
        YoutubeConnectorError::QuotaExceeded { reason, message }
    } else {
        YoutubeConnectorError::Forbidden { reason, message }
    };
    Err(err.into())
}

fn video_id(item: &Value) -> Option<String> {
    item.get("id")?
        .get("videoId")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl SourceConnector for YoutubeConnector {
    fn source(&self) -> &str {
        SOURCE_YOUTUBE
    }

    async fn fetch(&self, query: &str) -> Result<Vec<RawDocument>, ConnectorError> {
        if self.config.api_key.trim().is_empty() {
            return Err(YoutubeConnectorError::MissingApiKey.into());
        }
        info!(source = SOURCE_YOUTUBE, query = %query, "Searching videos.");

        let max_results = self.config.max_results.to_string();
        let items = self
            .list(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", query),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        let mut documents: Vec<RawDocument> = items
            .into_iter()
            .filter_map(|item| match video_id(&item) {
                Some(id) => Some(RawDocument::new(id, item)),
                None => {
                    debug!(source = SOURCE_YOUTUBE, "Skipping search result without a video id.");
                    None
                }
            })
            .collect();

        if self.config.include_statistics && !documents.is_empty() {
            let ids: Vec<String> = documents.iter().map(|d| d.external_id.clone()).collect();
            let mut statistics = self.statistics(&ids).await?;
            for document in &mut documents {
                if let (Some(stats), Some(payload)) = (
                    statistics.remove(&document.external_id),
                    document.payload.as_object_mut(),
                ) {
                    payload.insert("statistics".to_string(), stats);
                }
            }
        }

        debug!(source = SOURCE_YOUTUBE, videos = documents.len(), "Video search finished.");
        Ok(documents)
    }
}
