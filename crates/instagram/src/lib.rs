//! # `covidkm-instagram`: Hashtag Media Connector
//!
//! Looks the pipeline query up as a hashtag through the Instagram Graph API and
//! returns the hashtag's recent media. Two calls per fetch: `ig_hashtag_search`
//! resolves the hashtag id, then `/{hashtag-id}/recent_media` lists the posts.

use async_trait::async_trait;
use covidkm::constants::SOURCE_INSTAGRAM;
use covidkm::ingest::http::{check_response, transport_error};
use covidkm::{ConnectorError, RawDocument, SourceConnector};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

/// Graph API error codes signalling throttling.
const THROTTLING_CODES: &[i64] = &[4, 17, 32, 613];
/// Invalid or expired access token.
const OAUTH_CODE: i64 = 190;

const MEDIA_FIELDS: &str =
    "id,caption,media_type,media_url,permalink,timestamp,like_count,comments_count";

#[derive(Error, Debug)]
pub enum InstagramConnectorError {
    #[error("Instagram access token or business account id is not configured")]
    MissingCredentials,
    #[error("Query '{0}' does not contain any hashtag characters")]
    EmptyHashtag(String),
    #[error("Graph API error {code}: {message}")]
    Graph { code: i64, message: String },
}

impl From<InstagramConnectorError> for ConnectorError {
    fn from(err: InstagramConnectorError) -> Self {
        match err {
            InstagramConnectorError::Graph { code, .. } if THROTTLING_CODES.contains(&code) => {
                ConnectorError::RateLimited {
                    retry_after_secs: None,
                }
            }
            InstagramConnectorError::Graph { code, .. } if code == OAUTH_CODE => {
                ConnectorError::Configuration(err.to_string())
            }
            InstagramConnectorError::Graph { .. } => ConnectorError::Network(err.to_string()),
            InstagramConnectorError::MissingCredentials
            | InstagramConnectorError::EmptyHashtag(_) => {
                ConnectorError::Configuration(err.to_string())
            }
        }
    }
}

/// Settings of the Instagram connector, read from the `connectors.instagram` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub access_token: String,
    /// The Instagram business account the hashtag queries run on behalf of.
    #[serde(default)]
    pub business_account_id: String,
    #[serde(default = "default_max_items")]
    pub max_items: u32,
}

fn default_api_url() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

fn default_max_items() -> u32 {
    25
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            access_token: String::new(),
            business_account_id: String::new(),
            max_items: default_max_items(),
        }
    }
}

#[derive(Deserialize)]
struct DataResponse {
    data: Vec<Value>,
}

#[derive(Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    code: i64,
}

/// Lowercases the query and keeps only alphanumeric characters ("COVID-19" → "covid19").
pub fn hashtag_for(query: &str) -> String {
    query
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub struct InstagramConnector {
    client: Client,
    config: InstagramConfig,
}

impl InstagramConnector {
    pub fn new(config: InstagramConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: InstagramConfig) -> Self {
        Self { client, config }
    }

    async fn get_data(&self, resource: &str, params: &[(&str, &str)]) -> Result<Vec<Value>, ConnectorError> {
        let url = format!("{}/{resource}", self.config.api_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[
                ("user_id", self.config.business_account_id.as_str()),
                ("access_token", self.config.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_graph_error(response).await?;
        let body: DataResponse = check_response(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(body.data)
    }
}

/// Graph API failures come as 4xx responses with an `error` object.
async fn check_graph_error(response: Response) -> Result<Response, ConnectorError> {
    if !response.status().is_client_error() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    match serde_json::from_str::<GraphErrorEnvelope>(&body) {
        Ok(envelope) => Err(InstagramConnectorError::Graph {
            code: envelope.error.code,
            message: envelope.error.message,
        }
        .into()),
        Err(_) => Err(ConnectorError::Network(format!(
            "provider returned HTTP {}",
            status.as_u16()
        ))),
    }
}

#[async_trait]
impl SourceConnector for InstagramConnector {
    fn source(&self) -> &str {
        SOURCE_INSTAGRAM
    }

    async fn fetch(&self, query: &str) -> Result<Vec<RawDocument>, ConnectorError> {
        if self.config.access_token.trim().is_empty()
            || self.config.business_account_id.trim().is_empty()
        {
            return Err(InstagramConnectorError::MissingCredentials.into());
        }
        let hashtag = hashtag_for(query);
        if hashtag.is_empty() {
            return Err(InstagramConnectorError::EmptyHashtag(query.to_string()).into());
        }
        info!(source = SOURCE_INSTAGRAM, hashtag = %hashtag, "Resolving hashtag.");

        let hashtags = self
            .get_data("ig_hashtag_search", &[("q", hashtag.as_str())])
            .await?;
        let Some(hashtag_id) = hashtags
            .first()
            .and_then(|h| h.get("id"))
            .and_then(Value::as_str)
        else {
            debug!(source = SOURCE_INSTAGRAM, hashtag = %hashtag, "Hashtag not found.");
            return Ok(Vec::new());
        };

        let limit = self.config.max_items.to_string();
        let media = self
            .get_data(
                &format!("{hashtag_id}/recent_media"),
                &[("fields", MEDIA_FIELDS), ("limit", limit.as_str())],
            )
            .await?;

        let documents: Vec<RawDocument> = media
            .into_iter()
            .filter_map(|mut item| {
                let id = item.get("id")?.as_str()?.to_string();
                if let Some(fields) = item.as_object_mut() {
                    fields.insert("hashtag".to_string(), json!(hashtag));
                }
                Some(RawDocument::new(id, item))
            })
            .collect();

        debug!(source = SOURCE_INSTAGRAM, media = documents.len(), "Hashtag media fetched.");
        Ok(documents)
    }
}
