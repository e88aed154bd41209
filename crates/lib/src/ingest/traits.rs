use crate::types::RawDocument;
use async_trait::async_trait;
use thiserror::Error;

/// A generic error type for all source connectors.
///
/// Each connector crate maps its specific errors (HTTP, feed parsing, provider
/// error bodies) into these variants. Connector errors are transient from the
/// pipeline's point of view: the core reports them and never retries on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Rate limited by the provider{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Malformed response from the provider: {0}")]
    Malformed(String),

    #[error("Connector call timed out after {0}s")]
    Timeout(u64),

    #[error("Connector is misconfigured: {0}")]
    Configuration(String),
}

impl ConnectorError {
    /// Whether a later attempt may succeed without any configuration change.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ConnectorError::Configuration(_))
    }
}

/// The contract every source connector implements.
///
/// Connectors are pure fetch boundaries: they never persist anything. The
/// orchestrator selects them by their [`SourceConnector::source`] identifier.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// The short source identifier stamped on every raw record (e.g. "news").
    fn source(&self) -> &str;

    /// Fetches the documents matching `query`.
    ///
    /// The returned sequence is finite. Each document carries the identifier the
    /// provider assigned to it and its payload, unmodified.
    async fn fetch(&self, query: &str) -> Result<Vec<RawDocument>, ConnectorError>;
}
