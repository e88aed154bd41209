//! Shared HTTP handling for connectors built on `reqwest`.

use super::ConnectorError;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};

/// Turns a non-success response into a [`ConnectorError`], passing successes through.
///
/// `429 Too Many Requests` becomes [`ConnectorError::RateLimited`] with the
/// `Retry-After` delay when the provider sent one in seconds.
pub async fn check_response(response: Response) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(ConnectorError::RateLimited { retry_after_secs });
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConnectorError::Network(format!(
        "provider returned HTTP {}: {}",
        status.as_u16(),
        truncate(&body, 200)
    )))
}

/// Maps a transport-level `reqwest` failure.
pub fn transport_error(err: reqwest::Error) -> ConnectorError {
    if err.is_decode() {
        ConnectorError::Malformed(err.to_string())
    } else {
        ConnectorError::Network(err.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
