//! # Pipeline Configuration
//!
//! Options recognized by the orchestrator. The server deserializes this struct
//! from the `pipeline` section of its configuration file.

use crate::constants::{SOURCE_INSTAGRAM, SOURCE_NEWS, SOURCE_YOUTUBE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PipelineConfigError {
    #[error("At least one source must be enabled")]
    NoSources,
    #[error("Source '{0}' is listed more than once")]
    DuplicateSource(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("timeout_seconds must be at least 1")]
    ZeroTimeout,
    #[error("lease_ttl_seconds must be at least 1")]
    ZeroLeaseTtl,
    #[error("lease_ttl_seconds ({lease_ttl}) must not be shorter than timeout_seconds ({timeout})")]
    LeaseShorterThanTimeout { lease_ttl: u64, timeout: u64 },
}

/// Which raw records the transformation stage picks up for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSelection {
    /// Only the records extracted by the current run.
    #[default]
    CurrentRun,
    /// Every stored record of the source without a processed derivative.
    Unprocessed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Enabled source identifiers, in processing order.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    /// Bound on each connector call and each persistence operation.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Maximum number of sources processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Query used when a run request does not supply one.
    #[serde(default = "default_query")]
    pub default_query: String,
    /// Skip documents whose `(source, external_id)` is already stored.
    #[serde(default)]
    pub dedup: bool,
    #[serde(default)]
    pub transform_selection: TransformSelection,
    /// Lifetime of the cross-instance run lease. A crashed holder frees it after this.
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    /// Upper bound of records picked up by the `unprocessed` selection.
    #[serde(default = "default_transform_batch_limit")]
    pub transform_batch_limit: u32,
}

fn default_sources() -> Vec<String> {
    vec![
        SOURCE_YOUTUBE.to_string(),
        SOURCE_NEWS.to_string(),
        SOURCE_INSTAGRAM.to_string(),
    ]
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_concurrency() -> usize {
    2
}

fn default_query() -> String {
    "covid-19".to_string()
}

fn default_lease_ttl_seconds() -> u64 {
    900
}

fn default_transform_batch_limit() -> u32 {
    500
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            timeout_seconds: default_timeout_seconds(),
            concurrency: default_concurrency(),
            default_query: default_query(),
            dedup: false,
            transform_selection: TransformSelection::default(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
            transform_batch_limit: default_transform_batch_limit(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        if self.sources.is_empty() {
            return Err(PipelineConfigError::NoSources);
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.as_str()) {
                return Err(PipelineConfigError::DuplicateSource(source.clone()));
            }
        }
        if self.concurrency == 0 {
            return Err(PipelineConfigError::ZeroConcurrency);
        }
        if self.timeout_seconds == 0 {
            return Err(PipelineConfigError::ZeroTimeout);
        }
        if self.lease_ttl_seconds == 0 {
            return Err(PipelineConfigError::ZeroLeaseTtl);
        }
        if self.lease_ttl_seconds < self.timeout_seconds {
            return Err(PipelineConfigError::LeaseShorterThanTimeout {
                lease_ttl: self.lease_ttl_seconds,
                timeout: self.timeout_seconds,
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    /// How often an active run extends its lease: three times per TTL.
    pub fn lease_renewal_interval(&self) -> Duration {
        self.lease_ttl() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.sources, vec!["youtube", "news", "instagram"]);
        assert_eq!(config.transform_selection, TransformSelection::CurrentRun);
    }

    #[test]
    fn rejects_duplicate_sources_and_zero_limits() {
        let mut config = PipelineConfig {
            sources: vec!["news".into(), "news".into()],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(PipelineConfigError::DuplicateSource("news".into()))
        );

        config.sources = vec!["news".into()];
        config.concurrency = 0;
        assert_eq!(config.validate(), Err(PipelineConfigError::ZeroConcurrency));

        config.concurrency = 1;
        config.timeout_seconds = 0;
        assert_eq!(config.validate(), Err(PipelineConfigError::ZeroTimeout));
    }

    #[test]
    fn rejects_a_lease_shorter_than_one_operation() {
        let config = PipelineConfig {
            timeout_seconds: 60,
            lease_ttl_seconds: 30,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(PipelineConfigError::LeaseShorterThanTimeout {
                lease_ttl: 30,
                timeout: 60
            })
        );

        let config = PipelineConfig {
            timeout_seconds: 1,
            lease_ttl_seconds: 1,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.lease_renewal_interval(), Duration::from_millis(1000) / 3);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"sources": ["news"], "transform_selection": "unprocessed"}"#)
                .unwrap();
        assert_eq!(config.sources, vec!["news"]);
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.transform_selection, TransformSelection::Unprocessed);
    }
}
