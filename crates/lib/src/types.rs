//! # Pipeline Data Model
//!
//! Records persisted by the pipeline (`raw_data`, `processed_data`, `etl_logs`)
//! and the summaries handed back to the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// --- Raw data ---

/// A document as returned by a source connector, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// The identifier the provider assigned to this document (video id, item guid, ...).
    pub external_id: String,
    /// The provider's document, kept verbatim.
    pub payload: Value,
}

impl RawDocument {
    pub fn new(external_id: impl Into<String>, payload: Value) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
        }
    }
}

/// A raw record ready to be appended to the raw store.
#[derive(Debug, Clone)]
pub struct NewRawRecord {
    pub source: String,
    pub query: Option<String>,
    pub external_id: Option<String>,
    pub payload: Value,
    pub extracted_at: DateTime<Utc>,
}

/// A persisted raw record. The payload and source never change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub source: String,
    pub query: Option<String>,
    pub external_id: Option<String>,
    pub payload: Value,
    pub extracted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Processed data ---

/// Sentiment classification of a processed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(format!("unknown sentiment '{other}'")),
        }
    }
}

/// A relevance score, always within `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RelevanceScore(f64);

impl RelevanceScore {
    pub const MIN: RelevanceScore = RelevanceScore(0.0);
    pub const MAX: RelevanceScore = RelevanceScore(1.0);

    /// Builds a score from any real number, clamping into range. NaN maps to 0.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for RelevanceScore {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("relevance score {value} is outside [0, 1]"))
        }
    }
}

impl From<RelevanceScore> for f64 {
    fn from(score: RelevanceScore) -> Self {
        score.0
    }
}

/// The fields a deriver produces from one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFields {
    pub title: String,
    pub content: String,
    pub sentiment: Sentiment,
    pub relevance_score: RelevanceScore,
    pub payload: Value,
}

/// A processed record ready to be written to the processed store.
#[derive(Debug, Clone)]
pub struct NewProcessedRecord {
    pub raw_id: String,
    pub source: String,
    pub fields: ProcessedFields,
    pub processed_at: DateTime<Utc>,
}

/// A persisted processed record, derived from exactly one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: String,
    pub raw_id: Option<String>,
    pub source: String,
    pub title: String,
    pub content: String,
    pub relevance_score: RelevanceScore,
    pub sentiment: Sentiment,
    pub payload: Value,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Job logs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Extract,
    Transform,
    Load,
    FullRun,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::Transform => "transform",
            JobType::Load => "load",
            JobType::FullRun => "full_run",
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(JobType::Extract),
            "transform" => Ok(JobType::Transform),
            "load" => Ok(JobType::Load),
            "full_run" => Ok(JobType::FullRun),
            other => Err(format!("unknown job type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Audit entry for one pipeline job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: Option<String>,
    pub metadata: Value,
}

/// The single update applied to a running job log when its job ends.
#[derive(Debug, Clone)]
pub struct JobClosure {
    pub status: JobStatus,
    pub records_processed: u64,
    pub error_message: Option<String>,
    pub metadata: Value,
}

// --- Orchestration ---

/// Parameters of one orchestrated run. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller-supplied job id; generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Overrides the configured default query.
    #[serde(default)]
    pub query: Option<String>,
    /// Restricts the run to these configured sources.
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    Failed,
}

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub extracted: u64,
    pub duplicates_skipped: u64,
    pub processed: u64,
    pub transform_failures: u64,
    pub average_relevance: Option<f64>,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

impl SourceOutcome {
    pub fn failed(source: &str, error: String, elapsed_ms: u64) -> Self {
        Self {
            source: source.to_string(),
            status: SourceStatus::Failed,
            extracted: 0,
            duplicates_skipped: 0,
            processed: 0,
            transform_failures: 0,
            average_relevance: None,
            errors: vec![error],
            elapsed_ms,
        }
    }
}

/// Summary of one orchestrated run, serialized by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub job_id: String,
    pub job_status: JobStatus,
    pub query: String,
    pub sources: Vec<SourceOutcome>,
    pub records_extracted: u64,
    pub records_processed: u64,
    pub transform_failures: u64,
    pub failed_sources: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn source(&self, name: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.source == name)
    }
}

/// Observable state of an orchestrator between and during runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Running,
}

// --- Read-side queries ---

/// Filter for listing raw or processed records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub source: Option<String>,
    pub limit: u32,
}

/// Per-source counts of stored data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub raw_records: u64,
    pub processed_records: u64,
    pub average_relevance: Option<f64>,
}
