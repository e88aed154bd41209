//! # Rule-Based Deriver
//!
//! A dependency-free scorer: text is pulled from the payload fields the
//! connectors commonly emit, sentiment comes from a small health-news lexicon,
//! and relevance blends COVID-19 keyword coverage with overlap against the
//! query the record was fetched with.

use super::Deriver;
use crate::errors::TransformError;
use crate::types::{ProcessedFields, RawRecord, RelevanceScore, Sentiment};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashSet};

const TITLE_PATHS: &[&[&str]] = &[&["title"], &["snippet", "title"], &["headline"]];

const CONTENT_PATHS: &[&[&str]] = &[
    &["content"],
    &["description"],
    &["snippet", "description"],
    &["caption"],
    &["summary"],
    &["text"],
];

const VIEW_PATHS: &[&[&str]] = &[&["statistics", "viewCount"], &["view_count"], &["views"]];
const LIKE_PATHS: &[&[&str]] = &[&["statistics", "likeCount"], &["like_count"], &["likes"]];
const COMMENT_PATHS: &[&[&str]] = &[
    &["statistics", "commentCount"],
    &["comments_count"],
    &["comments"],
];
const PUBLISHED_PATHS: &[&[&str]] = &[
    &["snippet", "publishedAt"],
    &["pub_date"],
    &["published_at"],
    &["timestamp"],
];
const URL_PATHS: &[&[&str]] = &[&["link"], &["permalink"], &["url"]];

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "covid",
    "covid-19",
    "covid19",
    "coronavirus",
    "sars-cov-2",
    "pandemic",
    "epidemic",
    "vaccine",
    "vaccines",
    "vaccination",
    "booster",
    "quarantine",
    "lockdown",
    "omicron",
    "variant",
    "mask",
    "masks",
    "outbreak",
    "virus",
    "ventilator",
    "mrna",
    "isolation",
];

const POSITIVE_TERMS: &[&str] = &[
    "recovery",
    "recovered",
    "recovering",
    "effective",
    "improve",
    "improved",
    "improving",
    "safe",
    "safer",
    "hope",
    "hopeful",
    "protect",
    "protection",
    "success",
    "successful",
    "decline",
    "declining",
    "cure",
    "relief",
    "reopen",
    "reopening",
    "progress",
    "approved",
    "approval",
    "immunity",
    "good",
    "great",
    "breakthrough",
    "support",
];

const NEGATIVE_TERMS: &[&str] = &[
    "death",
    "deaths",
    "died",
    "dies",
    "dying",
    "surge",
    "surging",
    "crisis",
    "fear",
    "fears",
    "severe",
    "shortage",
    "shortages",
    "hospitalized",
    "fatal",
    "worse",
    "worst",
    "spike",
    "misinformation",
    "fake",
    "hoax",
    "dangerous",
    "risk",
    "threat",
    "collapse",
    "overwhelmed",
    "bad",
    "sick",
    "infected",
];

/// Distinct keyword matches at which keyword coverage saturates.
const KEYWORD_SATURATION: usize = 3;
const KEYWORD_WEIGHT: f64 = 0.7;
const QUERY_WEIGHT: f64 = 0.3;
/// Net lexicon balance beyond which a record leaves `neutral`.
const SENTIMENT_THRESHOLD: f64 = 0.1;
const MAX_TITLE_CHARS: usize = 150;

pub struct RuleBasedDeriver {
    keywords: HashSet<String>,
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
}

impl Default for RuleBasedDeriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedDeriver {
    pub fn new() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS.iter().copied())
    }

    /// Builds a deriver that scores relevance against a custom keyword list.
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
            positive: POSITIVE_TERMS.iter().copied().collect(),
            negative: NEGATIVE_TERMS.iter().copied().collect(),
        }
    }

    /// The synchronous core of [`Deriver::derive`].
    pub fn derive_fields(&self, record: &RawRecord) -> Result<ProcessedFields, TransformError> {
        let payload = &record.payload;
        if !payload.is_object() {
            return Err(TransformError::Derivation {
                raw_id: record.id.clone(),
                reason: "payload is not an object".to_string(),
            });
        }

        let title = first_text(payload, TITLE_PATHS).map(|t| strip_markup(&t));
        let content = first_text(payload, CONTENT_PATHS).map(|c| strip_markup(&c));

        let (title, content) = match (title, content) {
            (Some(t), Some(c)) if !t.is_empty() && !c.is_empty() => (t, c),
            (Some(t), _) if !t.is_empty() => (t.clone(), t),
            (_, Some(c)) if !c.is_empty() => (headline_of(&c), c),
            _ => {
                return Err(TransformError::MissingContent {
                    raw_id: record.id.clone(),
                })
            }
        };

        let tokens = tokenize(&format!("{title} {content}"));
        let token_set = normalized_set(&tokens);

        let matched_keywords: BTreeSet<&str> = self
            .keywords
            .iter()
            .filter(|k| token_set.contains(k.as_str()))
            .map(String::as_str)
            .collect();

        let query_terms: Vec<String> = record
            .query
            .as_deref()
            .map(tokenize)
            .unwrap_or_default();
        let relevance = self.relevance(matched_keywords.len(), &query_terms, &token_set);

        let positive = tokens
            .iter()
            .filter(|t| self.positive.contains(t.as_str()))
            .count();
        let negative = tokens
            .iter()
            .filter(|t| self.negative.contains(t.as_str()))
            .count();
        let (sentiment, sentiment_score) = classify(positive, negative);

        let mut metadata = Map::new();
        if let Some(external_id) = &record.external_id {
            metadata.insert("external_id".into(), json!(external_id));
        }
        metadata.insert("word_count".into(), json!(tokens.len()));
        metadata.insert("matched_keywords".into(), json!(matched_keywords));
        metadata.insert("sentiment_score".into(), json!(round4(sentiment_score)));
        metadata.insert("positive_terms".into(), json!(positive));
        metadata.insert("negative_terms".into(), json!(negative));
        metadata.insert("engagement".into(), engagement(payload));
        if let Some(published) = first_text(payload, PUBLISHED_PATHS) {
            metadata.insert("published_at".into(), json!(published));
        }
        if let Some(url) = source_url(payload) {
            metadata.insert("url".into(), json!(url));
        }

        Ok(ProcessedFields {
            title,
            content,
            sentiment,
            relevance_score: relevance,
            payload: Value::Object(metadata),
        })
    }

    fn relevance(
        &self,
        matched_keywords: usize,
        query_terms: &[String],
        token_set: &HashSet<String>,
    ) -> RelevanceScore {
        let keyword_component =
            (matched_keywords.min(KEYWORD_SATURATION) as f64) / KEYWORD_SATURATION as f64;

        let score = if query_terms.is_empty() {
            keyword_component
        } else {
            let hits = query_terms
                .iter()
                .filter(|t| token_set.contains(t.as_str()) || token_set.contains(&t.replace('-', "")))
                .count();
            let query_component = hits as f64 / query_terms.len() as f64;
            KEYWORD_WEIGHT * keyword_component + QUERY_WEIGHT * query_component
        };
        RelevanceScore::clamped(round4(score))
    }
}

#[async_trait]
impl Deriver for RuleBasedDeriver {
    async fn derive(&self, record: &RawRecord) -> Result<ProcessedFields, TransformError> {
        self.derive_fields(record)
    }
}

// --- Helpers ---

fn lookup<'v>(payload: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(payload, |value, key| value.get(*key))
}

fn first_text(payload: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        lookup(payload, path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn first_count(payload: &Value, paths: &[&[&str]]) -> Option<u64> {
    paths.iter().find_map(|path| match lookup(payload, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn engagement(payload: &Value) -> Value {
    let mut counters = Map::new();
    for (name, paths) in [
        ("views", VIEW_PATHS),
        ("likes", LIKE_PATHS),
        ("comments", COMMENT_PATHS),
    ] {
        if let Some(count) = first_count(payload, paths) {
            counters.insert(name.into(), json!(count));
        }
    }
    Value::Object(counters)
}

fn source_url(payload: &Value) -> Option<String> {
    first_text(payload, URL_PATHS).or_else(|| {
        lookup(payload, &["id", "videoId"])
            .and_then(Value::as_str)
            .map(|id| format!("https://www.youtube.com/watch?v={id}"))
    })
}

/// Removes markup tags, decodes the common entities and collapses whitespace.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // A bare `<` such as in "cases < 50" is text, not a tag.
            '<' if !in_tag
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '/' || *n == '!') =>
            {
                in_tag = true
            }
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn headline_of(content: &str) -> String {
    let first_line = content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(content);
    first_line.chars().take(MAX_TITLE_CHARS).collect()
}

/// Lowercased word tokens. Inner hyphens survive so "covid-19" stays one token.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|t| t.trim_matches('-'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token set that also holds the hyphen-free spelling of hyphenated tokens.
fn normalized_set(tokens: &[String]) -> HashSet<String> {
    let mut set = HashSet::with_capacity(tokens.len() * 2);
    for token in tokens {
        if token.contains('-') {
            set.insert(token.replace('-', ""));
        }
        set.insert(token.clone());
    }
    set
}

fn classify(positive: usize, negative: usize) -> (Sentiment, f64) {
    let total = positive + negative;
    if total == 0 {
        return (Sentiment::Neutral, 0.0);
    }
    let score = (positive as f64 - negative as f64) / total as f64;
    let sentiment = if score > SENTIMENT_THRESHOLD {
        Sentiment::Positive
    } else if score < -SENTIMENT_THRESHOLD {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    };
    (sentiment, score)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
