//! # Ingestion
//!
//! The source connector contract and the extraction stage that persists what
//! connectors return. Concrete connectors (video, news, social media) live in
//! their own crates and implement [`SourceConnector`].

pub mod extraction;

pub mod http;

pub mod traits;

pub use extraction::{ExtractionOutcome, ExtractionStage};
pub use traits::{ConnectorError, SourceConnector};
