//! # COVID-19 Knowledge Management ETL Core
//!
//! This crate holds the extract → transform → load pipeline behind the
//! knowledge management API. Source connectors fetch raw documents, the
//! extraction stage persists them verbatim, the transformation stage derives
//! scored and sentiment-tagged records, and every orchestrated run is audited
//! through a job log.
//!
//! The HTTP surface and the concrete source connectors live in their own crates
//! and plug into the contracts defined here.

pub mod config;
pub mod constants;
pub mod errors;
pub mod ingest;
pub mod joblog;
pub mod orchestrator;
pub mod providers;
pub mod transform;
pub mod types;

pub use config::{PipelineConfig, TransformSelection};
pub use errors::{ExtractionError, OrchestrationError, StoreError, TransformError};
pub use ingest::{ConnectorError, SourceConnector};
pub use orchestrator::{
    cancel_pair, CancelHandle, CancelSignal, Orchestrator, OrchestratorBuildError, OrchestratorBuilder,
};
pub use providers::db::{sqlite::SqliteProvider, storage::PipelineStore};
pub use transform::{rules::RuleBasedDeriver, Deriver};
pub use types::*;
