//! # Shared Constants
//!
//! Names and defaults shared by the library, the connector crates and the server.

/// The default path for the main application SQLite database.
pub const DEFAULT_DB_FILE: &str = "db/covidkm.db";

/// Name of the lease row that guards orchestrated runs across server instances.
pub const ETL_PIPELINE_LEASE: &str = "etl_pipeline";

/// Source identifier of the video platform connector.
pub const SOURCE_YOUTUBE: &str = "youtube";
/// Source identifier of the news aggregator connector.
pub const SOURCE_NEWS: &str = "news";
/// Source identifier of the social media connector.
pub const SOURCE_INSTAGRAM: &str = "instagram";

/// Default page size for list endpoints.
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Upper bound for list endpoints.
pub const MAX_LIST_LIMIT: u32 = 500;

/// Error message recorded on the job log when a run is cancelled.
pub const CANCELLED_MESSAGE: &str = "run cancelled";

/// Error message recorded on the job log when another holder took over the run lease.
pub const LEASE_LOST_MESSAGE: &str = "run lease lost";
