#![allow(dead_code)]
//! # Common Test Utilities
//!
//! Shared helpers for the pipeline integration tests.

use covidkm::PipelineConfig;
use dotenvy::dotenv;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the tracing subscriber and loads .env for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        dotenv().ok();
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A pipeline config enabling exactly `sources`, with short timeouts.
pub fn config_for(sources: &[&str]) -> PipelineConfig {
    PipelineConfig {
        sources: sources.iter().map(|s| s.to_string()).collect(),
        timeout_seconds: 5,
        ..Default::default()
    }
}
