//! # Providers
//!
//! Backends the pipeline talks to. Currently only persistence.

pub mod db;
