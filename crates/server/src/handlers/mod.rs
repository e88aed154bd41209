//! # API Route Handlers
//!
//! Axum handlers of the `covidkm-server`, split by concern: service health,
//! pipeline control (`etl`) and read access to the stored data (`data`).

pub mod data;
pub mod etl;
pub mod general;

pub use data::*;
pub use etl::*;
pub use general::*;

use super::{
    errors::AppError,
    state::AppState,
    types::{ApiResponse, DebugParams},
};
use axum::{extract::Query, Json};
use serde_json::Value;

/// Wraps a successful result in the standard `ApiResponse` format, including
/// debug information only when `?debug=true` was requested.
pub(crate) fn wrap_response<T>(
    result: T,
    debug_params: Query<DebugParams>,
    debug_info: Option<Value>,
) -> Json<ApiResponse<T>> {
    let debug = if debug_params.debug.unwrap_or(false) {
        debug_info
    } else {
        None
    };
    Json(ApiResponse { debug, result })
}
