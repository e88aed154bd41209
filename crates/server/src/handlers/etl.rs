//! # Pipeline Control Handlers
//!
//! Trigger, cancel and inspect orchestrated ETL runs.

use super::{wrap_response, ApiResponse, AppError, AppState, DebugParams};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use covidkm::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use covidkm::{JobLog, OrchestratorState, PipelineStore, RunRequest, RunResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: OrchestratorState,
    pub sources: Vec<String>,
    pub last_job: Option<JobLog>,
}

#[derive(Debug, Deserialize, Default)]
pub struct JobListParams {
    pub limit: Option<u32>,
}

/// Runs the pipeline once and answers with its [`RunResult`].
///
/// The body is optional; an empty body runs every configured source with the
/// default query.
pub async fn run_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    body: Bytes,
) -> Result<Json<ApiResponse<RunResult>>, AppError> {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid run request: {e}")))?
    };
    info!(?request, "Received ETL run request.");

    // Runs to completion even if the client disconnects.
    let orchestrator = app_state.orchestrator.clone();
    let result = tokio::spawn(async move { orchestrator.run(request).await })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("ETL run task failed: {e}")))??;

    let debug_info = json!({
        "instance_sources": app_state.config.pipeline.sources,
        "transform_selection": app_state.config.pipeline.transform_selection,
    });
    Ok(wrap_response(result, debug_params, Some(debug_info)))
}

pub async fn cancel_handler(
    State(app_state): State<AppState>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = app_state.orchestrator.cancel().await;
    Ok(Json(CancelResponse { cancelled }))
}

pub async fn status_handler(
    State(app_state): State<AppState>,
) -> Result<Json<StatusResponse>, AppError> {
    let last_job = app_state.store.list_job_logs(1).await?.into_iter().next();
    Ok(Json(StatusResponse {
        state: app_state.orchestrator.state(),
        sources: app_state.config.pipeline.sources.clone(),
        last_job,
    }))
}

/// Most recently started job logs first.
pub async fn list_jobs_handler(
    State(app_state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Result<Json<Vec<JobLog>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = app_state.store.list_job_logs(limit).await?;
    Ok(Json(jobs))
}

pub async fn get_job_handler(
    State(app_state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobLog>, AppError> {
    app_state
        .store
        .get_job_log(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Job '{job_id}' not found")))
}
