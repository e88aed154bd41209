use super::{AppError, AppState};
use crate::types::ListParams;
use axum::{
    extract::{Query, State},
    Json,
};
use covidkm::{PipelineStore, ProcessedRecord, RawRecord, RecordFilter, SourceSummary};

fn filter_from(params: &ListParams) -> RecordFilter {
    RecordFilter {
        source: params
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        limit: params.limit(),
    }
}

pub async fn list_raw_handler(
    State(app_state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RawRecord>>, AppError> {
    let records = app_state.store.list_raw(&filter_from(&params)).await?;
    Ok(Json(records))
}

pub async fn list_processed_handler(
    State(app_state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ProcessedRecord>>, AppError> {
    let records = app_state.store.list_processed(&filter_from(&params)).await?;
    Ok(Json(records))
}

/// Per-source counts of raw and processed records.
pub async fn summary_handler(
    State(app_state): State<AppState>,
) -> Result<Json<Vec<SourceSummary>>, AppError> {
    let summaries = app_state.store.source_summaries().await?;
    Ok(Json(summaries))
}
