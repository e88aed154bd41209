use super::{handlers, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Creates the Axum router with all the application routes.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/etl/run", post(handlers::run_handler))
        .route("/etl/cancel", post(handlers::cancel_handler))
        .route("/etl/status", get(handlers::status_handler))
        .route("/etl/jobs", get(handlers::list_jobs_handler))
        .route("/etl/jobs/{job_id}", get(handlers::get_job_handler))
        .route("/data/raw", get(handlers::list_raw_handler))
        .route("/data/processed", get(handlers::list_processed_handler))
        .route("/data/summary", get(handlers::summary_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
