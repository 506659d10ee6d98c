//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod builds;
pub mod error;
pub mod health;
pub mod jobs;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main API router with all endpoints
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job lifecycle
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/next_scheduled_job", get(jobs::next_scheduled_job))
        .route("/jobs/{job_uuid}", get(jobs::get_job))
        .route("/jobs/{job_uuid}", put(jobs::update_job))
        .route("/jobs/{job_uuid}", delete(jobs::abort_job))
        // Pipeline runs and steps
        .route(
            "/jobs/{job_uuid}/pipeline_runs",
            get(jobs::list_job_pipeline_runs),
        )
        .route("/jobs/{job_uuid}/{run_uuid}", get(jobs::get_pipeline_run))
        .route(
            "/jobs/{job_uuid}/{run_uuid}",
            put(jobs::set_pipeline_run_status),
        )
        .route(
            "/jobs/{job_uuid}/{run_uuid}",
            delete(jobs::abort_pipeline_run),
        )
        .route(
            "/jobs/{job_uuid}/{run_uuid}/{step_uuid}",
            get(jobs::get_pipeline_run_step),
        )
        .route(
            "/jobs/{job_uuid}/{run_uuid}/{step_uuid}",
            put(jobs::set_pipeline_run_step_status),
        )
        // Cleanup
        .route("/jobs/cleanup/{job_uuid}", delete(jobs::delete_job))
        .route(
            "/jobs/cleanup/{job_uuid}/{run_uuid}",
            delete(jobs::delete_pipeline_run),
        )
        // Cron jobs
        .route(
            "/jobs/cronjobs/pause/{job_uuid}",
            post(jobs::pause_cron_job),
        )
        .route(
            "/jobs/cronjobs/resume/{job_uuid}",
            post(jobs::resume_cron_job),
        )
        // Image builds
        .route(
            "/environment-builds",
            post(builds::build_environment_image),
        )
        // Add state and middleware
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}
