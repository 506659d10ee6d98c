//! Job API Handlers
//!
//! HTTP endpoints for the job lifecycle. Every mutating endpoint runs
//! through a two-phase executor: the handler opens the executor, runs the
//! operation's transaction phase, commits, and lets the deferred collateral
//! effects fire.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use cascade_core::domain::job::Job;
use cascade_core::domain::run::{PipelineRun, PipelineRunStep};
use cascade_core::dto::job::{JobSpec, JobUpdate, NextScheduledJob};
use cascade_core::dto::run::StatusUpdate;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::context::AppContext;
use crate::repository::{job_repository, run_repository};
use crate::service::job_service;
use crate::twophase::TwoPhaseExecutor;

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_uuid: Option<Uuid>,
}

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// GET /jobs
/// List jobs, newest first, optionally filtered by project.
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ProjectQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs");

    let jobs = job_repository::list(&ctx.db, params.project_uuid).await?;
    Ok(Json(jobs))
}

/// POST /jobs
/// Draft a new job and pin the environment images for all of its runs.
/// To actually queue the job, issue a PUT with the `confirm_draft` flag.
pub async fn create_job(
    State(ctx): State<AppContext>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Drafting job for pipeline: {}", spec.pipeline_uuid);

    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let job = job_service::create_job(&mut tpe, spec).await?;
    tpe.commit(&ctx).await?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs/next_scheduled_job
/// Data about the next job to be scheduled, for the external poll loop.
pub async fn next_scheduled_job(
    State(ctx): State<AppContext>,
    Query(params): Query<ProjectQuery>,
) -> ApiResult<Json<NextScheduledJob>> {
    let next = job_repository::next_scheduled(&ctx.db, params.project_uuid).await?;

    let (uuid, next_scheduled_time) = match next {
        Some((uuid, time)) => (Some(uuid), Some(time)),
        None => (None, None),
    };
    Ok(Json(NextScheduledJob {
        uuid,
        next_scheduled_time,
    }))
}

/// GET /jobs/{job_uuid}
/// Fetch a job given its UUID.
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", job_uuid);

    let job = job_repository::find_by_id(&ctx.db, job_uuid)
        .await?
        .ok_or_else(|| ApiError::NotFound("Job not found.".to_string()))?;

    Ok(Json(job))
}

/// PUT /jobs/{job_uuid}
/// Update a job (cron schedule, parameters, ...) or confirm its draft.
/// Only drafts and recurring ongoing jobs can be updated.
pub async fn update_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
    Json(update): Json<JobUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    job_service::update_job(&mut tpe, job_uuid, update).await?;
    tpe.commit(&ctx).await?;

    Ok(Json(json!({ "message": "Job was updated successfully." })))
}

/// DELETE /jobs/{job_uuid}
/// Stop a job: corresponding entries are not deleted, their status becomes
/// ABORTED.
pub async fn abort_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let could_abort = job_service::abort_job(&mut tpe, job_uuid).await?;
    tpe.commit(&ctx).await?;

    if could_abort {
        Ok(Json(json!({ "message": "Job termination was successful." })))
    } else {
        Err(ApiError::NotFound(
            "Job does not exist or is already completed.".to_string(),
        ))
    }
}

// =============================================================================
// Pipeline Run Endpoints
// =============================================================================

/// GET /jobs/{job_uuid}/pipeline_runs
/// Pipeline runs of a job, sorted newest first.
pub async fn list_job_pipeline_runs(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<Vec<PipelineRun>>> {
    if !job_repository::exists(&ctx.db, job_uuid).await? {
        return Err(ApiError::NotFound("Job not found.".to_string()));
    }

    let runs = run_repository::list_for_job(&ctx.db, job_uuid).await?;
    Ok(Json(runs))
}

/// GET /jobs/{job_uuid}/{run_uuid}
/// Fetch a pipeline run of a job.
pub async fn get_pipeline_run(
    State(ctx): State<AppContext>,
    Path((_job_uuid, run_uuid)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<PipelineRun>> {
    let run = run_repository::find_by_id(&ctx.db, run_uuid)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("Given job has no run with given run_uuid".to_string())
        })?;

    Ok(Json(run))
}

/// PUT /jobs/{job_uuid}/{run_uuid}
/// Set the status of a pipeline run.
pub async fn set_pipeline_run_status(
    State(ctx): State<AppContext>,
    Path((job_uuid, run_uuid)): Path<(Uuid, Uuid)>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    job_service::update_job_pipeline_run(&mut tpe, job_uuid, run_uuid, &update).await?;
    tpe.commit(&ctx).await?;

    Ok(Json(json!({ "message": "Status was updated successfully." })))
}

/// DELETE /jobs/{job_uuid}/{run_uuid}
/// Stop a pipeline run of a job.
pub async fn abort_pipeline_run(
    State(ctx): State<AppContext>,
    Path((job_uuid, run_uuid)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let could_abort = job_service::abort_job_pipeline_run(&mut tpe, job_uuid, run_uuid).await?;
    tpe.commit(&ctx).await?;

    if could_abort {
        Ok(Json(json!({ "message": "Run termination was successful." })))
    } else {
        Err(ApiError::NotFound(
            "Run does not exist or is not running.".to_string(),
        ))
    }
}

// =============================================================================
// Step Endpoints
// =============================================================================

/// GET /jobs/{job_uuid}/{run_uuid}/{step_uuid}
/// Fetch a step of a pipeline run of a job.
pub async fn get_pipeline_run_step(
    State(ctx): State<AppContext>,
    Path((_job_uuid, run_uuid, step_uuid)): Path<(Uuid, Uuid, Uuid)>,
) -> ApiResult<Json<PipelineRunStep>> {
    let step = run_repository::find_step(&ctx.db, run_uuid, step_uuid)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("Combination of given job, run and step not found".to_string())
        })?;

    Ok(Json(step))
}

/// PUT /jobs/{job_uuid}/{run_uuid}/{step_uuid}
/// Set the status of a step of a pipeline run. Writes go through the guarded
/// status updater, so transitions out of end states are ignored.
pub async fn set_pipeline_run_step_status(
    State(ctx): State<AppContext>,
    Path((_job_uuid, run_uuid, step_uuid)): Path<(Uuid, Uuid, Uuid)>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    run_repository::update_step_status(&ctx.db, run_uuid, step_uuid, &update).await?;

    Ok(Json(json!({ "message": "Status was updated successfully." })))
}

// =============================================================================
// Cleanup Endpoints
// =============================================================================

/// DELETE /jobs/cleanup/{job_uuid}
/// Delete a job: the job is stopped if it is running, related entities are
/// then removed from the db.
pub async fn delete_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let could_delete = job_service::delete_job(&mut tpe, job_uuid).await?;
    tpe.commit(&ctx).await?;

    if could_delete {
        Ok(Json(json!({ "message": "Job deletion was successful." })))
    } else {
        Err(ApiError::NotFound("Job does not exist.".to_string()))
    }
}

/// DELETE /jobs/cleanup/{job_uuid}/{run_uuid}
/// Delete a pipeline run of a job: stopped if running, then removed.
pub async fn delete_pipeline_run(
    State(ctx): State<AppContext>,
    Path((job_uuid, run_uuid)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let could_delete = job_service::delete_job_pipeline_run(&mut tpe, job_uuid, run_uuid).await?;
    tpe.commit(&ctx).await?;

    if could_delete {
        Ok(Json(
            json!({ "message": "Job pipeline run deletion was successful." }),
        ))
    } else {
        Err(ApiError::NotFound(
            "Job pipeline run does not exist.".to_string(),
        ))
    }
}

// =============================================================================
// Cron Job Endpoints
// =============================================================================

/// POST /jobs/cronjobs/pause/{job_uuid}
/// Pause a cron job.
pub async fn pause_cron_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let could_pause = job_service::pause_cron_job(&mut tpe, job_uuid).await?;
    tpe.commit(&ctx).await?;

    if could_pause {
        Ok(Json(json!({ "message": "Cron job pausing was successful." })))
    } else {
        Err(ApiError::Conflict("Could not pause cron job.".to_string()))
    }
}

/// POST /jobs/cronjobs/resume/{job_uuid}
/// Resume a cron job.
pub async fn resume_cron_job(
    State(ctx): State<AppContext>,
    Path(job_uuid): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut tpe = TwoPhaseExecutor::begin(&ctx.db).await?;
    let next_scheduled_time = job_service::resume_cron_job(&mut tpe, job_uuid).await?;
    tpe.commit(&ctx).await?;

    match next_scheduled_time {
        Some(next) => Ok(Json(json!({ "next_scheduled_time": next }))),
        None => Err(ApiError::Conflict("Could not resume cron job.".to_string())),
    }
}
