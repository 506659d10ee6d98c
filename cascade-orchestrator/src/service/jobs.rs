//! Job Service
//!
//! The job lifecycle operations: create, update/confirm, run, abort, delete,
//! pause/resume, run-status bookkeeping and retention pruning. Every mutating
//! operation is a two-phase unit: its transaction phase runs against the
//! executor's store transaction, its collateral phase is deferred and runs
//! after the single commit.

use async_trait::async_trait;
use cascade_core::domain::job::{Job, JobStatus};
use cascade_core::domain::pipeline::{PipelineDefinition, construct_pipeline};
use cascade_core::domain::run::{PipelineRun, RunStatus};
use cascade_core::dto::job::{JobSpec, JobUpdate};
use cascade_core::dto::run::{RunConfig, RunDispatchPayload, StatusUpdate};
use cascade_core::{env, schedule};
use sqlx::PgPool;
use uuid::Uuid;

use crate::context::AppContext;
use crate::repository::{image_repository, job_repository, run_repository};
use crate::service::runs::REVOKE_TIMEOUT;
use crate::service::{EngineError, images, runs};
use crate::twophase::{CollateralEffect, TwoPhaseExecutor};

// =============================================================================
// CreateJob
// =============================================================================

/// Draft a new job and pin the environment images of its pipeline.
///
/// The draft only becomes schedulable once it is confirmed through
/// [`update_job`].
pub async fn create_job(tpe: &mut TwoPhaseExecutor, spec: JobSpec) -> Result<Job, EngineError> {
    let next_scheduled_time =
        initial_next_scheduled_time(spec.cron_schedule.as_deref(), spec.scheduled_start)?;

    for document in &spec.parameters {
        document
            .validate()
            .map_err(|e| EngineError::validation(e.to_string()))?;
    }

    let env_variables = spec.env_variables.unwrap_or_default();
    if !env::are_environment_variables_valid(&env_variables) {
        return Err(EngineError::validation(
            "Invalid environment variables definition.",
        ));
    }

    let max_retained_pipeline_runs = spec.max_retained_pipeline_runs.unwrap_or(-1);
    if max_retained_pipeline_runs < -1 {
        return Err(EngineError::validation(format!(
            "Invalid max_retained_pipeline_runs: {max_retained_pipeline_runs}."
        )));
    }

    // Constructing the pipeline validates the definition and yields the
    // environments the collateral phase will pin.
    let pipeline = construct_pipeline(&spec.pipeline_definition)
        .map_err(|e| EngineError::validation(e.to_string()))?;
    let environment_uuids: Vec<Uuid> = pipeline.environments().into_iter().collect();

    let job = Job {
        uuid: spec.uuid,
        name: spec.name,
        project_uuid: spec.project_uuid,
        pipeline_uuid: spec.pipeline_uuid,
        pipeline_name: spec.pipeline_name,
        pipeline_definition: spec.pipeline_definition,
        schedule: spec.cron_schedule,
        parameters: spec.parameters,
        env_variables,
        strategy_json: spec.strategy_json.unwrap_or_else(|| serde_json::json!({})),
        status: JobStatus::Draft,
        created_time: chrono::Utc::now(),
        next_scheduled_time,
        last_scheduled_time: None,
        total_scheduled_executions: 0,
        total_scheduled_pipeline_runs: 0,
        max_retained_pipeline_runs,
    };

    job_repository::insert(tpe.conn(), &job).await?;

    tracing::info!("Job drafted: {} for pipeline {}", job.uuid, job.pipeline_uuid);

    tpe.defer(CreateJobCollateral {
        job_uuid: job.uuid,
        project_uuid: job.project_uuid,
        environment_uuids,
    });

    Ok(job)
}

/// Compute the initial `next_scheduled_time` of a drafted job.
fn initial_next_scheduled_time(
    cron_schedule: Option<&str>,
    scheduled_start: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, EngineError> {
    match (cron_schedule, scheduled_start) {
        // To be scheduled ASAP and to be run once.
        (None, None) => Ok(None),
        // To be scheduled according to argument, to be run once.
        (None, Some(start)) => Ok(Some(start)),
        // To follow a cron schedule, for an indefinite amount of runs.
        (Some(expr), None) => {
            let next = schedule::next_occurrence(expr, chrono::Utc::now())
                .map_err(|e| EngineError::validation(e.to_string()))?;
            Ok(Some(next))
        }
        (Some(_), Some(_)) => Err(EngineError::validation(
            "Can't define both cron_schedule and scheduled_start.",
        )),
    }
}

struct CreateJobCollateral {
    job_uuid: Uuid,
    project_uuid: Uuid,
    environment_uuids: Vec<Uuid>,
}

#[async_trait]
impl CollateralEffect for CreateJobCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        let environment_uuids = self.environment_uuids.iter().copied().collect();
        images::lock_images_for_job(
            &ctx.db,
            self.job_uuid,
            self.project_uuid,
            &environment_uuids,
        )
        .await
    }

    async fn revert(&self, db: &PgPool) -> Result<(), EngineError> {
        // A draft whose images could not be pinned is not usable.
        job_repository::delete(db, self.job_uuid).await?;
        Ok(())
    }
}

// =============================================================================
// UpdateJob
// =============================================================================

/// Field-by-field conditional update of a job, including draft confirmation.
///
/// Schedule, parameter, env-variable, strategy and retention edits are only
/// legal on drafts and ongoing cron jobs; confirmed one-off jobs are
/// immutable.
pub async fn update_job(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
    update: JobUpdate,
) -> Result<(), EngineError> {
    let mut job = job_repository::find_by_id_for_update(tpe.conn(), job_uuid)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Job {job_uuid} not found")))?;

    let now = chrono::Utc::now();

    if let Some(name) = update.name {
        job.name = name;
    }

    if let Some(expr) = &update.cron_schedule {
        if job.schedule.is_none() && job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot set the schedule of a job which is not a cron job already.",
            ));
        }
        // Rescheduling implies that the job will follow the new schedule
        // from now on.
        job.next_scheduled_time = Some(
            schedule::next_occurrence(expr, now)
                .map_err(|e| EngineError::validation(e.to_string()))?,
        );
        job.schedule = Some(expr.clone());
    }

    if let Some(parameters) = update.parameters {
        if job.schedule.is_none() && job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot update the parameters of a job which is not a cron job.",
            ));
        }
        for document in &parameters {
            document
                .validate()
                .map_err(|e| EngineError::validation(e.to_string()))?;
        }
        job.parameters = parameters;
    }

    if let Some(env_variables) = update.env_variables {
        if job.schedule.is_none() && job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot update the env variables of a job which is not a cron job.",
            ));
        }
        if !env::are_environment_variables_valid(&env_variables) {
            return Err(EngineError::validation(
                "Invalid environment variables definition.",
            ));
        }
        job.env_variables = env_variables;
    }

    if let Some(next_scheduled_time) = update.next_scheduled_time {
        if job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot set the next scheduled time of a job which is not a draft.",
            ));
        }
        if job.schedule.is_some() && update.cron_schedule.is_some() {
            return Err(EngineError::validation(
                "Cannot set the next scheduled time of a cron job.",
            ));
        }
        // A duplicated cron job updated to run at a given date becomes a
        // one-off job.
        if update.cron_schedule.is_none() {
            job.schedule = None;
        }
        job.next_scheduled_time = Some(next_scheduled_time);
    }

    // A draft given neither a time nor a cron schedule is to run right away.
    if job.status == JobStatus::Draft
        && update.next_scheduled_time.is_none()
        && update.cron_schedule.is_none()
    {
        job.schedule = None;
        job.next_scheduled_time = None;
    }

    if let Some(strategy_json) = update.strategy_json {
        if job.schedule.is_none() && job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot set the strategy json of a job which is not a draft nor a cron job.",
            ));
        }
        job.strategy_json = strategy_json;
    }

    if let Some(max_retained_pipeline_runs) = update.max_retained_pipeline_runs {
        if job.schedule.is_none() && job.status != JobStatus::Draft {
            return Err(EngineError::validation(
                "Cannot update the max_retained_pipeline_runs of a job which is not a draft nor a cron job.",
            ));
        }
        if max_retained_pipeline_runs < -1 {
            return Err(EngineError::validation(format!(
                "Invalid max_retained_pipeline_runs: {max_retained_pipeline_runs}."
            )));
        }
        job.max_retained_pipeline_runs = max_retained_pipeline_runs;
    }

    if update.confirm_draft {
        if job.status != JobStatus::Draft {
            return Err(EngineError::validation("The job is not a draft."));
        }

        // Make sure the pipeline does not refer to environments whose image
        // has disappeared since the draft was created.
        let pipeline = construct_pipeline(&job.pipeline_definition)
            .map_err(|e| EngineError::validation(e.to_string()))?;
        let missing =
            images::missing_images(tpe.conn(), job.project_uuid, &pipeline.environments()).await?;
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|uuid| uuid.to_string()).collect();
            return Err(EngineError::not_found(format!(
                "Pipeline references environments that do not exist in the project. \
                 The following environments do not exist: [{}]. Please make sure all \
                 pipeline steps are assigned an environment that exists in the project.",
                missing.join(", ")
            )));
        }

        if job.schedule.is_none() {
            job.status = JobStatus::Pending;

            // A one-off job that needs to run right now. The scheduler will
            // not pick it up because it has no next_scheduled_time.
            if job.next_scheduled_time.is_none() {
                job.last_scheduled_time = Some(now);
                job_repository::update(tpe.conn(), &job).await?;
                return run_job(tpe, job.uuid).await;
            }

            // One-off jobs set to run at a given date are picked up by the
            // scheduler now that they are no longer drafts.
            job.last_scheduled_time = job.next_scheduled_time;
        } else {
            // Cron jobs are considered STARTED the moment the scheduler can
            // decide about running them.
            job.last_scheduled_time = job.next_scheduled_time;
            job.status = JobStatus::Started;
        }
    }

    job_repository::update(tpe.conn(), &job).await?;
    Ok(())
}

// =============================================================================
// RunJob
// =============================================================================

/// Launch the pipeline runs of a job, one per parameter document.
///
/// The job row is locked until commit, so concurrent launches of the same
/// job serialize and each batch refers to a distinct
/// `total_scheduled_executions` value.
pub async fn run_job(tpe: &mut TwoPhaseExecutor, job_uuid: Uuid) -> Result<(), EngineError> {
    let mut job = job_repository::find_by_id_for_update(tpe.conn(), job_uuid)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Job {job_uuid} not found")))?;

    // In case the job got aborted while the scheduler attempted to run it.
    if job.status == JobStatus::Aborted {
        tpe.defer(RunJobCollateral {
            job_uuid: job.uuid,
            project_uuid: job.project_uuid,
            schedule: job.schedule.clone(),
            run_config: RunConfig::default(),
            tasks_to_launch: Vec::new(),
        });
        return Ok(());
    }

    // Jobs that run once sit in PENDING until their launch.
    if job.status == JobStatus::Pending {
        job.status = JobStatus::Started;
    }

    let mut tasks_to_launch: Vec<(Uuid, PipelineDefinition)> = Vec::new();

    for (run_index, run_parameters) in job.parameters.iter().enumerate() {
        let mut definition = job.pipeline_definition.clone();
        run_parameters
            .overlay(&mut definition)
            .map_err(|e| EngineError::validation(e.to_string()))?;
        let pipeline =
            construct_pipeline(&definition).map_err(|e| EngineError::validation(e.to_string()))?;

        // Specify the task id beforehand to avoid race conditions between
        // the task and its presence in the db.
        let run_uuid = Uuid::new_v4();

        let run = PipelineRun {
            uuid: run_uuid,
            job_uuid: job.uuid,
            project_uuid: job.project_uuid,
            pipeline_uuid: job.pipeline_uuid,
            status: RunStatus::Pending,
            parameters: run_parameters.clone(),
            env_variables: job.env_variables.clone(),
            job_run_index: job.total_scheduled_executions,
            job_run_pipeline_run_index: run_index as i32,
            pipeline_run_index: job.total_scheduled_pipeline_runs,
            started_time: None,
            finished_time: None,
        };
        job.total_scheduled_pipeline_runs += 1;

        run_repository::insert(tpe.conn(), &run).await?;

        let step_uuids: Vec<Uuid> = pipeline.steps().iter().map(|s| s.uuid).collect();
        run_repository::insert_steps(tpe.conn(), run_uuid, &step_uuids).await?;

        tasks_to_launch.push((run_uuid, definition));
    }

    job.total_scheduled_executions += 1;
    job_repository::update(tpe.conn(), &job).await?;

    let pins = image_repository::job_image_mappings(tpe.conn(), job.uuid).await?;
    let run_config = RunConfig {
        env_image_mappings: images::resolve_image_mappings(job.project_uuid, pins),
        user_env_variables: job.env_variables.clone(),
    };

    tracing::info!(
        "Launching {} run(s) of job {} (batch {})",
        tasks_to_launch.len(),
        job.uuid,
        job.total_scheduled_executions - 1
    );

    tpe.defer(RunJobCollateral {
        job_uuid: job.uuid,
        project_uuid: job.project_uuid,
        schedule: job.schedule.clone(),
        run_config,
        tasks_to_launch,
    });

    Ok(())
}

struct RunJobCollateral {
    job_uuid: Uuid,
    project_uuid: Uuid,
    schedule: Option<String>,
    run_config: RunConfig,
    tasks_to_launch: Vec<(Uuid, PipelineDefinition)>,
}

#[async_trait]
impl CollateralEffect for RunJobCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        // Safety check in case the job has no runs.
        if self.tasks_to_launch.is_empty() {
            return Ok(());
        }

        // Pruning failures must never fail the launch that triggered them.
        if let Err(err) = delete_non_retained_pipeline_runs(ctx, self.job_uuid).await {
            tracing::warn!("Pruning of job {} failed: {:?}", self.job_uuid, err);
        }

        for (task_id, definition) in &self.tasks_to_launch {
            let payload = RunDispatchPayload {
                job_uuid: self.job_uuid,
                project_uuid: self.project_uuid,
                pipeline_definition: definition.clone(),
                run_config: self.run_config.clone(),
            };
            // Fire and forget, the dispatch result is intentionally discarded.
            ctx.dispatcher
                .dispatch(*task_id, &payload)
                .await
                .map_err(EngineError::collateral)?;
        }

        Ok(())
    }

    async fn revert(&self, db: &PgPool) -> Result<(), EngineError> {
        let mut tx = db.begin().await?;

        // Jobs that run only once are considered as entirely failed.
        if self.schedule.is_none() {
            job_repository::set_status(&mut *tx, self.job_uuid, JobStatus::Failure).await?;
        }

        let run_uuids: Vec<Uuid> = self.tasks_to_launch.iter().map(|(id, _)| *id).collect();
        run_repository::set_runs_and_steps_status(&mut tx, &run_uuids, RunStatus::Failure).await?;

        tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// AbortJob
// =============================================================================

/// Abort a job and every run of it that has not reached an end state.
///
/// Idempotent: aborting an already completed job reports false and changes
/// nothing.
pub async fn abort_job(tpe: &mut TwoPhaseExecutor, job_uuid: Uuid) -> Result<bool, EngineError> {
    let Some(mut job) = job_repository::find_by_id(tpe.conn(), job_uuid).await? else {
        return Ok(false);
    };

    if job.status.is_end_state() {
        // Nothing to abort; stale image processing still runs.
        tpe.defer(AbortJobCollateral {
            project_uuid: job.project_uuid,
            run_uuids: Vec::new(),
        });
        return Ok(false);
    }

    job.status = JobStatus::Aborted;
    // A recurring job, or a job scheduled to run once in the future, will
    // not be scheduled anymore.
    job.next_scheduled_time = None;
    job_repository::update(tpe.conn(), &job).await?;

    // These uuids are the task-queue correlation ids as well.
    let run_uuids = run_repository::active_uuids(tpe.conn(), job_uuid).await?;
    run_repository::mark_active_runs(tpe.conn(), &run_uuids, RunStatus::Aborted).await?;
    // Steps that have already completed keep their status.
    run_repository::mark_active_steps(tpe.conn(), &run_uuids, RunStatus::Aborted).await?;

    tracing::info!("Aborted job {} with {} active run(s)", job_uuid, run_uuids.len());

    tpe.defer(AbortJobCollateral {
        project_uuid: job.project_uuid,
        run_uuids,
    });
    Ok(true)
}

struct AbortJobCollateral {
    project_uuid: Uuid,
    run_uuids: Vec<Uuid>,
}

#[async_trait]
impl CollateralEffect for AbortJobCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        // Best-effort revocation with a bounded wait, then a cooperative
        // abort signal per run; a worker already executing must observe the
        // flag itself.
        ctx.dispatcher
            .revoke(&self.run_uuids, REVOKE_TIMEOUT)
            .await
            .map_err(EngineError::collateral)?;

        for run_uuid in &self.run_uuids {
            ctx.dispatcher
                .signal_abort(*run_uuid)
                .await
                .map_err(EngineError::collateral)?;
        }

        images::process_stale_images(&ctx.db, self.project_uuid, false).await?;
        Ok(())
    }
}

// =============================================================================
// UpdateJobPipelineRun
// =============================================================================

/// Apply a status transition to one run of a job and re-check job
/// completion.
///
/// One-off jobs flip to SUCCESS once zero runs remain PENDING or STARTED,
/// regardless of individual run outcomes; retention and cleanup logic depend
/// on this exact definition of "completed".
pub async fn update_job_pipeline_run(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
    run_uuid: Uuid,
    update: &StatusUpdate,
) -> Result<(), EngineError> {
    run_repository::update_status(tpe.conn(), job_uuid, run_uuid, update).await?;

    let mut collateral = RunStatusCollateral {
        project_uuid: None,
        job_uuid: None,
        completed: false,
    };

    // See if the job is done running, i.e. all of its runs are done.
    if update.status.is_end_state() {
        let job = job_repository::find_by_id(tpe.conn(), job_uuid)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Job {job_uuid} not found")))?;
        collateral.project_uuid = Some(job.project_uuid);
        collateral.job_uuid = Some(job.uuid);

        // Only non recurring jobs terminate to SUCCESS.
        if job.schedule.is_none() {
            // A fresh count is necessary because a run could have been
            // deleted concurrently; the number of finished runs cannot be
            // trusted. One-off jobs create all their runs in a batch.
            let runs_to_complete = run_repository::count_active(tpe.conn(), job_uuid).await?;
            let total = job.parameters.len() as i64;
            tracing::info!(
                "One-off job {} has completed {}/{} runs",
                job_uuid,
                total - runs_to_complete,
                total
            );

            if runs_to_complete == 0 {
                // Guarded: aborted runs that were still executing report an
                // end state too, re-triggering this check.
                job_repository::set_status_if_ongoing(tpe.conn(), job_uuid, JobStatus::Success)
                    .await?;
                collateral.completed = true;
            }
        }
    }

    tpe.defer(collateral);
    Ok(())
}

struct RunStatusCollateral {
    project_uuid: Option<Uuid>,
    job_uuid: Option<Uuid>,
    completed: bool,
}

#[async_trait]
impl CollateralEffect for RunStatusCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        if self.completed {
            if let Some(project_uuid) = self.project_uuid {
                images::process_stale_images(&ctx.db, project_uuid, false).await?;
            }
        }

        if let Some(job_uuid) = self.job_uuid {
            if let Err(err) = delete_non_retained_pipeline_runs(ctx, job_uuid).await {
                tracing::warn!("Pruning of job {} failed: {:?}", job_uuid, err);
            }
        }

        Ok(())
    }
}

// =============================================================================
// AbortJobPipelineRun / DeleteJob / DeleteJobPipelineRun
// =============================================================================

/// Abort one run of a job, then re-check job completion.
pub async fn abort_job_pipeline_run(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
    run_uuid: Uuid,
) -> Result<bool, EngineError> {
    if !runs::abort_pipeline_run(tpe, run_uuid).await? {
        return Ok(false);
    }

    // Takes care of updating the job status, thus freeing pinned images and
    // processing stale ones.
    update_job_pipeline_run(tpe, job_uuid, run_uuid, &StatusUpdate::aborted()).await?;
    Ok(true)
}

/// Stop a job if it is running, then remove it and its related entities.
pub async fn delete_job(tpe: &mut TwoPhaseExecutor, job_uuid: Uuid) -> Result<bool, EngineError> {
    let Some(job) = job_repository::find_by_id(tpe.conn(), job_uuid).await? else {
        return Ok(false);
    };

    // Won't do anything if the job is not running.
    abort_job(tpe, job_uuid).await?;

    // Deletes cascade to the job's runs, their steps and its image pins.
    job_repository::delete(tpe.conn(), job_uuid).await?;

    tpe.defer(DeleteJobCollateral {
        project_uuid: job.project_uuid,
    });
    Ok(true)
}

/// Stop one run of a job if it is running, then remove it.
///
/// The run's working directory is removed by the endpoint's owner, not here.
pub async fn delete_job_pipeline_run(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
    run_uuid: Uuid,
) -> Result<bool, EngineError> {
    if !job_repository::exists(tpe.conn(), job_uuid).await? {
        return Ok(false);
    }
    if run_repository::find_by_id(tpe.conn(), run_uuid).await?.is_none() {
        return Ok(false);
    }

    // Takes care of updating the job status, thus freeing pinned images and
    // processing stale ones.
    abort_job_pipeline_run(tpe, job_uuid, run_uuid).await?;

    run_repository::delete(tpe.conn(), run_uuid).await?;
    Ok(true)
}

struct DeleteJobCollateral {
    project_uuid: Uuid,
}

#[async_trait]
impl CollateralEffect for DeleteJobCollateral {
    async fn collateral(&self, ctx: &AppContext) -> Result<(), EngineError> {
        images::process_stale_images(&ctx.db, self.project_uuid, false).await?;
        Ok(())
    }
}

// =============================================================================
// PauseCronJob / ResumeCronJob
// =============================================================================

/// Pause an ongoing cron job. Returns false when the job is not an ongoing
/// cron job; callers treat that as a conflict, not a failure.
pub async fn pause_cron_job(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
) -> Result<bool, EngineError> {
    let Some(mut job) =
        job_repository::find_cron_for_update(tpe.conn(), job_uuid, JobStatus::Started).await?
    else {
        return Ok(false);
    };

    job.status = JobStatus::Paused;
    job.next_scheduled_time = None;
    job_repository::update(tpe.conn(), &job).await?;
    Ok(true)
}

/// Resume a paused cron job, recomputing its next scheduled time from the
/// cron expression evaluated at the current time.
pub async fn resume_cron_job(
    tpe: &mut TwoPhaseExecutor,
    job_uuid: Uuid,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, EngineError> {
    let Some(mut job) =
        job_repository::find_cron_for_update(tpe.conn(), job_uuid, JobStatus::Paused).await?
    else {
        return Ok(None);
    };

    let Some(expr) = job.schedule.clone() else {
        return Ok(None);
    };
    let next = schedule::next_occurrence(&expr, chrono::Utc::now())
        .map_err(|e| EngineError::validation(e.to_string()))?;

    job.status = JobStatus::Started;
    job.next_scheduled_time = Some(next);
    job_repository::update(tpe.conn(), &job).await?;
    Ok(Some(next))
}

// =============================================================================
// Retention Pruning
// =============================================================================

/// Highest `pipeline_run_index` eligible for deletion.
///
/// -1 because the counter is incremented for every scheduled run, so
/// pipeline run 0 makes it go to 1.
fn retention_threshold(total_scheduled_pipeline_runs: i32, max_retained_pipeline_runs: i32) -> i32 {
    (total_scheduled_pipeline_runs - 1) - max_retained_pipeline_runs
}

/// Delete completed runs beyond the job's retention threshold.
///
/// Deletion goes through the run-cleanup endpoint so that externally owned
/// artifacts are removed by their owner; individual failures are logged and
/// never fatal.
pub async fn delete_non_retained_pipeline_runs(
    ctx: &AppContext,
    job_uuid: Uuid,
) -> Result<(), EngineError> {
    let Some((max_retained, total_scheduled)) =
        job_repository::retention_info(&ctx.db, job_uuid).await?
    else {
        return Ok(());
    };

    tracing::info!(
        "Deleting non retained runs for job {}, max retained pipeline runs: {}",
        job_uuid,
        max_retained
    );
    if max_retained < 0 {
        tracing::info!("Nothing to do.");
        return Ok(());
    }

    let max_index = retention_threshold(total_scheduled, max_retained);
    let run_uuids = run_repository::prunable(&ctx.db, job_uuid, max_index).await?;

    for run_uuid in run_uuids {
        tracing::info!("Deleting run {}.", run_uuid);
        // The cleanup endpoint treats concurrent deletion (404) as success.
        match ctx.run_cleanup.delete_job_run(job_uuid, run_uuid).await {
            Ok(()) => tracing::info!("Successfully deleted run {}.", run_uuid),
            Err(err) => tracing::error!(
                "Unexpected error while deleting run {}: {:#}",
                run_uuid,
                err
            ),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retention_threshold() {
        // 5 completed runs (indices 0..4), 2 retained: indices 0, 1 and 2
        // are eligible, 3 and 4 survive.
        assert_eq!(retention_threshold(5, 2), 2);
        // Nothing scheduled yet: nothing is eligible.
        assert_eq!(retention_threshold(0, 2), -3);
        // Retain nothing: every scheduled run is eligible.
        assert_eq!(retention_threshold(3, 0), 2);
    }

    #[test]
    fn test_initial_next_scheduled_time_immediate() {
        assert_eq!(initial_next_scheduled_time(None, None).unwrap(), None);
    }

    #[test]
    fn test_initial_next_scheduled_time_scheduled_start() {
        let start = chrono::Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            initial_next_scheduled_time(None, Some(start)).unwrap(),
            Some(start)
        );
    }

    #[test]
    fn test_initial_next_scheduled_time_cron() {
        let next = initial_next_scheduled_time(Some("0 * * * *"), None)
            .unwrap()
            .unwrap();
        assert_eq!(next.timestamp() % 3600, 0);
        assert!(next > chrono::Utc::now());
    }

    #[test]
    fn test_initial_next_scheduled_time_rejects_conflict() {
        let start = chrono::Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            initial_next_scheduled_time(Some("0 * * * *"), Some(start)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_initial_next_scheduled_time_rejects_bad_cron() {
        assert!(matches!(
            initial_next_scheduled_time(Some("not a cron"), None),
            Err(EngineError::Validation(_))
        ));
    }
}
