//! Pipeline Run Repository
//!
//! Handles all database operations related to pipeline runs and their steps.
//! The guarded status updates in here are the only writers of run and step
//! status outside the lifecycle operations that orchestrate multi-record
//! transitions.

use cascade_core::domain::run::{PipelineRun, PipelineRunStep, RunStatus};
use cascade_core::dto::run::StatusUpdate;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

const RUN_COLUMNS: &str = "uuid, job_uuid, project_uuid, pipeline_uuid, status, parameters, \
     env_variables, job_run_index, job_run_pipeline_run_index, pipeline_run_index, \
     started_time, finished_time";

/// Insert a run row. The uuid was chosen by the creator beforehand, so the
/// task-queue correlation id is known before the row exists.
pub async fn insert(conn: &mut PgConnection, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs (uuid, job_uuid, project_uuid, pipeline_uuid, status,
                                   parameters, env_variables, job_run_index,
                                   job_run_pipeline_run_index, pipeline_run_index)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(run.uuid)
    .bind(run.job_uuid)
    .bind(run.project_uuid)
    .bind(run.pipeline_uuid)
    .bind(run.status.as_str())
    .bind(serde_json::to_value(&run.parameters).unwrap())
    .bind(serde_json::to_value(&run.env_variables).unwrap())
    .bind(run.job_run_index)
    .bind(run.job_run_pipeline_run_index)
    .bind(run.pipeline_run_index)
    .execute(conn)
    .await?;

    Ok(())
}

/// Bulk-create the PENDING step rows of a run.
pub async fn insert_steps(
    conn: &mut PgConnection,
    run_uuid: Uuid,
    step_uuids: &[Uuid],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_run_steps (run_uuid, step_uuid, status)
        SELECT $1, unnest($2::uuid[]), 'PENDING'
        "#,
    )
    .bind(run_uuid)
    .bind(step_uuids)
    .execute(conn)
    .await?;

    Ok(())
}

/// Find a run by ID
pub async fn find_by_id(
    executor: impl PgExecutor<'_>,
    run_uuid: Uuid,
) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE uuid = $1"
    ))
    .bind(run_uuid)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Runs of a job, newest batch first.
pub async fn list_for_job(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE job_uuid = $1 \
         ORDER BY job_run_index DESC, job_run_pipeline_run_index DESC"
    ))
    .bind(job_uuid)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Uuids of the job's runs that have not reached an end state.
pub async fn active_uuids(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        r#"
        SELECT uuid FROM pipeline_runs
        WHERE job_uuid = $1 AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(job_uuid)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(uuid,)| uuid).collect())
}

/// How many runs of the job still need to get to an end state.
///
/// A fresh count instead of a decrement, because runs can be deleted
/// concurrently and one-off jobs create all their runs in a batch.
pub async fn count_active(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT COUNT(*) FROM pipeline_runs
        WHERE job_uuid = $1 AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(job_uuid)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Apply a status transition to a run of a job.
///
/// An entity that has already reached an end state is not updated; this
/// avoids races between the orchestrator and a worker callback trying to
/// update the same run concurrently, for example when a task is aborted.
pub async fn update_status(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
    run_uuid: Uuid,
    update: &StatusUpdate,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs
        SET status = $3,
            started_time = COALESCE($4, started_time),
            finished_time = COALESCE($5, finished_time)
        WHERE job_uuid = $1 AND uuid = $2 AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(job_uuid)
    .bind(run_uuid)
    .bind(update.status.as_str())
    .bind(update.started_time)
    .bind(update.finished_time)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Apply a status transition to a single step, with the same end-state guard.
pub async fn update_step_status(
    executor: impl PgExecutor<'_>,
    run_uuid: Uuid,
    step_uuid: Uuid,
    update: &StatusUpdate,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_run_steps
        SET status = $3,
            started_time = COALESCE($4, started_time),
            finished_time = COALESCE($5, finished_time)
        WHERE run_uuid = $1 AND step_uuid = $2 AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(run_uuid)
    .bind(step_uuid)
    .bind(update.status.as_str())
    .bind(update.started_time)
    .bind(update.finished_time)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Move every given run that is not in an end state to the given status.
pub async fn mark_active_runs(
    executor: impl PgExecutor<'_>,
    run_uuids: &[Uuid],
    status: RunStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_runs SET status = $2
        WHERE uuid = ANY($1) AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(run_uuids)
    .bind(status.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Move every not-yet-finished step of the given runs to the given status.
/// Steps that already completed keep their status.
pub async fn mark_active_steps(
    executor: impl PgExecutor<'_>,
    run_uuids: &[Uuid],
    status: RunStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_run_steps SET status = $2
        WHERE run_uuid = ANY($1) AND status IN ('PENDING', 'STARTED')
        "#,
    )
    .bind(run_uuids)
    .bind(status.as_str())
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Unconditionally set the status of the given runs and all their steps.
/// Used by compensating reverts, which overwrite whatever state the failed
/// launch left behind.
pub async fn set_runs_and_steps_status(
    conn: &mut PgConnection,
    run_uuids: &[Uuid],
    status: RunStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE pipeline_run_steps SET status = $2 WHERE run_uuid = ANY($1)")
        .bind(run_uuids)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE pipeline_runs SET status = $2 WHERE uuid = ANY($1)")
        .bind(run_uuids)
        .bind(status.as_str())
        .execute(conn)
        .await?;

    Ok(())
}

/// Fetch a step of a run.
pub async fn find_step(
    executor: impl PgExecutor<'_>,
    run_uuid: Uuid,
    step_uuid: Uuid,
) -> Result<Option<PipelineRunStep>, sqlx::Error> {
    let row = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT run_uuid, step_uuid, status, started_time, finished_time
        FROM pipeline_run_steps
        WHERE run_uuid = $1 AND step_uuid = $2
        "#,
    )
    .bind(run_uuid)
    .bind(step_uuid)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Delete a run by ID; deletions cascade to its steps.
pub async fn delete(executor: impl PgExecutor<'_>, run_uuid: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipeline_runs WHERE uuid = $1")
        .bind(run_uuid)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Completed runs that fall outside the retention threshold, oldest first.
///
/// A run with an index greater than the threshold is never returned, even
/// when completed, so deletion lags rather than going out of order.
pub async fn prunable(
    executor: impl PgExecutor<'_>,
    job_uuid: Uuid,
    max_index: i32,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid,)>(
        r#"
        SELECT uuid FROM pipeline_runs
        WHERE job_uuid = $1
          AND status IN ('SUCCESS', 'FAILURE', 'ABORTED')
          AND pipeline_run_index <= $2
        ORDER BY pipeline_run_index ASC
        "#,
    )
    .bind(job_uuid)
    .bind(max_index)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(uuid,)| uuid).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    uuid: Uuid,
    job_uuid: Uuid,
    project_uuid: Uuid,
    pipeline_uuid: Uuid,
    status: String,
    parameters: serde_json::Value,
    env_variables: serde_json::Value,
    job_run_index: i32,
    job_run_pipeline_run_index: i32,
    pipeline_run_index: i32,
    started_time: Option<chrono::DateTime<chrono::Utc>>,
    finished_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        let status = RunStatus::parse(&row.status).unwrap_or(RunStatus::Pending);

        PipelineRun {
            uuid: row.uuid,
            job_uuid: row.job_uuid,
            project_uuid: row.project_uuid,
            pipeline_uuid: row.pipeline_uuid,
            status,
            parameters: serde_json::from_value(row.parameters).unwrap_or_default(),
            env_variables: serde_json::from_value(row.env_variables).unwrap_or_default(),
            job_run_index: row.job_run_index,
            job_run_pipeline_run_index: row.job_run_pipeline_run_index,
            pipeline_run_index: row.pipeline_run_index,
            started_time: row.started_time,
            finished_time: row.finished_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    run_uuid: Uuid,
    step_uuid: Uuid,
    status: String,
    started_time: Option<chrono::DateTime<chrono::Utc>>,
    finished_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<StepRow> for PipelineRunStep {
    fn from(row: StepRow) -> Self {
        PipelineRunStep {
            run_uuid: row.run_uuid,
            step_uuid: row.step_uuid,
            status: RunStatus::parse(&row.status).unwrap_or(RunStatus::Pending),
            started_time: row.started_time,
            finished_time: row.finished_time,
        }
    }
}
